//! Tests for the shared cancellation token.

use std::thread;

use tally_core::traits::{Cancellable, CancellationToken};

#[test]
fn test_clone_cancelled_from_another_thread() {
    let token = CancellationToken::new();
    assert!(!token.is_cancelled());

    let remote = token.clone();
    thread::spawn(move || remote.cancel()).join().unwrap();
    assert!(token.is_cancelled());

    // cancelling twice is harmless
    token.cancel();
    assert!(token.is_cancelled());
    assert!(!CancellationToken::default().is_cancelled());
}
