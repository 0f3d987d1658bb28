//! The per-experiment record of open alert episodes.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tally_core::events::NotificationType;

/// Ordered set of notification types whose condition was last observed as
/// triggered. Persisted as the `pastNotifications` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationLedger {
    tags: SmallVec<[NotificationType; 3]>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: NotificationType) -> bool {
        self.tags.contains(&kind)
    }

    /// Append `kind` unless already present. Returns whether it was added.
    pub fn insert(&mut self, kind: NotificationType) -> bool {
        if self.contains(kind) {
            return false;
        }
        self.tags.push(kind);
        true
    }

    /// Remove `kind`. Returns whether it was present.
    pub fn remove(&mut self, kind: NotificationType) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| *t != kind);
        self.tags.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = NotificationType> + '_ {
        self.tags.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<NotificationType> for NotificationLedger {
    fn from_iter<I: IntoIterator<Item = NotificationType>>(iter: I) -> Self {
        let mut ledger = Self::new();
        for kind in iter {
            ledger.insert(kind);
        }
        ledger
    }
}
