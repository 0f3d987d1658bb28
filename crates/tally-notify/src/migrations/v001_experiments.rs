//! v001: experiments with their notification ledger.

pub const MIGRATION_SQL: &str = "
CREATE TABLE IF NOT EXISTS experiments (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    project             TEXT,
    tags                TEXT NOT NULL DEFAULT '[]',
    archived            INTEGER NOT NULL DEFAULT 0,
    has_linked_changes  INTEGER NOT NULL DEFAULT 0,
    past_notifications  TEXT NOT NULL DEFAULT '[]',
    version             INTEGER NOT NULL DEFAULT 0,
    updated_at          TEXT NOT NULL
);
";
