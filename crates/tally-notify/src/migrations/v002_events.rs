//! v002: append-only alert event log.

pub const MIGRATION_SQL: &str = "
CREATE TABLE IF NOT EXISTS events (
    id                  TEXT PRIMARY KEY,
    event               TEXT NOT NULL,
    object              TEXT NOT NULL,
    notification_type   TEXT NOT NULL,
    experiment_id       TEXT NOT NULL,
    payload             TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_experiment ON events(experiment_id, created_at);
";
