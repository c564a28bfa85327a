//! SQL migration definitions for the tenderwatch database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: tenders, organisations, source_stats, settings",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored notices. A notice is a duplicate when its link or its ocid is already known.
CREATE TABLE IF NOT EXISTS tenders (
    id           TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    link         TEXT NOT NULL UNIQUE,
    published    TEXT NOT NULL DEFAULT '',
    description  TEXT NOT NULL DEFAULT '',
    organisation TEXT,
    supplier     TEXT,
    ocid         TEXT UNIQUE,
    source_label TEXT NOT NULL,
    scraped_at   TEXT NOT NULL,
    tags_json    TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_tenders_scraped_at ON tenders(scraped_at);
CREATE INDEX IF NOT EXISTS idx_tenders_source_label ON tenders(source_label);

-- Buyer and supplier registry
CREATE TABLE IF NOT EXISTS organisations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL,
    kind          TEXT NOT NULL CHECK (kind IN ('buyer', 'supplier')),
    first_seen_at TEXT NOT NULL,
    UNIQUE(name, kind)
);

-- Per-source run statistics
CREATE TABLE IF NOT EXISTS source_stats (
    source_key  TEXT PRIMARY KEY,
    last_run_at TEXT NOT NULL,
    last_added  INTEGER NOT NULL DEFAULT 0,
    total_added INTEGER NOT NULL DEFAULT 0
);

-- Key/value settings (last run timestamp)
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
