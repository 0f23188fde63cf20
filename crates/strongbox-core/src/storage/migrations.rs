//! Base-schema migrations.
//!
//! These cover only the engine's own bookkeeping tables. Application schema
//! arrives through extension registration, not through this list.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core bookkeeping: schema version and storage metadata",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Extension registration ledger",
        up: MIGRATION_V2_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: schema version tracking plus a small metadata table
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS storage_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: durable record of which extensions have ever registered here.
/// Lookup stays in-memory; this ledger exists for diagnostics and so a
/// reopened database can report its schema surface.
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS registered_extensions (
    name TEXT PRIMARY KEY,
    first_registered_at TEXT NOT NULL,
    last_registered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_registered_extensions_last
    ON registered_extensions(last_registered_at);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}
