//! Keyed database handle.
//!
//! `DatabaseHandle` is the single opened encrypted database per storage
//! instance. It is created with the cipher key already in hand, so no
//! connection can exist before the key did, and it is never handed out
//! directly; callers only ever see pooled [`Connection`](super::pool::Connection)s.
//!
//! WAL journal mode and the other PRAGMAs are applied per-connection, after
//! keying, because SQLCipher requires `PRAGMA key` to be the first statement
//! on a fresh connection.

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::keys::EncryptionKey;

use super::{Result, StorageError, migrations};

const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;
     PRAGMA journal_size_limit = 67108864;";

pub(crate) struct DatabaseHandle {
    path: PathBuf,
    key_hex: Zeroizing<String>,
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DatabaseHandle {
    /// Open (or create) the encrypted database at `path` with `key`.
    ///
    /// Verifies the key against the file, applies base migrations, and stamps
    /// first-open metadata. A file that cannot be read with this key fails
    /// with [`StorageError::Open`]; the file is left untouched.
    pub(crate) fn open(path: &Path, key: &EncryptionKey) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            // Restrict directory permissions to owner-only on Unix
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o700);
                let _ = std::fs::set_permissions(parent, perms);
            }
        }

        let handle = Self {
            path: path.to_path_buf(),
            key_hex: Zeroizing::new(hex::encode(key.as_bytes())),
        };

        let conn = handle.connect()?;

        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(path, perms);
        }

        let applied = migrations::apply_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(path = %path.display(), applied, "base schema migrations applied");
        }

        conn.execute(
            "INSERT OR IGNORE INTO storage_meta (key, value, updated_at)
             VALUES ('created_at', datetime('now'), datetime('now'))",
            [],
        )?;

        Ok(handle)
    }

    /// Create a fresh keyed connection with the standard PRAGMA block applied.
    pub(crate) fn connect(&self) -> Result<rusqlite::Connection> {
        let conn = rusqlite::Connection::open(&self.path)?;

        // PRAGMA key must precede any other statement. The quoted x'..' form
        // passes the raw 32-byte key spec rather than a passphrase to derive.
        conn.execute_batch(&format!("PRAGMA key = \"x'{}'\";", self.key_hex.as_str()))?;

        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|e| {
            StorageError::Open(format!(
                "database at {} could not be read with the provided key: {e}",
                self.path.display()
            ))
        })?;

        conn.execute_batch(CONNECTION_PRAGMAS)?;
        Ok(conn)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn wal_path(&self) -> PathBuf {
        sibling(&self.path, "-wal")
    }

    pub(crate) fn shm_path(&self) -> PathBuf {
        sibling(&self.path, "-shm")
    }

    /// Size of the primary database file, 0 if absent. Never fails.
    pub(crate) fn db_file_size(&self) -> u64 {
        artifact_size(&self.path)
    }

    /// Size of the write-ahead log, 0 if absent. Never fails.
    pub(crate) fn wal_file_size(&self) -> u64 {
        artifact_size(&self.wal_path())
    }

    /// Size of the shared-memory index file, 0 if absent. Never fails.
    pub(crate) fn shm_file_size(&self) -> u64 {
        artifact_size(&self.shm_path())
    }
}

/// SQLite derives WAL/SHM names by appending to the full database filename.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn artifact_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
