pub mod catalog;
pub mod profiles;
pub mod schema;
pub mod status;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

pub type DBResult<T> = Result<T, rusqlite::Error>;

/// How long a connection waits on another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the achievements database.
///
/// Cheap to clone. Every request opens its own connection through [`Database::connect`],
/// so concurrent requests only coordinate through SQLite's transactions.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database at `path` and initializes its schema.
    pub fn open(path: impl AsRef<Path>) -> DBResult<Self> {
        let db = Self { path: path.as_ref().to_path_buf() };
        db.initialize()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> DBResult<Connection> {
        let connection = Connection::open(&self.path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        Ok(connection)
    }

    fn initialize(&self) -> DBResult<()> {
        let connection = self.connect()?;
        connection.pragma_update(None, "journal_mode", "WAL")?;

        for (table, sql) in schema::TABLES {
            log::debug!("[initialize_db] creating {table} table...");
            connection
                .execute(sql, [])
                .inspect_err(|err| log::error!("[initialize_db] Could not create {table}: {err}"))?;
        }
        connection.execute_batch(schema::INDEXES)?;

        log::info!("Database ready at {}", self.path.display());
        Ok(())
    }
}

/// Maps a constraint violation to `Ok(false)` ("nothing inserted"), passing other errors on.
pub(crate) fn swallow_constraint_violation(err: rusqlite::Error) -> DBResult<bool> {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            log::trace!("[swallow_constraint_violation] Ignoring: {err}");
            Ok(false)
        }
        _ => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_tables() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();

        let connection = db.connect().unwrap();
        let mut stmt = connection
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"Achievements".to_string()));
        assert!(tables.contains(&"UserAchievements".to_string()));
        assert!(tables.contains(&"UserProfiles".to_string()));
    }

    #[test]
    fn test_open_twice_is_harmless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("badges.db");
        Database::open(&path).unwrap();
        Database::open(&path).unwrap();
    }
}
