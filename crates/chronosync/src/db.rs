//! Database connection utilities.

use std::path::Path;

use sea_orm::{Database, DatabaseConnection, DbErr};

#[cfg(feature = "migrate")]
use crate::error::StorageError;

/// File name of the state database inside the state directory.
pub const DATABASE_FILE_NAME: &str = "chronosync.db";

/// SQLite URL for the state database in `state_dir`, created on first use.
pub fn database_url(state_dir: &Path) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        state_dir.join(DATABASE_FILE_NAME).display()
    )
}

/// Configure SQLite pragmas.
///
/// - `journal_mode=WAL` so readers (`status`, `queue list`) never block a run
/// - `busy_timeout=5000` to wait out short lock contention
/// - `synchronous=NORMAL`, safe with WAL
async fn configure_sqlite(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm::{ConnectionTrait, Statement};

    for pragma in [
        "PRAGMA journal_mode=WAL",
        "PRAGMA busy_timeout=5000",
        "PRAGMA synchronous=NORMAL",
    ] {
        db.execute(Statement::from_string(
            db.get_database_backend(),
            pragma.to_string(),
        ))
        .await?;
    }

    Ok(())
}

/// Establish a connection to the state database.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    if database_url.starts_with("sqlite://") {
        configure_sqlite(&db).await?;
    }

    Ok(db)
}

/// Connect and run all pending migrations.
///
/// # Example
/// ```ignore
/// let db = chronosync::connect_and_migrate("sqlite::memory:").await?;
/// ```
#[cfg(feature = "migrate")]
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    use sea_orm_migration::MigratorTrait;

    let db = connect(database_url).await?;
    crate::migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Open the state database in `state_dir`, creating the directory and
/// applying migrations as needed.
#[cfg(feature = "migrate")]
pub async fn open_state(state_dir: &Path) -> Result<DatabaseConnection, StorageError> {
    std::fs::create_dir_all(state_dir).map_err(|source| StorageError::Io {
        path: state_dir.to_path_buf(),
        source,
    })?;
    Ok(connect_and_migrate(&database_url(state_dir)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn configure_sqlite_runs_all_pragmas() {
        let exec = || MockExecResult {
            rows_affected: 0,
            last_insert_id: 0,
        };
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([exec(), exec(), exec()])
            .into_connection();

        configure_sqlite(&db)
            .await
            .expect("mock sqlite pragma execs should succeed");
    }

    #[tokio::test]
    async fn connect_returns_error_for_invalid_database_url() {
        let err = connect("this-is-not-a-db-url")
            .await
            .expect_err("invalid URL should error");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn database_url_points_into_state_dir() {
        let url = database_url(Path::new("/repo/.git/chronosync"));
        assert_eq!(url, "sqlite:///repo/.git/chronosync/chronosync.db?mode=rwc");
    }

    #[cfg(feature = "migrate")]
    #[tokio::test]
    async fn open_state_creates_directory_and_database() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("nested").join("chronosync");
        let db = open_state(&state_dir).await.unwrap();
        drop(db);
        assert!(state_dir.join(DATABASE_FILE_NAME).exists());
    }
}
