use include_dir::{include_dir, Dir};
use tracing::debug;

use crate::{
    connection::Database,
    error::{DbError, Result},
};

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

struct Migration {
    version: i32,
    sql: String,
}

fn load_migrations() -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();

    for entry in MIGRATIONS_DIR.files() {
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) == Some("sql") {
            let filename = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| DbError::MigrationError("Invalid filename".into()))?;

            if !filename.starts_with('V') {
                continue;
            }

            let parts: Vec<&str> = filename[1..].splitn(2, '_').collect();
            if parts.len() != 2 {
                continue;
            }

            let version = parts[0].parse::<i32>().map_err(|_| {
                DbError::MigrationError(format!("Invalid version number in filename: {filename}"))
            })?;

            let sql = entry
                .contents_utf8()
                .ok_or_else(|| DbError::MigrationError(format!("Non-UTF8 migration: {filename}")))?
                .to_string();

            migrations.push(Migration { version, sql });
        }
    }

    migrations.sort_by_key(|m| m.version);

    Ok(migrations)
}

/// Applies all pending schema migrations, each in its own transaction.
///
/// The applied version is tracked via `PRAGMA user_version`.
pub fn migrate(db: &Database) -> Result<()> {
    let migrations = load_migrations()?;

    let mut conn = db.conn.lock()?;
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for migration in migrations.iter().filter(|m| m.version > current_version) {
        let tx = conn.transaction()?;
        tx.execute_batch(&migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        debug!(version = migration.version, "applied schema migration");
    }

    Ok(())
}
