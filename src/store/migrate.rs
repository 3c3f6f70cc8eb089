use rusqlite::{Connection, OptionalExtension};

use super::StoreError;

/// Embedded SQL migration with version, direction, and content.
struct Migration {
    version: u32,
    up_sql: &'static str,
    down_sql: &'static str,
}

/// All embedded migrations, ordered by version.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up_sql: include_str!("sql/001_init.up.sql"),
    down_sql: include_str!("sql/001_init.down.sql"),
}];

/// Ensures the schema_migrations tracking table exists.
fn ensure_migrations_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER NOT NULL,
            dirty   INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Returns the current migration version and dirty state.
fn current_version(conn: &Connection) -> Result<(u32, bool), StoreError> {
    let row: Option<(u32, u8)> = conn
        .query_row(
            "SELECT version, dirty FROM schema_migrations LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(match row {
        Some((version, dirty)) => (version, dirty != 0),
        None => (0, false),
    })
}

/// Sets the migration version in the tracking table.
fn set_version(conn: &Connection, version: u32, dirty: bool) -> Result<(), StoreError> {
    conn.execute("DELETE FROM schema_migrations", [])?;
    conn.execute(
        "INSERT INTO schema_migrations (version, dirty) VALUES (?1, ?2)",
        rusqlite::params![version, dirty as u8],
    )?;
    Ok(())
}

/// Applies all pending forward migrations. Returns the number applied.
pub fn up(conn: &Connection) -> Result<u32, StoreError> {
    ensure_migrations_table(conn)?;

    let (current, dirty) = current_version(conn)?;

    if dirty {
        return Err(StoreError::Migration(format!(
            "migration version {current} is dirty, manual intervention required"
        )));
    }

    let mut applied = 0u32;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }

        tracing::info!(version = migration.version, "applying migration");

        // Mark as dirty before applying.
        set_version(conn, migration.version, true)?;

        conn.execute_batch(migration.up_sql)?;

        // Mark as clean.
        set_version(conn, migration.version, false)?;

        applied += 1;
    }

    if applied == 0 {
        tracing::debug!(version = current, "no pending migrations");
    } else {
        let (version, _) = current_version(conn)?;
        tracing::info!(version, applied, "migrations completed");
    }

    Ok(applied)
}

/// Rolls back the last applied migration.
pub fn down(conn: &Connection) -> Result<(), StoreError> {
    ensure_migrations_table(conn)?;

    let (current, _) = current_version(conn)?;

    if current == 0 {
        tracing::info!("no migrations to roll back");
        return Ok(());
    }

    let migration = MIGRATIONS
        .iter()
        .find(|m| m.version == current)
        .ok_or_else(|| {
            StoreError::Migration(format!("migration version {current} not found"))
        })?;

    tracing::info!(version = current, "rolling back migration");

    set_version(conn, current, true)?;

    conn.execute_batch(migration.down_sql)?;

    let prev = MIGRATIONS
        .iter()
        .filter(|m| m.version < current)
        .map(|m| m.version)
        .max()
        .unwrap_or(0);

    if prev == 0 {
        conn.execute("DELETE FROM schema_migrations", [])?;
    } else {
        set_version(conn, prev, false)?;
    }

    tracing::info!(version = prev, "rollback completed");

    Ok(())
}

/// Returns the current migration version and dirty flag.
pub fn status(conn: &Connection) -> Result<(u32, bool), StoreError> {
    ensure_migrations_table(conn)?;
    current_version(conn)
}
