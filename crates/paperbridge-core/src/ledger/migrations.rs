//! Versioned migrations for the ledger database.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL), (2, schema::MIGRATION_V2_SQL)];

/// Read `PRAGMA user_version` as `u32`.
///
/// # Errors
///
/// Returns an error if the query fails or the stored value is negative.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply every migration newer than `user_version`, one transaction each.
///
/// # Errors
///
/// Returns an error if any migration fails; earlier migrations stay applied.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let start = current_schema_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|(version, _)| *version > start);

    let mut applied = start;
    for &(version, sql) in pending {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(version))?;
        tx.execute(
            "UPDATE ledger_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(version)],
        )?;
        tx.commit()?;
        tracing::debug!(version, "applied ledger migration");
        applied = version;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::{LATEST_SCHEMA_VERSION, current_schema_version, migrate};
    use crate::ledger::schema;
    use rusqlite::{Connection, params};

    fn has_object(conn: &Connection, kind: &str, name: &str) -> rusqlite::Result<bool> {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = ?1 AND name = ?2",
            params![kind, name],
            |row| row.get(0),
        )
    }

    #[test]
    fn fresh_database_reaches_latest() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        let version = migrate(&mut conn)?;

        assert_eq!(version, LATEST_SCHEMA_VERSION);
        assert_eq!(current_schema_version(&conn)?, version);
        assert!(has_object(&conn, "table", "delivery_ledger")?);
        assert!(has_object(&conn, "table", "ledger_meta")?);
        for index in schema::REQUIRED_INDEXES {
            assert!(
                has_object(&conn, "index", index)?,
                "index {index} not created"
            );
        }
        Ok(())
    }

    #[test]
    fn second_run_applies_nothing() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        migrate(&mut conn)?;
        let again = migrate(&mut conn)?;

        assert_eq!(again, LATEST_SCHEMA_VERSION);

        let meta_rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM ledger_meta", [], |row| row.get(0))?;
        assert_eq!(meta_rows, 1);
        Ok(())
    }

    #[test]
    fn migrate_upgrades_from_v1_keeping_rows() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::MIGRATION_V1_SQL)?;
        conn.pragma_update(None, "user_version", 1_i64)?;
        conn.execute(
            "INSERT INTO delivery_ledger (paper_id, issue_number, recorded_at_us)
             VALUES ('P1', 4, 10)",
            [],
        )?;

        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);

        let rows: i64 =
            conn.query_row("SELECT COUNT(*) FROM delivery_ledger", [], |row| row.get(0))?;
        assert_eq!(rows, 1);
        let stored: i64 = conn.query_row(
            "SELECT schema_version FROM ledger_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(stored, i64::from(LATEST_SCHEMA_VERSION));
        Ok(())
    }
}
