//! Schema migrations for the SQLite history.
//!
//! The schema version is kept in SQLite's `user_version` pragma. Entry `n`
//! of [`MIGRATIONS`] upgrades a database from version `n` to `n + 1`.

use rusqlite::Connection;

use crate::error::{HistoryError, Result};

const V1_MESSAGES: &str = r#"
    CREATE TABLE history_messages (
        channel_id TEXT NOT NULL,
        message_id TEXT NOT NULL,
        sender_id TEXT NOT NULL,
        lamport_timestamp INTEGER NOT NULL,
        causal_history BLOB NOT NULL,     -- CBOR array of history entries
        bloom_filter BLOB,
        content BLOB NOT NULL,
        retrieval_hint BLOB,
        stored_at INTEGER NOT NULL,       -- local time of insertion (Unix ms)

        PRIMARY KEY (channel_id, message_id)
    );

    CREATE INDEX idx_history_order
        ON history_messages(channel_id, lamport_timestamp, message_id);
"#;

/// Lamport timestamps are stored shifted by `i64::MIN` so the full `u64`
/// range fits an SQLite INTEGER and still sorts in order.
const V2_SHIFTED_LAMPORT: &str = r#"
    UPDATE history_messages
        SET lamport_timestamp = lamport_timestamp - 9223372036854775807 - 1;
"#;

/// Schema upgrades, oldest first.
pub const MIGRATIONS: &[&str] = &[V1_MESSAGES, V2_SHIFTED_LAMPORT];

pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Read the schema version of `conn`. Zero for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Bring the schema up to [`CURRENT_VERSION`] in one transaction.
///
/// Safe to call on every open. Fails on a database written by a newer
/// schema.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(HistoryError::Migration(format!(
            "database schema {} is newer than supported {}",
            current, CURRENT_VERSION
        )));
    }
    if current == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        tx.execute_batch(sql)?;
        tracing::info!("Applied history schema version {}", index + 1);
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);

        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
        assert!(table_exists(&conn, "history_messages"));
    }

    #[test]
    fn test_migrate_twice() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();

        let err = migrate(&mut conn).unwrap_err();
        assert!(matches!(err, HistoryError::Migration(_)));
        assert!(!table_exists(&conn, "history_messages"));
    }

    #[test]
    fn test_v1_rows_shifted_on_upgrade() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(V1_MESSAGES).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO history_messages
                (channel_id, message_id, sender_id, lamport_timestamp, causal_history,
                 content, stored_at)
             VALUES ('c', 'm', 's', 5, x'80', x'00', 0)",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        let stored: i64 = conn
            .query_row("SELECT lamport_timestamp FROM history_messages", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(stored, i64::MIN + 5);
    }
}
