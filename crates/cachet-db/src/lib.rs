pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Timestamp format matching SQLite's `datetime('now')`, so rows written
/// from Rust and rows written by SQL defaults compare correctly as text.
const SQL_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn to_sql_datetime(dt: DateTime<Utc>) -> String {
    dt.format(SQL_DATETIME_FMT).to_string()
}

pub fn now_sql() -> String {
    to_sql_datetime(Utc::now())
}

pub fn parse_sql_datetime(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, SQL_DATETIME_FMT)
        .map_err(|e| anyhow!("bad timestamp {:?}: {}", s, e))?;
    Ok(Utc.from_utc_datetime(&naive))
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| E::from(anyhow!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`
    /// (or on panic, via the transaction's drop guard).
    pub fn with_tx<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Transaction) -> std::result::Result<T, E>,
        E: From<anyhow::Error>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| E::from(anyhow!("DB lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| E::from(anyhow::Error::from(e)))?;
        let out = f(&tx)?;
        tx.commit().map_err(|e| E::from(anyhow::Error::from(e)))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_datetime_roundtrip() {
        let now = Utc::now();
        let s = to_sql_datetime(now);
        let back = parse_sql_datetime(&s).unwrap();
        assert_eq!(back.timestamp(), now.timestamp());
    }

    #[test]
    fn tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let res: anyhow::Result<()> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO users (id, email, username, password_hash,
                 master_key_envelope, public_key, private_key_envelope, storage_quota)
                 VALUES ('u1', 'a@b.c', 'alice', 'x', 'mk', 'pk', 'sk', 1000)",
                [],
            )?;
            Err(anyhow!("boom"))
        });
        assert!(res.is_err());

        let count: i64 = db
            .with_conn(|conn| -> anyhow::Result<i64> {
                Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
