use crate::models::SessionRow;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const COLUMNS: &str =
    "id, user_id, token_hash, expires_at, ip_address, user_agent, last_activity, created_at";

fn map_session(row: &Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        expires_at: row.get(3)?,
        ip_address: row.get(4)?,
        user_agent: row.get(5)?,
        last_activity: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn insert(conn: &Connection, session: &SessionRow) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, ip_address, user_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            session.id,
            session.user_id,
            session.token_hash,
            session.expires_at,
            session.ip_address,
            session.user_agent,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<SessionRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
            [id],
            map_session,
        )
        .optional()?;
    Ok(row)
}

pub fn ids_for_user(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM sessions WHERE user_id = ?1")?;
    let rows = stmt
        .query_map([user_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn touch(conn: &Connection, id: &str, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
        [now, id],
    )?;
    Ok(())
}

pub fn delete_by_id(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
    Ok(())
}

pub fn delete_all_for_user(conn: &Connection, user_id: &str) -> Result<usize> {
    let n = conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?;
    Ok(n)
}

/// Prune rows past their expiry; run by the background cleanup loop.
pub fn delete_expired(conn: &Connection, now: &str) -> Result<usize> {
    let n = conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now])?;
    Ok(n)
}
