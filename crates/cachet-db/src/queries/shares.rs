use crate::models::ShareRow;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, file_id, owner_id, share_token, content_key_envelope, \
     password_hash, expires_at, max_downloads, download_count, is_active, \
     last_accessed, created_at";

fn map_share(row: &Row) -> rusqlite::Result<ShareRow> {
    Ok(ShareRow {
        id: row.get(0)?,
        file_id: row.get(1)?,
        owner_id: row.get(2)?,
        share_token: row.get(3)?,
        content_key_envelope: row.get(4)?,
        password_hash: row.get(5)?,
        expires_at: row.get(6)?,
        max_downloads: row.get(7)?,
        download_count: row.get(8)?,
        is_active: row.get(9)?,
        last_accessed: row.get(10)?,
        created_at: row.get(11)?,
    })
}

pub fn insert(conn: &Connection, share: &ShareRow) -> Result<()> {
    conn.execute(
        "INSERT INTO shares (id, file_id, owner_id, share_token, content_key_envelope,
         password_hash, expires_at, max_downloads)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            share.id,
            share.file_id,
            share.owner_id,
            share.share_token,
            share.content_key_envelope,
            share.password_hash,
            share.expires_at,
            share.max_downloads,
        ],
    )?;
    Ok(())
}

pub fn find_by_token(conn: &Connection, token: &str) -> Result<Option<ShareRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM shares WHERE share_token = ?1"),
            [token],
            map_share,
        )
        .optional()?;
    Ok(row)
}

pub fn find_by_id_owner(conn: &Connection, id: &str, owner: &str) -> Result<Option<ShareRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM shares WHERE id = ?1 AND owner_id = ?2"),
            [id, owner],
            map_share,
        )
        .optional()?;
    Ok(row)
}

pub fn list_for_owner(conn: &Connection, owner: &str) -> Result<Vec<ShareRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM shares WHERE owner_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map([owner], map_share)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn deactivate(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("UPDATE shares SET is_active = 0 WHERE id = ?1", [id])?;
    Ok(())
}

pub fn set_active(conn: &Connection, id: &str, active: bool) -> Result<()> {
    conn.execute(
        "UPDATE shares SET is_active = ?1 WHERE id = ?2",
        rusqlite::params![active, id],
    )?;
    Ok(())
}

pub fn set_password_hash(conn: &Connection, id: &str, hash: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE shares SET password_hash = ?1 WHERE id = ?2",
        rusqlite::params![hash, id],
    )?;
    Ok(())
}

pub fn set_expires_at(conn: &Connection, id: &str, expires_at: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE shares SET expires_at = ?1 WHERE id = ?2",
        rusqlite::params![expires_at, id],
    )?;
    Ok(())
}

pub fn set_max_downloads(conn: &Connection, id: &str, max: Option<i64>) -> Result<()> {
    conn.execute(
        "UPDATE shares SET max_downloads = ?1 WHERE id = ?2",
        rusqlite::params![max, id],
    )?;
    Ok(())
}

/// Consume one download slot, guarded by the limit in the same statement so
/// two concurrent downloads cannot both take the last slot. Returns false if
/// the limit was already reached.
pub fn try_increment_download(conn: &Connection, id: &str, now: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE shares
         SET download_count = download_count + 1, last_accessed = ?1
         WHERE id = ?2
           AND (max_downloads IS NULL OR download_count < max_downloads)",
        rusqlite::params![now, id],
    )?;
    Ok(changed == 1)
}

pub fn delete_row(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM shares WHERE id = ?1", [id])?;
    Ok(())
}
