use crate::models::UserRow;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, email, username, password_hash, totp_secret_enc, totp_secret_nonce, \
     master_key_envelope, public_key, private_key_envelope, \
     storage_quota, storage_used, is_active, last_login, created_at";

fn map_user(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        totp_secret_enc: row.get(4)?,
        totp_secret_nonce: row.get(5)?,
        master_key_envelope: row.get(6)?,
        public_key: row.get(7)?,
        private_key_envelope: row.get(8)?,
        storage_quota: row.get(9)?,
        storage_used: row.get(10)?,
        is_active: row.get(11)?,
        last_login: row.get(12)?,
        created_at: row.get(13)?,
    })
}

pub fn insert(conn: &Connection, user: &UserRow) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, email, username, password_hash,
         master_key_envelope, public_key, private_key_envelope,
         storage_quota, storage_used, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            user.id,
            user.email,
            user.username,
            user.password_hash,
            user.master_key_envelope,
            user.public_key,
            user.private_key_envelope,
            user.storage_quota,
            user.storage_used,
            user.is_active,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM users WHERE id = ?1"),
            [id],
            map_user,
        )
        .optional()?;
    Ok(row)
}

/// Lookup by email or username, for login.
pub fn find_by_identifier(conn: &Connection, identifier: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM users WHERE email = ?1 OR username = ?1"),
            [identifier],
            map_user,
        )
        .optional()?;
    Ok(row)
}

pub fn email_or_username_taken(conn: &Connection, email: &str, username: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE email = ?1 OR username = ?2",
        [email, username],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Current (used, quota) pair, read inside the same transaction as the
/// ledger update that depends on it.
pub fn storage_state(conn: &Connection, id: &str) -> Result<Option<(i64, i64)>> {
    let row = conn
        .query_row(
            "SELECT storage_used, storage_quota FROM users WHERE id = ?1",
            [id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

pub fn add_storage_used(conn: &Connection, id: &str, delta: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET storage_used = MAX(storage_used + ?1, 0) WHERE id = ?2",
        rusqlite::params![delta, id],
    )?;
    Ok(())
}

pub fn set_password_hash(conn: &Connection, id: &str, hash: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET password_hash = ?1 WHERE id = ?2",
        [hash, id],
    )?;
    Ok(())
}

pub fn set_last_login(conn: &Connection, id: &str, at: &str) -> Result<()> {
    conn.execute("UPDATE users SET last_login = ?1 WHERE id = ?2", [at, id])?;
    Ok(())
}

pub fn set_totp_secret(
    conn: &Connection,
    id: &str,
    sealed: Option<(&[u8], &[u8])>,
) -> Result<()> {
    match sealed {
        Some((enc, nonce)) => conn.execute(
            "UPDATE users SET totp_secret_enc = ?1, totp_secret_nonce = ?2 WHERE id = ?3",
            rusqlite::params![enc, nonce, id],
        )?,
        None => conn.execute(
            "UPDATE users SET totp_secret_enc = NULL, totp_secret_nonce = NULL WHERE id = ?1",
            [id],
        )?,
    };
    Ok(())
}
