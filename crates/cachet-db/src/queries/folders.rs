use crate::models::FolderRow;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const COLUMNS: &str =
    "id, user_id, parent_folder_id, name_enc, name_iv, is_deleted, created_at, updated_at";

fn map_folder(row: &Row) -> rusqlite::Result<FolderRow> {
    Ok(FolderRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        parent_folder_id: row.get(2)?,
        name_enc: row.get(3)?,
        name_iv: row.get(4)?,
        is_deleted: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub fn insert(conn: &Connection, folder: &FolderRow) -> Result<()> {
    conn.execute(
        "INSERT INTO folders (id, user_id, parent_folder_id, name_enc, name_iv)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            folder.id,
            folder.user_id,
            folder.parent_folder_id,
            folder.name_enc,
            folder.name_iv,
        ],
    )?;
    Ok(())
}

pub fn find_by_id_owner(conn: &Connection, id: &str, owner: &str) -> Result<Option<FolderRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM folders WHERE id = ?1 AND user_id = ?2"),
            [id, owner],
            map_folder,
        )
        .optional()?;
    Ok(row)
}

/// Direct child folders; `only_active` excludes soft-deleted rows.
pub fn children(
    conn: &Connection,
    owner: &str,
    parent: Option<&str>,
    only_active: bool,
) -> Result<Vec<FolderRow>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM folders
         WHERE user_id = ?1
           AND ((?2 IS NULL AND parent_folder_id IS NULL) OR parent_folder_id = ?2){}",
        if only_active { " AND is_deleted = 0" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![owner, parent], map_folder)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Any non-deleted child file or subfolder? Gates non-cascade deletion.
pub fn has_active_children(conn: &Connection, owner: &str, folder_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM folders
              WHERE user_id = ?1 AND parent_folder_id = ?2 AND is_deleted = 0)
          + (SELECT COUNT(*) FROM files
              WHERE user_id = ?1 AND parent_folder_id = ?2 AND is_deleted = 0)",
        [owner, folder_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Every non-deleted folder the user owns, for building the tree in one pass.
pub fn list_all_active(conn: &Connection, owner: &str) -> Result<Vec<FolderRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM folders WHERE user_id = ?1 AND is_deleted = 0"
    ))?;
    let rows = stmt
        .query_map([owner], map_folder)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_name(conn: &Connection, id: &str, name_enc: &[u8], name_iv: &[u8], now: &str) -> Result<()> {
    conn.execute(
        "UPDATE folders SET name_enc = ?1, name_iv = ?2, updated_at = ?3 WHERE id = ?4",
        rusqlite::params![name_enc, name_iv, now, id],
    )?;
    Ok(())
}

pub fn update_parent(conn: &Connection, id: &str, parent: Option<&str>, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE folders SET parent_folder_id = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![parent, now, id],
    )?;
    Ok(())
}

pub fn set_deleted(conn: &Connection, id: &str, deleted: bool, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE folders SET is_deleted = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![deleted, now, id],
    )?;
    Ok(())
}

pub fn delete_row(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM folders WHERE id = ?1", [id])?;
    Ok(())
}
