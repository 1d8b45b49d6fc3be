use crate::models::{FileRow, FileVersionRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const COLUMNS: &str = "id, user_id, parent_folder_id, filename_enc, filename_iv, \
     content_key_envelope, file_size, encrypted_size, mime_type, storage_path, \
     file_hash, version, is_deleted, deleted_at, created_at, updated_at";

fn map_file(row: &Row) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        parent_folder_id: row.get(2)?,
        filename_enc: row.get(3)?,
        filename_iv: row.get(4)?,
        content_key_envelope: row.get(5)?,
        file_size: row.get(6)?,
        encrypted_size: row.get(7)?,
        mime_type: row.get(8)?,
        storage_path: row.get(9)?,
        file_hash: row.get(10)?,
        version: row.get(11)?,
        is_deleted: row.get(12)?,
        deleted_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

/// Sort keys for listings. Filenames are encrypted, so server-side sorting
/// is limited to plaintext columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSort {
    CreatedAt,
    UpdatedAt,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl FileSort {
    fn column(self) -> &'static str {
        match self {
            FileSort::CreatedAt => "created_at",
            FileSort::UpdatedAt => "updated_at",
            FileSort::Size => "encrypted_size",
        }
    }
}

impl SortDir {
    fn sql(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

pub fn insert(conn: &Connection, file: &FileRow) -> Result<()> {
    conn.execute(
        "INSERT INTO files (id, user_id, parent_folder_id, filename_enc, filename_iv,
         content_key_envelope, file_size, encrypted_size, mime_type, storage_path,
         file_hash, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            file.id,
            file.user_id,
            file.parent_folder_id,
            file.filename_enc,
            file.filename_iv,
            file.content_key_envelope,
            file.file_size,
            file.encrypted_size,
            file.mime_type,
            file.storage_path,
            file.file_hash,
            file.version,
        ],
    )?;
    Ok(())
}

/// Owner-scoped fetch, regardless of deletion state. Ownership filtering in
/// SQL keeps "not found" and "not yours" indistinguishable to callers.
pub fn find_by_id_owner(conn: &Connection, id: &str, owner: &str) -> Result<Option<FileRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM files WHERE id = ?1 AND user_id = ?2"),
            [id, owner],
            map_file,
        )
        .optional()?;
    Ok(row)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<FileRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
            [id],
            map_file,
        )
        .optional()?;
    Ok(row)
}

pub fn list(
    conn: &Connection,
    owner: &str,
    parent_folder_id: Option<&str>,
    sort: FileSort,
    dir: SortDir,
    limit: u32,
    offset: u32,
) -> Result<Vec<FileRow>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM files
         WHERE user_id = ?1 AND is_deleted = 0
           AND ((?2 IS NULL AND parent_folder_id IS NULL) OR parent_folder_id = ?2)
         ORDER BY {} {}
         LIMIT ?3 OFFSET ?4",
        sort.column(),
        dir.sql(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params![owner, parent_folder_id, limit, offset],
            map_file,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(conn: &Connection, owner: &str, parent_folder_id: Option<&str>) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM files
         WHERE user_id = ?1 AND is_deleted = 0
           AND ((?2 IS NULL AND parent_folder_id IS NULL) OR parent_folder_id = ?2)",
        rusqlite::params![owner, parent_folder_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Soft-deleted files, newest deletion first (the trash view).
pub fn list_deleted(conn: &Connection, owner: &str) -> Result<Vec<FileRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM files WHERE user_id = ?1 AND is_deleted = 1
         ORDER BY deleted_at DESC"
    ))?;
    let rows = stmt
        .query_map([owner], map_file)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Files inside one folder; `only_active` excludes soft-deleted rows.
pub fn list_in_folder(
    conn: &Connection,
    owner: &str,
    folder_id: &str,
    only_active: bool,
) -> Result<Vec<FileRow>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM files
         WHERE user_id = ?1 AND parent_folder_id = ?2{}",
        if only_active { " AND is_deleted = 0" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([owner, folder_id], map_file)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_by_hash(conn: &Connection, owner: &str, hash: &str) -> Result<Option<FileRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM files
                 WHERE user_id = ?1 AND file_hash = ?2 AND is_deleted = 0
                 LIMIT 1"
            ),
            [owner, hash],
            map_file,
        )
        .optional()?;
    Ok(row)
}

pub fn mark_deleted(conn: &Connection, id: &str, deleted_at: &str) -> Result<()> {
    conn.execute(
        "UPDATE files SET is_deleted = 1, deleted_at = ?1, updated_at = ?1 WHERE id = ?2",
        [deleted_at, id],
    )?;
    Ok(())
}

pub fn mark_restored(conn: &Connection, id: &str, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE files SET is_deleted = 0, deleted_at = NULL, updated_at = ?1 WHERE id = ?2",
        [now, id],
    )?;
    Ok(())
}

pub fn update_name(conn: &Connection, id: &str, name_enc: &[u8], name_iv: &[u8], now: &str) -> Result<()> {
    conn.execute(
        "UPDATE files SET filename_enc = ?1, filename_iv = ?2, updated_at = ?3 WHERE id = ?4",
        rusqlite::params![name_enc, name_iv, now, id],
    )?;
    Ok(())
}

pub fn update_parent(conn: &Connection, id: &str, parent: Option<&str>, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE files SET parent_folder_id = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![parent, now, id],
    )?;
    Ok(())
}

pub fn set_version(conn: &Connection, id: &str, version: i64, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE files SET version = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![version, now, id],
    )?;
    Ok(())
}

pub fn delete_row(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
    Ok(())
}

pub fn stats(conn: &Connection, owner: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM files WHERE user_id = ?1 AND is_deleted = 0",
        [owner],
        |r| r.get(0),
    )?;
    Ok(count)
}

// -- Versions --

fn map_version(row: &Row) -> rusqlite::Result<FileVersionRow> {
    Ok(FileVersionRow {
        file_id: row.get(0)?,
        version_number: row.get(1)?,
        storage_path: row.get(2)?,
        file_size: row.get(3)?,
        content_key_envelope: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn insert_version(conn: &Connection, v: &FileVersionRow) -> Result<()> {
    conn.execute(
        "INSERT INTO file_versions (file_id, version_number, storage_path, file_size, content_key_envelope)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            v.file_id,
            v.version_number,
            v.storage_path,
            v.file_size,
            v.content_key_envelope,
        ],
    )?;
    Ok(())
}

pub fn find_version(
    conn: &Connection,
    file_id: &str,
    version_number: i64,
) -> Result<Option<FileVersionRow>> {
    let row = conn
        .query_row(
            "SELECT file_id, version_number, storage_path, file_size, content_key_envelope, created_at
             FROM file_versions WHERE file_id = ?1 AND version_number = ?2",
            rusqlite::params![file_id, version_number],
            map_version,
        )
        .optional()?;
    Ok(row)
}

pub fn list_versions(conn: &Connection, file_id: &str) -> Result<Vec<FileVersionRow>> {
    let mut stmt = conn.prepare(
        "SELECT file_id, version_number, storage_path, file_size, content_key_envelope, created_at
         FROM file_versions WHERE file_id = ?1 ORDER BY version_number",
    )?;
    let rows = stmt
        .query_map([file_id], map_version)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn version_paths(conn: &Connection, file_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT storage_path FROM file_versions WHERE file_id = ?1")?;
    let rows = stmt
        .query_map([file_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
