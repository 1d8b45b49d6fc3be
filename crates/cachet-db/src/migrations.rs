use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                    TEXT PRIMARY KEY,
                email                 TEXT NOT NULL UNIQUE,
                username              TEXT NOT NULL UNIQUE,
                password_hash         TEXT NOT NULL,
                totp_secret_enc       BLOB,
                totp_secret_nonce     BLOB,
                master_key_envelope   TEXT NOT NULL,
                public_key            TEXT NOT NULL,
                private_key_envelope  TEXT NOT NULL,
                storage_quota         INTEGER NOT NULL,
                storage_used          INTEGER NOT NULL DEFAULT 0 CHECK (storage_used >= 0),
                is_active             INTEGER NOT NULL DEFAULT 1,
                last_login            TEXT,
                created_at            TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE folders (
                id                TEXT PRIMARY KEY,
                user_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                parent_folder_id  TEXT REFERENCES folders(id),
                name_enc          BLOB NOT NULL,
                name_iv           BLOB NOT NULL,
                is_deleted        INTEGER NOT NULL DEFAULT 0,
                created_at        TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_folders_parent
                ON folders(user_id, parent_folder_id, is_deleted);

            CREATE TABLE files (
                id                    TEXT PRIMARY KEY,
                user_id               TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                parent_folder_id      TEXT REFERENCES folders(id),
                filename_enc          BLOB NOT NULL,
                filename_iv           BLOB NOT NULL,
                content_key_envelope  TEXT NOT NULL,
                file_size             INTEGER NOT NULL,
                encrypted_size        INTEGER NOT NULL CHECK (encrypted_size > 0),
                mime_type             TEXT,
                storage_path          TEXT NOT NULL,
                file_hash             TEXT,
                version               INTEGER NOT NULL DEFAULT 1,
                is_deleted            INTEGER NOT NULL DEFAULT 0,
                deleted_at            TEXT,
                created_at            TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at            TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_files_parent
                ON files(user_id, parent_folder_id, is_deleted);
            CREATE INDEX idx_files_hash
                ON files(user_id, file_hash);

            CREATE TABLE file_versions (
                file_id               TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                version_number        INTEGER NOT NULL,
                storage_path          TEXT NOT NULL,
                file_size             INTEGER NOT NULL,
                content_key_envelope  TEXT NOT NULL,
                created_at            TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (file_id, version_number)
            );

            CREATE TABLE shares (
                id                    TEXT PRIMARY KEY,
                file_id               TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                owner_id              TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                share_token           TEXT NOT NULL UNIQUE,
                content_key_envelope  TEXT NOT NULL,
                password_hash         TEXT,
                expires_at            TEXT,
                max_downloads         INTEGER,
                download_count        INTEGER NOT NULL DEFAULT 0,
                is_active             INTEGER NOT NULL DEFAULT 1,
                last_accessed         TEXT,
                created_at            TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_shares_owner ON shares(owner_id);
            CREATE INDEX idx_shares_file ON shares(file_id);

            CREATE TABLE sessions (
                id             TEXT PRIMARY KEY,
                user_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token_hash     TEXT NOT NULL UNIQUE,
                expires_at     TEXT NOT NULL,
                ip_address     TEXT,
                user_agent     TEXT,
                last_activity  TEXT NOT NULL DEFAULT (datetime('now')),
                created_at     TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);

            CREATE TABLE audit_log (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        TEXT,
                action         TEXT NOT NULL,
                resource_type  TEXT NOT NULL,
                resource_id    TEXT,
                ip_address     TEXT,
                user_agent     TEXT,
                success        INTEGER NOT NULL,
                error_message  TEXT,
                created_at     TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_audit_user ON audit_log(user_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    Ok(())
}
