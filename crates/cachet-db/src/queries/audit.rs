use anyhow::Result;
use rusqlite::Connection;

#[allow(clippy::too_many_arguments)]
pub fn insert(
    conn: &Connection,
    user_id: Option<&str>,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    success: bool,
    error_message: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (user_id, action, resource_type, resource_id,
         ip_address, user_agent, success, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            user_id,
            action,
            resource_type,
            resource_id,
            ip_address,
            user_agent,
            success,
            error_message,
        ],
    )?;
    Ok(())
}

/// Retention cleanup: drop audit rows older than the cutoff.
pub fn delete_before(conn: &Connection, cutoff: &str) -> Result<usize> {
    let n = conn.execute("DELETE FROM audit_log WHERE created_at < ?1", [cutoff])?;
    Ok(n)
}
