//! Best-effort audit sink. A failed append must never abort the operation
//! that triggered it; failures are logged locally and swallowed.

use std::sync::Arc;

use cachet_db::{Database, queries};
use cachet_types::api::ClientInfo;
use tracing::warn;

pub struct AuditEvent<'a> {
    pub user_id: Option<&'a str>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<&'a str>,
    pub success: bool,
    pub error: Option<&'a str>,
}

pub struct Audit {
    db: Arc<Database>,
}

impl Audit {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn record(&self, event: AuditEvent, client: &ClientInfo) {
        let res: anyhow::Result<()> = self.db.with_conn(|conn| {
            queries::audit::insert(
                conn,
                event.user_id,
                event.action,
                event.resource_type,
                event.resource_id,
                client.ip.as_deref(),
                client.user_agent.as_deref(),
                event.success,
                event.error,
            )
        });
        if let Err(e) = res {
            warn!("Audit write failed for {}: {}", event.action, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_row() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let audit = Audit::new(db.clone());

        audit.record(
            AuditEvent {
                user_id: None,
                action: "share.download",
                resource_type: "share",
                resource_id: Some("s1"),
                success: true,
                error: None,
            },
            &ClientInfo::default(),
        );

        let count: i64 = db
            .with_conn(|conn| -> anyhow::Result<i64> {
                Ok(conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
