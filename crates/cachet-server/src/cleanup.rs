//! Background maintenance: expired-session pruning and audit-log retention.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use cachet_core::auth::AuthManager;
use cachet_db::{Database, queries, to_sql_datetime};

pub async fn run_cleanup_loop(
    auth: Arc<AuthManager>,
    db: Arc<Database>,
    audit_retention_days: i64,
    interval_secs: u64,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;

        match auth.prune_expired_sessions() {
            Ok(0) => {}
            Ok(n) => info!("Pruned {} expired sessions", n),
            Err(e) => warn!("Session pruning failed: {}", e),
        }

        let cutoff = to_sql_datetime(Utc::now() - chrono::Duration::days(audit_retention_days));
        let res: anyhow::Result<usize> =
            db.with_conn(|conn| queries::audit::delete_before(conn, &cutoff));
        match res {
            Ok(0) => {}
            Ok(n) => info!("Dropped {} audit rows older than {} days", n, audit_retention_days),
            Err(e) => warn!("Audit retention cleanup failed: {}", e),
        }
    }
}
