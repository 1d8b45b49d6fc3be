//! Storage-accounting ledger: the protocol every operation that changes a
//! file's encrypted on-disk footprint must follow, inside the same
//! transaction as the content change itself.
//!
//! Check-then-apply runs under the writer transaction, so two concurrent
//! uploads cannot both pass the quota check against a stale read.

use rusqlite::Connection;

use cachet_db::queries::users;

use crate::error::{ServiceError, ServiceResult};

/// Charge `bytes` against the owner's quota. Rejects with `QuotaExceeded`
/// when the new total would overshoot; never partially applies.
pub fn charge(conn: &Connection, user_id: &str, bytes: i64) -> ServiceResult<()> {
    debug_assert!(bytes >= 0);
    let (used, quota) = users::storage_state(conn, user_id)?
        .ok_or_else(ServiceError::not_found)?;
    if used + bytes > quota {
        return Err(ServiceError::QuotaExceeded);
    }
    users::add_storage_used(conn, user_id, bytes)?;
    Ok(())
}

/// Release `bytes` back to the owner. Clamped at zero in SQL so corrupted
/// data cannot drive the counter negative.
pub fn release(conn: &Connection, user_id: &str, bytes: i64) -> ServiceResult<()> {
    debug_assert!(bytes >= 0);
    users::add_storage_used(conn, user_id, -bytes)?;
    Ok(())
}

/// Advisory pre-check used before expensive side effects (blob upload).
/// The authoritative check is still `charge` inside the transaction.
pub fn precheck(conn: &Connection, user_id: &str, bytes: i64) -> ServiceResult<()> {
    let (used, quota) = users::storage_state(conn, user_id)?
        .ok_or_else(ServiceError::not_found)?;
    if used + bytes > quota {
        return Err(ServiceError::QuotaExceeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_db::Database;
    use cachet_db::models::UserRow;
    use std::sync::Arc;

    fn seeded_db(quota: i64) -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user = UserRow {
            id: "u1".into(),
            email: "a@b.c".into(),
            username: "alice".into(),
            password_hash: "x".into(),
            totp_secret_enc: None,
            totp_secret_nonce: None,
            master_key_envelope: "mk".into(),
            public_key: "pk".into(),
            private_key_envelope: "sk".into(),
            storage_quota: quota,
            storage_used: 0,
            is_active: true,
            last_login: None,
            created_at: String::new(),
        };
        db.with_conn(|conn| users::insert(conn, &user)).unwrap();
        db
    }

    fn used(db: &Database) -> i64 {
        db.with_conn(|conn| -> anyhow::Result<i64> {
            Ok(users::storage_state(conn, "u1")?.unwrap().0)
        })
        .unwrap()
    }

    #[test]
    fn charge_within_quota() {
        let db = seeded_db(1000);
        db.with_tx(|tx| charge(tx, "u1", 600)).unwrap();
        assert_eq!(used(&db), 600);
    }

    #[test]
    fn overshoot_rejected_without_partial_charge() {
        let db = seeded_db(1000);
        db.with_tx(|tx| charge(tx, "u1", 600)).unwrap();

        let err = db.with_tx(|tx| charge(tx, "u1", 500)).unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded));
        assert_eq!(used(&db), 600);
    }

    #[test]
    fn release_clamps_at_zero() {
        let db = seeded_db(1000);
        db.with_tx(|tx| charge(tx, "u1", 100)).unwrap();
        db.with_tx(|tx| release(tx, "u1", 500)).unwrap();
        assert_eq!(used(&db), 0);
    }

    #[test]
    fn exact_fit_allowed() {
        let db = seeded_db(1000);
        db.with_tx(|tx| charge(tx, "u1", 1000)).unwrap();
        assert_eq!(used(&db), 1000);
        let err = db.with_tx(|tx| charge(tx, "u1", 1)).unwrap_err();
        assert!(matches!(err, ServiceError::QuotaExceeded));
    }
}
