//! Session and two-factor authentication manager.
//!
//! Tokens are JWTs bound to a revocable server-side session row; validity is
//! always cross-checked against that row, so a cryptographically valid but
//! revoked token is rejected. The session cache is a pure accelerator — a
//! miss, an eviction, or a stale entry only costs a repository lookup.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use cachet_db::models::{SessionRow, UserRow};
use cachet_db::{Database, now_sql, parse_sql_datetime, queries, to_sql_datetime};
use cachet_types::api::{Claims, ClientInfo};

use crate::audit::{Audit, AuditEvent};
use crate::cache::TtlCache;
use crate::error::{ServiceError, ServiceResult};
use crate::password;
use crate::sealed::SecretSealer;
use crate::totp;

const MIN_PASSWORD_LEN: usize = 8;
const SESSION_CACHE_CAPACITY: usize = 4096;
const SESSION_CACHE_TTL: StdDuration = StdDuration::from_secs(30);

pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_ttl: Duration,
    pub default_quota_bytes: i64,
    pub totp_issuer: String,
}

/// Key material the client generated and wrapped before registration;
/// the server stores these envelopes verbatim and never opens them.
pub struct KeyEnvelopes {
    pub master_key_envelope: String,
    pub public_key: String,
    pub private_key_envelope: String,
}

#[derive(Clone)]
struct CachedSession {
    user_id: Uuid,
    token_hash: String,
}

/// Identity attached to a validated request.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Debug)]
pub struct IssuedSession {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Session(IssuedSession),
    /// Credentials were valid but the account has TOTP enabled and no code
    /// was supplied.
    TotpRequired,
}

pub struct AuthManager {
    db: Arc<Database>,
    audit: Arc<Audit>,
    sealer: SecretSealer,
    config: AuthConfig,
    session_cache: TtlCache<Uuid, CachedSession>,
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl AuthManager {
    pub fn new(db: Arc<Database>, audit: Arc<Audit>, sealer: SecretSealer, config: AuthConfig) -> Self {
        Self {
            db,
            audit,
            sealer,
            config,
            session_cache: TtlCache::new(SESSION_CACHE_CAPACITY, SESSION_CACHE_TTL),
        }
    }

    // -- Registration / login --

    pub fn register(
        &self,
        email: &str,
        username: &str,
        password_plain: &str,
        keys: KeyEnvelopes,
        client: &ClientInfo,
    ) -> ServiceResult<IssuedSession> {
        if !email.contains('@') || email.len() > 255 {
            return Err(ServiceError::Validation("invalid email address".into()));
        }
        if username.len() < 3 || username.len() > 32 {
            return Err(ServiceError::Validation(
                "username must be 3-32 characters".into(),
            ));
        }
        if password_plain.len() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let password_hash = password::hash(password_plain)?;
        let user_id = Uuid::new_v4();
        let user = UserRow {
            id: user_id.to_string(),
            email: email.to_string(),
            username: username.to_string(),
            password_hash,
            totp_secret_enc: None,
            totp_secret_nonce: None,
            master_key_envelope: keys.master_key_envelope,
            public_key: keys.public_key,
            private_key_envelope: keys.private_key_envelope,
            storage_quota: self.config.default_quota_bytes,
            storage_used: 0,
            is_active: true,
            last_login: None,
            created_at: String::new(),
        };

        // Uniqueness is checked inside the same transaction as the insert so
        // a racing duplicate surfaces as Conflict, not a constraint error.
        let session = self.db.with_tx(|tx| {
            if queries::users::email_or_username_taken(tx, email, username)? {
                return Err(ServiceError::Conflict(
                    "email or username already in use".into(),
                ));
            }
            queries::users::insert(tx, &user)?;
            self.issue_session(tx, user_id, client)
        })?;

        info!("User {} registered", username);
        self.audit.record(
            AuditEvent {
                user_id: Some(&user.id),
                action: "auth.register",
                resource_type: "user",
                resource_id: Some(&user.id),
                success: true,
                error: None,
            },
            client,
        );
        Ok(session)
    }

    pub fn login(
        &self,
        identifier: &str,
        password_plain: &str,
        totp_code: Option<&str>,
        client: &ClientInfo,
    ) -> ServiceResult<LoginOutcome> {
        let user = self
            .db
            .with_conn(|conn| queries::users::find_by_identifier(conn, identifier))
            .map_err(ServiceError::Internal)?;

        // A missing user, wrong password, and inactive account are all the
        // same generic failure to the caller.
        let Some(user) = user else {
            self.audit_login_failure(None, client);
            return Err(ServiceError::invalid_credentials());
        };
        if !user.is_active || !password::verify(password_plain, &user.password_hash) {
            self.audit_login_failure(Some(&user.id), client);
            return Err(ServiceError::invalid_credentials());
        }

        if let Some(sealed) = user.totp_secret_enc.as_deref() {
            let Some(code) = totp_code else {
                return Ok(LoginOutcome::TotpRequired);
            };
            let nonce = user.totp_secret_nonce.as_deref().unwrap_or_default();
            let secret = self.sealer.open(sealed, nonce)?;
            if !totp::verify(&secret, code) {
                self.audit_login_failure(Some(&user.id), client);
                return Err(ServiceError::Auth("invalid two-factor code".into()));
            }
        }

        let user_id: Uuid = user
            .id
            .parse()
            .map_err(|_| ServiceError::Internal(anyhow!("malformed user id {}", user.id)))?;

        let session = self.db.with_tx(|tx| {
            queries::users::set_last_login(tx, &user.id, &now_sql())?;
            self.issue_session(tx, user_id, client)
        })?;

        self.audit.record(
            AuditEvent {
                user_id: Some(&user.id),
                action: "auth.login",
                resource_type: "user",
                resource_id: Some(&user.id),
                success: true,
                error: None,
            },
            client,
        );
        Ok(LoginOutcome::Session(session))
    }

    fn audit_login_failure(&self, user_id: Option<&str>, client: &ClientInfo) {
        self.audit.record(
            AuditEvent {
                user_id,
                action: "auth.login",
                resource_type: "user",
                resource_id: user_id,
                success: false,
                error: Some("invalid credentials"),
            },
            client,
        );
    }

    fn issue_session(
        &self,
        conn: &rusqlite::Connection,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> ServiceResult<IssuedSession> {
        let session_id = Uuid::new_v4();
        let expires_at = Utc::now() + self.config.session_ttl;

        let claims = Claims {
            sub: user_id,
            sid: session_id,
            exp: expires_at.timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::Internal(anyhow!("token encode failed: {}", e)))?;

        let row = SessionRow {
            id: session_id.to_string(),
            user_id: user_id.to_string(),
            token_hash: token_hash(&token),
            expires_at: to_sql_datetime(expires_at),
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            last_activity: String::new(),
            created_at: String::new(),
        };
        queries::sessions::insert(conn, &row).map_err(ServiceError::Internal)?;

        Ok(IssuedSession {
            user_id,
            session_id,
            token,
            expires_at,
        })
    }

    // -- Session validation / revocation --

    pub fn validate_session(&self, token: &str) -> ServiceResult<AuthContext> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| ServiceError::Auth("invalid session".into()))?
        .claims;

        let presented_hash = token_hash(token);

        if let Some(cached) = self.session_cache.get(&claims.sid) {
            if cached.user_id == claims.sub && cached.token_hash == presented_hash {
                self.touch_session(&claims.sid.to_string());
                return Ok(AuthContext {
                    user_id: claims.sub,
                    session_id: claims.sid,
                });
            }
            // Desync between cache and token — fall through to the
            // authoritative store.
            self.session_cache.remove(&claims.sid);
        }

        let sid = claims.sid.to_string();
        let row = self
            .db
            .with_conn(|conn| queries::sessions::find_by_id(conn, &sid))
            .map_err(ServiceError::Internal)?
            .ok_or_else(|| ServiceError::Auth("invalid session".into()))?;

        let expires_at = parse_sql_datetime(&row.expires_at)?;
        if expires_at <= Utc::now() {
            // Expired sessions are deleted, not just rejected.
            self.db
                .with_conn(|conn| queries::sessions::delete_by_id(conn, &sid))
                .map_err(ServiceError::Internal)?;
            self.session_cache.remove(&claims.sid);
            return Err(ServiceError::Auth("invalid session".into()));
        }
        if row.token_hash != presented_hash || row.user_id != claims.sub.to_string() {
            // Token/session desync: reject rather than trust either side.
            return Err(ServiceError::Auth("invalid session".into()));
        }

        self.touch_session(&sid);
        self.session_cache.put(
            claims.sid,
            CachedSession {
                user_id: claims.sub,
                token_hash: presented_hash,
            },
        );
        Ok(AuthContext {
            user_id: claims.sub,
            session_id: claims.sid,
        })
    }

    fn touch_session(&self, session_id: &str) {
        // Activity bumps are advisory; a failed write is not a reason to
        // reject the request.
        let res: anyhow::Result<()> = self
            .db
            .with_conn(|conn| queries::sessions::touch(conn, session_id, &now_sql()));
        if let Err(e) = res {
            warn!("Failed to bump session activity: {}", e);
        }
    }

    pub fn logout(&self, ctx: AuthContext, client: &ClientInfo) -> ServiceResult<()> {
        let sid = ctx.session_id.to_string();
        self.db
            .with_conn(|conn| queries::sessions::delete_by_id(conn, &sid))
            .map_err(ServiceError::Internal)?;
        self.session_cache.remove(&ctx.session_id);

        self.audit.record(
            AuditEvent {
                user_id: Some(&ctx.user_id.to_string()),
                action: "auth.logout",
                resource_type: "session",
                resource_id: Some(&sid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(())
    }

    pub fn logout_all(&self, user_id: Uuid, client: &ClientInfo) -> ServiceResult<usize> {
        let uid = user_id.to_string();
        let ids = self
            .db
            .with_conn(|conn| queries::sessions::ids_for_user(conn, &uid))
            .map_err(ServiceError::Internal)?;
        let n = self
            .db
            .with_conn(|conn| queries::sessions::delete_all_for_user(conn, &uid))
            .map_err(ServiceError::Internal)?;
        for id in &ids {
            if let Ok(sid) = id.parse::<Uuid>() {
                self.session_cache.remove(&sid);
            }
        }

        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "auth.logout_all",
                resource_type: "user",
                resource_id: Some(&uid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(n)
    }

    // -- Password management --

    /// Changing the password invalidates every session for the user: a
    /// credential compromise must force a total re-login.
    pub fn change_password(
        &self,
        user_id: Uuid,
        current_plain: &str,
        new_plain: &str,
        client: &ClientInfo,
    ) -> ServiceResult<()> {
        let uid = user_id.to_string();
        let user = self.require_user(&uid)?;

        if !password::verify(current_plain, &user.password_hash) {
            return Err(ServiceError::invalid_credentials());
        }
        if new_plain.len() < MIN_PASSWORD_LEN {
            return Err(ServiceError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let new_hash = password::hash(new_plain)?;
        let ids = self
            .db
            .with_conn(|conn| queries::sessions::ids_for_user(conn, &uid))
            .map_err(ServiceError::Internal)?;

        self.db.with_tx(|tx| -> ServiceResult<()> {
            queries::users::set_password_hash(tx, &uid, &new_hash)?;
            queries::sessions::delete_all_for_user(tx, &uid)?;
            Ok(())
        })?;
        for id in &ids {
            if let Ok(sid) = id.parse::<Uuid>() {
                self.session_cache.remove(&sid);
            }
        }

        info!("Password changed for user {}, all sessions revoked", uid);
        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "auth.change_password",
                resource_type: "user",
                resource_id: Some(&uid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(())
    }

    // -- TOTP enrollment --

    /// Generate a fresh secret and enrollment URI. Nothing is persisted
    /// until `enable_totp` verifies a code against this secret.
    pub fn setup_totp(&self, user_id: Uuid) -> ServiceResult<(String, String)> {
        let user = self.require_user(&user_id.to_string())?;
        if user.totp_secret_enc.is_some() {
            return Err(ServiceError::Conflict("two-factor already enabled".into()));
        }

        let secret = totp::generate_secret();
        let secret_b32 = totp::base32_encode(&secret);
        let uri = totp::enrollment_uri(&self.config.totp_issuer, &user.username, &secret_b32);
        Ok((secret_b32, uri))
    }

    pub fn enable_totp(
        &self,
        user_id: Uuid,
        secret_b32: &str,
        code: &str,
        client: &ClientInfo,
    ) -> ServiceResult<()> {
        let uid = user_id.to_string();
        let user = self.require_user(&uid)?;
        if user.totp_secret_enc.is_some() {
            return Err(ServiceError::Conflict("two-factor already enabled".into()));
        }

        let secret = totp::base32_decode(secret_b32)
            .ok_or_else(|| ServiceError::Validation("malformed secret".into()))?;
        if !totp::verify(&secret, code) {
            return Err(ServiceError::Validation(
                "code does not match the secret".into(),
            ));
        }

        let (sealed, nonce) = self.sealer.seal(&secret)?;
        self.db
            .with_conn(|conn| {
                queries::users::set_totp_secret(conn, &uid, Some((&sealed, &nonce)))
            })
            .map_err(ServiceError::Internal)?;

        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "auth.totp_enable",
                resource_type: "user",
                resource_id: Some(&uid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(())
    }

    pub fn disable_totp(
        &self,
        user_id: Uuid,
        password_plain: &str,
        client: &ClientInfo,
    ) -> ServiceResult<()> {
        let uid = user_id.to_string();
        let user = self.require_user(&uid)?;
        if !password::verify(password_plain, &user.password_hash) {
            return Err(ServiceError::invalid_credentials());
        }

        self.db
            .with_conn(|conn| queries::users::set_totp_secret(conn, &uid, None))
            .map_err(ServiceError::Internal)?;

        self.audit.record(
            AuditEvent {
                user_id: Some(&uid),
                action: "auth.totp_disable",
                resource_type: "user",
                resource_id: Some(&uid),
                success: true,
                error: None,
            },
            client,
        );
        Ok(())
    }

    fn require_user(&self, user_id: &str) -> ServiceResult<UserRow> {
        self.db
            .with_conn(|conn| queries::users::find_by_id(conn, user_id))
            .map_err(ServiceError::Internal)?
            .ok_or_else(ServiceError::not_found)
    }

    /// Prune expired session rows; run by the background cleanup loop.
    pub fn prune_expired_sessions(&self) -> ServiceResult<usize> {
        self.db
            .with_conn(|conn| queries::sessions::delete_expired(conn, &now_sql()))
            .map_err(ServiceError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_auth;

    fn envelopes() -> KeyEnvelopes {
        KeyEnvelopes {
            master_key_envelope: "mk".into(),
            public_key: "pk".into(),
            private_key_envelope: "sk".into(),
        }
    }

    fn client() -> ClientInfo {
        ClientInfo::default()
    }

    #[test]
    fn register_then_login() {
        let (auth, _db) = test_auth();
        let s = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();
        assert!(auth.validate_session(&s.token).is_ok());

        match auth.login("alice", "password1", None, &client()).unwrap() {
            LoginOutcome::Session(s2) => {
                assert_eq!(s2.user_id, s.user_id);
                assert_ne!(s2.session_id, s.session_id);
            }
            LoginOutcome::TotpRequired => panic!("no TOTP configured"),
        }
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let (auth, _db) = test_auth();
        auth.register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();
        let err = auth
            .register("a@b.c", "alice2", "password1", envelopes(), &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        // Same username under a fresh email collides too, and still as a
        // Conflict rather than a raw constraint failure.
        let err = auth
            .register("x@y.z", "alice", "password1", envelopes(), &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[test]
    fn login_failures_are_generic() {
        let (auth, _db) = test_auth();
        auth.register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();

        let missing = auth
            .login("nobody", "password1", None, &client())
            .unwrap_err();
        let wrong = auth
            .login("alice", "wrong-password", None, &client())
            .unwrap_err();
        assert_eq!(missing.to_string(), wrong.to_string());
    }

    #[test]
    fn two_sessions_are_independent() {
        let (auth, _db) = test_auth();
        let s1 = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();
        let LoginOutcome::Session(s2) =
            auth.login("alice", "password1", None, &client()).unwrap()
        else {
            panic!("expected session");
        };

        auth.logout(
            AuthContext {
                user_id: s1.user_id,
                session_id: s1.session_id,
            },
            &client(),
        )
        .unwrap();

        assert!(auth.validate_session(&s1.token).is_err());
        assert!(auth.validate_session(&s2.token).is_ok());
    }

    #[test]
    fn change_password_revokes_all_sessions() {
        let (auth, _db) = test_auth();
        let s1 = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();
        let LoginOutcome::Session(s2) =
            auth.login("alice", "password1", None, &client()).unwrap()
        else {
            panic!("expected session");
        };

        auth.change_password(s1.user_id, "password1", "password2", &client())
            .unwrap();

        assert!(auth.validate_session(&s1.token).is_err());
        assert!(auth.validate_session(&s2.token).is_err());

        // Old password no longer works, new one does.
        assert!(auth.login("alice", "password1", None, &client()).is_err());
        assert!(auth.login("alice", "password2", None, &client()).is_ok());
    }

    #[test]
    fn expired_session_is_deleted_on_validation() {
        let (auth, db) = test_auth();
        let s = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();

        let past = to_sql_datetime(Utc::now() - Duration::hours(1));
        db.with_conn(|conn| -> anyhow::Result<()> {
            conn.execute(
                "UPDATE sessions SET expires_at = ?1 WHERE id = ?2",
                rusqlite::params![past, s.session_id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        assert!(auth.validate_session(&s.token).is_err());

        let count: i64 = db
            .with_conn(|conn| -> anyhow::Result<i64> {
                Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn revoked_token_rejected_even_if_signature_valid() {
        let (auth, db) = test_auth();
        let s = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();

        db.with_conn(|conn| -> anyhow::Result<()> {
            conn.execute("DELETE FROM sessions", [])?;
            Ok(())
        })
        .unwrap();

        let err = auth.validate_session(&s.token).unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
    }

    #[test]
    fn totp_enrollment_and_login() {
        let (auth, _db) = test_auth();
        let s = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();

        let (secret_b32, uri) = auth.setup_totp(s.user_id).unwrap();
        assert!(uri.starts_with("otpauth://totp/"));

        let secret = totp::base32_decode(&secret_b32).unwrap();
        let code = totp::code_at(&secret, Utc::now().timestamp());
        auth.enable_totp(s.user_id, &secret_b32, &code, &client())
            .unwrap();

        // Login without a code now signals TOTP, not a session.
        match auth.login("alice", "password1", None, &client()).unwrap() {
            LoginOutcome::TotpRequired => {}
            LoginOutcome::Session(_) => panic!("expected TOTP challenge"),
        }

        let code = totp::code_at(&secret, Utc::now().timestamp());
        assert!(matches!(
            auth.login("alice", "password1", Some(&code), &client()),
            Ok(LoginOutcome::Session(_))
        ));
        assert!(
            auth.login("alice", "password1", Some("000000"), &client())
                .is_err()
        );

        auth.disable_totp(s.user_id, "password1", &client()).unwrap();
        assert!(matches!(
            auth.login("alice", "password1", None, &client()),
            Ok(LoginOutcome::Session(_))
        ));
    }

    #[test]
    fn enable_totp_requires_matching_code() {
        let (auth, _db) = test_auth();
        let s = auth
            .register("a@b.c", "alice", "password1", envelopes(), &client())
            .unwrap();
        let (secret_b32, _) = auth.setup_totp(s.user_id).unwrap();

        let err = auth
            .enable_totp(s.user_id, &secret_b32, "000000", &client())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        // Nothing persisted: login still single-factor.
        assert!(matches!(
            auth.login("alice", "password1", None, &client()),
            Ok(LoginOutcome::Session(_))
        ));
    }
}
