mod cleanup;
mod middleware;
mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, header::{AUTHORIZATION, CONTENT_TYPE}},
    routing::{delete, get, patch, post},
};
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use cachet_core::audit::Audit;
use cachet_core::auth::{AuthConfig, AuthManager};
use cachet_core::files::FileManager;
use cachet_core::folders::FolderManager;
use cachet_core::sealed::SecretSealer;
use cachet_core::shares::ShareManager;
use cachet_core::storage::BlobStore;
use cachet_db::Database;

use crate::middleware::require_auth;
use crate::routes::AppState;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachet=debug,cachet_core=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("CACHET_JWT_SECRET").unwrap_or_default();
    if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
        eprintln!("FATAL: CACHET_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it to a long random string in your .env file and restart.");
        std::process::exit(1);
    }

    let host = env_or("CACHET_HOST", "0.0.0.0");
    let port: u16 = env_or("CACHET_PORT", "3040").parse()?;
    let db_path: PathBuf = env_or("CACHET_DB_PATH", "cachet.db").into();
    let storage_dir: PathBuf = env_or("CACHET_STORAGE_DIR", "./blob-storage").into();
    let session_ttl_hours: i64 = env_or("CACHET_SESSION_TTL_HOURS", "24").parse()?;
    let default_quota_bytes: i64 =
        env_or("CACHET_DEFAULT_QUOTA_BYTES", &(10_i64 * 1024 * 1024 * 1024).to_string())
            .parse()?;
    let totp_issuer = env_or("CACHET_TOTP_ISSUER", "cachet");
    let audit_retention_days: i64 = env_or("CACHET_AUDIT_RETENTION_DAYS", "90").parse()?;

    // The at-rest sealing key for server-held secrets (TOTP) is derived from
    // its own variable when set, otherwise from the JWT secret.
    let seal_source = env_or("CACHET_SEAL_KEY", &jwt_secret);
    let seal_key: [u8; 32] = Sha256::digest(seal_source.as_bytes()).into();

    // Init database and blob store
    let db = Arc::new(Database::open(&db_path)?);
    let blobs = Arc::new(BlobStore::new(storage_dir).await?);
    let audit = Arc::new(Audit::new(db.clone()));

    let auth = Arc::new(AuthManager::new(
        db.clone(),
        audit.clone(),
        SecretSealer::new(seal_key),
        AuthConfig {
            jwt_secret,
            session_ttl: chrono::Duration::hours(session_ttl_hours),
            default_quota_bytes,
            totp_issuer,
        },
    ));
    let files = Arc::new(FileManager::new(db.clone(), blobs.clone(), audit.clone()));
    let folders = Arc::new(FolderManager::new(db.clone(), blobs.clone(), audit.clone()));
    let shares = Arc::new(ShareManager::new(db.clone(), blobs.clone(), audit.clone()));

    // Background cleanup task (runs every hour)
    tokio::spawn(cleanup::run_cleanup_loop(
        auth.clone(),
        db.clone(),
        audit_retention_days,
        3600,
    ));

    let state = AppState {
        auth,
        files,
        folders,
        shares,
    };

    // CORS — clients connect from various origins; auth is bearer-token based
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let public_routes = Router::new()
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/public/shares/{token}", get(routes::shares::public_info))
        .route(
            "/public/shares/{token}/download",
            get(routes::shares::public_download),
        );

    let protected_routes = Router::new()
        .route("/auth/logout", post(routes::auth::logout))
        .route("/auth/logout-all", post(routes::auth::logout_all))
        .route("/auth/password", post(routes::auth::change_password))
        .route("/auth/totp/setup", post(routes::auth::totp_setup))
        .route("/auth/totp/enable", post(routes::auth::totp_enable))
        .route("/auth/totp/disable", post(routes::auth::totp_disable))
        .route("/files", post(routes::files::upload))
        .route("/files", get(routes::files::list))
        .route("/files/trash", get(routes::files::trash))
        .route("/files/stats", get(routes::files::stats))
        .route("/files/{id}", get(routes::files::get))
        .route("/files/{id}", delete(routes::files::soft_delete))
        .route("/files/{id}/download", get(routes::files::download))
        .route("/files/{id}/rename", patch(routes::files::rename))
        .route("/files/{id}/move", patch(routes::files::move_file))
        .route("/files/{id}/restore", post(routes::files::restore))
        .route("/files/{id}/permanent", delete(routes::files::permanent_delete))
        .route("/files/{id}/versions", post(routes::files::create_version))
        .route("/files/{id}/versions", get(routes::files::list_versions))
        .route("/folders", post(routes::folders::create))
        .route("/folders", get(routes::folders::list))
        .route("/folders/tree", get(routes::folders::tree))
        .route("/folders/{id}", delete(routes::folders::delete))
        .route("/folders/{id}/breadcrumbs", get(routes::folders::breadcrumbs))
        .route("/folders/{id}/rename", patch(routes::folders::rename))
        .route("/folders/{id}/move", patch(routes::folders::move_folder))
        .route("/folders/{id}/restore", post(routes::folders::restore))
        .route("/shares", post(routes::shares::create))
        .route("/shares", get(routes::shares::list))
        .route("/shares/{id}", patch(routes::shares::update))
        .route("/shares/{id}", delete(routes::shares::delete))
        .route("/shares/{id}/revoke", post(routes::shares::revoke))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", public_routes.merge(protected_routes))
        .layer(DefaultBodyLimit::max(1024 * 1024 * 1024)) // 1 GB max
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Cachet server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
