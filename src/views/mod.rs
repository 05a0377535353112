mod auth;
mod documents;
mod openapi;
mod results;
#[cfg(test)]
mod test_app;
mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::ServiceExt;
use axum::extract::DefaultBodyLimit;
use axum::extract::FromRef;
use axum::extract::Json;
use axum::extract::Request;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use axum_extra::headers::Authorization;
use axum_extra::headers::HeaderMapExt as _;
use axum_extra::headers::authorization::Bearer;
use chrono::Duration;
use chrono::Utc;
use clubsite_models::AdminSession;
use clubsite_models::AdminUser;
use common::Version;
use database::DbConnectionPool;
use database::migrations::MigrationOptions;
use database::migrations::run_pending_migrations;
use database::ping_database;
use thiserror::Error;
use tokio::time::timeout;
use tower::Layer as _;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::normalize_path::NormalizePath;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing::warn;

use crate::error::ClubsiteError;
use crate::error::Result;

/// The password the bootstrap admin gets when none is configured
pub const DEFAULT_ADMIN_PASSWORD: &str = "changeme";

fn service_router() -> Router<AppState> {
    // `/results/{key}` is an id, `/results/{key}/{year}` a category: both segments share a
    // parameter name since the router refuses two names at the same position.
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/openapi.json", get(openapi::openapi))
        .nest(
            "/auth",
            Router::new()
                .route("/login", post(auth::login))
                .route("/logout", post(auth::logout))
                .route("/verify", get(auth::verify)),
        )
        .route("/results", get(results::list).post(results::create))
        .route(
            "/results/{key}",
            put(results::update).delete(results::delete),
        )
        .route("/results/{key}/image", get(results::get_image))
        .route("/results/{key}/{year}", get(results::get_by_business_key))
        .route("/documents", get(documents::list).post(documents::create))
        .route(
            "/documents/{document_id}",
            get(documents::get)
                .put(documents::update)
                .delete(documents::delete),
        )
        .route("/documents/{document_id}/file", get(documents::get_file))
}

/// Represents who issued a request, as established from its bearer token
#[derive(Debug, Clone)]
pub enum Authentication {
    /// No token, or a token that is unknown, revoked or expired
    Unauthenticated,
    /// A valid admin session
    Admin { user: AdminUser, token: String },
}

impl Authentication {
    /// The authenticated admin, or an `Unauthorized` error
    fn admin(&self) -> Result<&AdminUser, AuthorizationError> {
        match self {
            Authentication::Admin { user, .. } => Ok(user),
            Authentication::Unauthenticated => Err(AuthorizationError::Unauthorized),
        }
    }
}

pub type AuthenticationExt = axum::extract::Extension<Authentication>;

async fn authenticate(
    headers: &axum::http::HeaderMap,
    db_pool: &DbConnectionPool,
) -> Result<Authentication> {
    let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
        return Ok(Authentication::Unauthenticated);
    };
    let token = bearer.token().to_owned();
    let conn = &mut db_pool.get().await?;
    let authentication =
        match AdminSession::authenticate(conn, &token, Utc::now().naive_utc()).await? {
            Some(user) => Authentication::Admin { user, token },
            None => {
                tracing::debug!("unknown or expired bearer token");
                Authentication::Unauthenticated
            }
        };
    Ok(authentication)
}

async fn authentication_middleware(
    State(AppState { db_pool, .. }): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let authentication = authenticate(req.headers(), &db_pool).await?;
    req.extensions_mut().insert(authentication);
    Ok(next.run(req).await)
}

#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("Unauthorized, a valid admin token is required")]
    Unauthorized,
}

impl ClubsiteError for AuthorizationError {
    fn get_status(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn get_type(&self) -> &str {
        "clubsite:authz:Unauthorized"
    }
}

#[derive(Debug, Error)]
pub enum AppHealthError {
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Database(#[from] database::PingError),
}

impl ClubsiteError for AppHealthError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        match self {
            Self::Timeout => "clubsite:app_health:Timeout",
            Self::Database(_) => "clubsite:app_health:Database",
        }
    }
}

#[utoipa::path(
    get, path = "/health",
    responses(
        (status = 200, description = "Check if the server and its database are running correctly", body = String)
    )
)]
async fn health(
    State(AppState {
        db_pool,
        health_check_timeout,
        ..
    }): State<AppState>,
) -> Result<&'static str> {
    timeout(
        health_check_timeout
            .to_std()
            .unwrap_or(std::time::Duration::ZERO),
        check_health(db_pool),
    )
    .await
    .map_err(|_| AppHealthError::Timeout)??;
    Ok("ok")
}

pub async fn check_health(db_pool: Arc<DbConnectionPool>) -> Result<()> {
    let mut db_connection = db_pool.get().await?;
    ping_database(&mut db_connection)
        .await
        .map_err(AppHealthError::Database)?;
    Ok(())
}

#[utoipa::path(
    get, path = "/version",
    responses(
        (status = 200, description = "Return the service version", body = Version),
    ),
)]
async fn version(State(AppState { config, .. }): State<AppState>) -> Json<Version> {
    Json(Version {
        git_describe: config.app_version.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: usize,
    /// Where the files referenced by a legacy path layout live
    pub legacy_uploads_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
    pub session_ttl: Duration,
}

pub struct ServerConfig {
    pub port: u16,
    pub address: String,
    pub health_check_timeout: Duration,
    pub database_config: DatabaseConfig,
    pub admin_config: AdminConfig,
    pub max_upload_size: usize,
    pub allowed_origin: Option<String>,
    pub static_assets_path: Option<PathBuf>,
    pub app_version: Option<String>,
}

pub struct Server {
    app_state: AppState,
    router: NormalizePath<Router>,
}

/// The state of the whole server, available to all handlers
///
/// If only the database is needed, use `State<Arc<DbConnectionPool>>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db_pool: Arc<DbConnectionPool>,
    pub health_check_timeout: Duration,
}

impl FromRef<AppState> for Arc<DbConnectionPool> {
    fn from_ref(input: &AppState) -> Self {
        input.db_pool.clone()
    }
}

impl AppState {
    /// Opens the store, brings its schema up to date and makes sure an admin exists
    ///
    /// Nothing is served before all three steps succeeded.
    #[tracing::instrument(skip_all, level = "info", err, name = "AppState initialization")]
    async fn init(config: ServerConfig) -> anyhow::Result<Self> {
        let DatabaseConfig {
            path,
            pool_size,
            legacy_uploads_dir,
        } = config.database_config.clone();
        info!(path = %path.display(), pool_size, "opening database");
        let db_pool = Arc::new(DbConnectionPool::try_initialize(&path, pool_size)?);
        let conn = &mut db_pool.get().await?;

        let options = MigrationOptions::new(legacy_uploads_dir);
        let summary = conn
            .interact(move |conn| run_pending_migrations(conn, &options))
            .await?;
        info!(
            from_version = summary.from_version,
            to_version = summary.to_version,
            applied = summary.applied.len(),
            "database schema is up to date"
        );

        let AdminConfig {
            username, password, ..
        } = config.admin_config.clone();
        if password == DEFAULT_ADMIN_PASSWORD {
            warn!("the admin password is the default one, set ADMIN_PASSWORD");
        }
        if let Some(admin) = AdminUser::ensure_bootstrap(conn, username, password).await? {
            info!(username = %admin.username, "bootstrap admin created");
        }

        Ok(Self {
            db_pool,
            health_check_timeout: config.health_check_timeout,
            config: Arc::new(config),
        })
    }
}

fn cors_layer(allowed_origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    Ok(match allowed_origin {
        Some(origin) => cors.allow_origin(origin.parse::<axum::http::header::HeaderValue>()?),
        None => cors.allow_origin(Any),
    })
}

/// Builds the application router, with every layer but path normalization
fn build_router(app_state: AppState) -> anyhow::Result<Router> {
    let config = app_state.config.clone();

    // Room for the text fields around the largest accepted file
    let request_payload_limit =
        RequestBodyLimitLayer::new(config.max_upload_size + upload::FORM_OVERHEAD);

    let cors = cors_layer(config.allowed_origin.as_deref())?;

    let router = service_router().route_layer(axum::middleware::from_fn_with_state(
        app_state.clone(),
        authentication_middleware,
    ));
    let router = match &config.static_assets_path {
        Some(static_assets_path) => {
            info!(path = %static_assets_path.display(), "serving static pages");
            router.fallback_service(ServeDir::new(static_assets_path))
        }
        None => router,
    };
    Ok(router
        .layer(DefaultBodyLimit::disable())
        .layer(request_payload_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state))
}

impl Server {
    #[tracing::instrument(skip_all, err, level = "info", name = "server initialization")]
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        info!("Building server...");
        let app_state = AppState::init(config).await?;
        let router = tracing::debug_span!("router initialization")
            .in_scope(|| build_router(app_state.clone()))?;
        let normalizing_router = NormalizePathLayer::trim_trailing_slash().layer(router);

        Ok(Self {
            app_state,
            router: normalizing_router,
        })
    }

    pub async fn start(self) -> std::io::Result<()> {
        let Self { app_state, router } = self;
        let ServerConfig { address, port, .. } = app_state.config.as_ref();

        info!("Running server...");
        let service = ServiceExt::<axum::extract::Request>::into_make_service(router);
        let listener = tokio::net::TcpListener::bind((address.as_str(), *port)).await?;
        info!(address = %listener.local_addr()?, "listening");
        axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(error) => {
                warn!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
