//! Exposes [TestApp] and [TestAppBuilder] to ease the setup of the
//! test axum server and its database connection pool.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestRequest;
use axum_test::TestServer;
use axum_test::multipart::MultipartForm;
use axum_test::multipart::Part;
use chrono::Utc;
use clubsite_models::AdminSession;
use clubsite_models::AdminUser;
use common::tracing::Stream;
use common::tracing::TracingConfig;
use common::tracing::create_tracing_subscriber;
use database::DbConnectionPool;
use serde::de::DeserializeOwned;

use super::AdminConfig;
use super::AppState;
use super::DEFAULT_ADMIN_PASSWORD;
use super::DatabaseConfig;
use super::ServerConfig;
use super::build_router;

pub const TEST_ADMIN: &str = "admin";

/// A builder interface for [TestApp]
///
/// Use [TestAppBuilder::default_app] to get a default app backed by a fresh, migrated database.
pub(crate) struct TestAppBuilder {
    max_upload_size: usize,
    session_ttl: chrono::Duration,
    static_assets_path: Option<PathBuf>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            max_upload_size: 10 * 1024 * 1024,
            session_ttl: chrono::Duration::hours(24),
            static_assets_path: None,
        }
    }

    pub fn max_upload_size(mut self, max_upload_size: usize) -> Self {
        self.max_upload_size = max_upload_size;
        self
    }

    pub fn session_ttl(mut self, session_ttl: chrono::Duration) -> Self {
        self.session_ttl = session_ttl;
        self
    }

    pub fn static_assets_path(mut self, static_assets_path: PathBuf) -> Self {
        self.static_assets_path = Some(static_assets_path);
        self
    }

    pub fn default_app() -> TestApp {
        TestAppBuilder::new().build()
    }

    pub fn build(self) -> TestApp {
        // Generate test server config
        let config = ServerConfig {
            app_version: None,
            port: 0,
            address: String::default(),
            health_check_timeout: chrono::Duration::milliseconds(500),
            database_config: DatabaseConfig {
                path: PathBuf::from("clubsite.sqlite3"),
                pool_size: 2,
                legacy_uploads_dir: PathBuf::from("./uploads"),
            },
            admin_config: AdminConfig {
                username: TEST_ADMIN.to_owned(),
                password: DEFAULT_ADMIN_PASSWORD.to_owned(),
                session_ttl: self.session_ttl,
            },
            max_upload_size: self.max_upload_size,
            allowed_origin: None,
            static_assets_path: self.static_assets_path,
        };

        // Setup tracing
        let tracing_config = TracingConfig {
            stream: Stream::Stdout,
            directives: vec![],
        };
        let sub = create_tracing_subscriber(
            tracing_config,
            tracing_subscriber::filter::LevelFilter::TRACE,
        );
        let tracing_guard = tracing::subscriber::set_default(sub);

        // Create database pool
        let db_pool = Arc::new(DbConnectionPool::for_tests());

        let app_state = AppState {
            db_pool,
            health_check_timeout: config.health_check_timeout,
            config: Arc::new(config),
        };

        // Configure the axum router
        let router = build_router(app_state.clone()).expect("router should build properly");

        // Run server
        let server = TestServer::new(router).expect("test server should build properly");

        TestApp {
            server,
            app_state,
            tracing_guard,
        }
    }
}

/// Wraps an underlying, fully configured, axum service
///
/// It also holds a reference to the database connection pool,
/// which can be accessed through the [TestApp] methods.
pub(crate) struct TestApp {
    server: TestServer,
    app_state: AppState,
    #[expect(unused)] // included here to extend its lifetime, not meant to be used in any way
    tracing_guard: tracing::subscriber::DefaultGuard,
}

impl TestApp {
    pub fn db_pool(&self) -> Arc<DbConnectionPool> {
        self.app_state.db_pool.clone()
    }

    /// Creates the configured admin the way the server bootstraps it at startup
    pub async fn bootstrap_admin(&self) -> AdminUser {
        let conn = &mut self.db_pool().get().await.expect("connection should be available");
        let AdminConfig {
            username, password, ..
        } = self.app_state.config.admin_config.clone();
        AdminUser::ensure_bootstrap(conn, username.clone(), password)
            .await
            .expect("bootstrap admin should be created");
        AdminUser::retrieve_by_username(conn, username)
            .await
            .expect("admin should be readable")
            .expect("admin should exist")
    }

    /// Opens an admin session directly in the store and returns its bearer token
    pub async fn admin_token(&self) -> String {
        let admin = self.bootstrap_admin().await;
        let conn = &mut self.db_pool().get().await.expect("connection should be available");
        let session_ttl = self.app_state.config.admin_config.session_ttl;
        let (_, token) = AdminSession::open(conn, &admin, session_ttl, Utc::now().naive_utc())
            .await
            .expect("session should be opened");
        token
    }

    pub async fn fetch(&self, req: TestRequest) -> TestResponse {
        tracing::trace!(request = ?req);
        let response = req.await;
        TestResponse::new(response)
    }

    pub fn get(&self, path: &str) -> TestRequest {
        self.server.get(&trim_path(path))
    }

    pub fn post(&self, path: &str) -> TestRequest {
        self.server.post(&trim_path(path))
    }

    pub fn put(&self, path: &str) -> TestRequest {
        self.server.put(&trim_path(path))
    }

    pub fn delete(&self, path: &str) -> TestRequest {
        self.server.delete(&trim_path(path))
    }
}

/// Builds a multipart form out of text fields and an optional file part
pub fn multipart_form(
    texts: &[(&str, &str)],
    file: Option<(&str, &[u8], &str, &str)>,
) -> MultipartForm {
    let form = texts
        .iter()
        .fold(MultipartForm::new(), |form, (name, value)| {
            form.add_text(name.to_string(), value.to_string())
        });
    match file {
        Some((name, data, filename, mimetype)) => form.add_part(
            name.to_string(),
            Part::bytes(data.to_vec())
                .file_name(filename.to_string())
                .mime_type(mimetype.to_string()),
        ),
        None => form,
    }
}

// For technical reasons, we had a hard time trying to configure the normalizing layer
// in the test server. Since we have control over the paths configured in our unit tests,
// doing this manually is probably a good enough solution for now.
fn trim_path(path: &str) -> String {
    if let Some(path) = path.strip_suffix('/') {
        path.to_owned()
    } else if path.contains("/?") {
        path.replace("/?", "?")
    } else {
        path.to_owned()
    }
}

pub struct TestResponse {
    inner: axum_test::TestResponse,
}

impl TestResponse {
    #[tracing::instrument(name = "Response", level = "debug", skip(inner), fields(status = ?inner.status_code()))]
    fn new(inner: axum_test::TestResponse) -> Self {
        tracing::trace!(response = ?inner);
        Self { inner }
    }

    #[track_caller]
    fn render_response_lossy(self) -> String {
        let bytes = self.inner.into_bytes();
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|json| serde_json::to_string_pretty(&json).ok())
            .unwrap_or_else(|| "cannot render response body".to_string())
    }

    #[track_caller]
    pub fn assert_status(self, expected_status: StatusCode) -> Self {
        let actual_status = self.inner.status_code();
        if actual_status != expected_status {
            let body = self.render_response_lossy();
            pretty_assertions::assert_eq!(
                actual_status,
                expected_status,
                "unexpected status code body={body}"
            );
            unreachable!("should have already panicked")
        } else {
            self
        }
    }

    pub fn bytes(self) -> Vec<u8> {
        self.inner.into_bytes().into()
    }

    #[track_caller]
    pub fn header(&self, name: &str) -> String {
        self.inner
            .header(name)
            .to_str()
            .expect("header should be valid UTF-8")
            .to_string()
    }

    #[track_caller]
    pub fn content_type(&self) -> String {
        self.header("Content-Type")
    }

    #[tracing::instrument(
        name = "Deserialization",
        level = "debug",
        skip(self),
        fields(response_status = ?self.inner.status_code())
    )]
    #[track_caller]
    pub fn json_into<T: DeserializeOwned>(self) -> T {
        let body = self.bytes();
        serde_json::from_slice(body.as_ref()).unwrap_or_else(|err| {
            tracing::error!(
                error = ?err,
                "Error deserializing test response into the desired type"
            );
            let actual: serde_json::Value =
                serde_json::from_slice(body.as_ref()).unwrap_or_else(|err| {
                    tracing::error!(
                        error = ?err,
                        ?body,
                        "Failed to deserialize test response body into JSON"
                    );
                    panic!("could not deserialize test response into JSON");
                });
            let pretty = serde_json::to_string_pretty(&actual).unwrap();
            tracing::error!(body = %pretty, "Actual JSON value");
            panic!("could not deserialize test request");
        })
    }
}
