use std::collections::HashMap;

use axum::Extension;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::NaiveDateTime;
use chrono::Utc;
use clubsite_models::AdminSession;
use clubsite_models::AdminUser;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use super::AppState;
use super::Authentication;
use super::AuthenticationExt;
use super::AuthorizationError;
use crate::error::ClubsiteError;
use crate::error::InternalError;
use crate::error::Result;

#[derive(Debug, Error)]
pub(in crate::views) enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials { username: String },
}

impl ClubsiteError for AuthError {
    fn get_status(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn get_type(&self) -> &str {
        "clubsite:auth:InvalidCredentials"
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::InvalidCredentials { username } => {
                HashMap::from([("username".to_owned(), json!(username))])
            }
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[cfg_attr(test, derive(Serialize))]
pub(in crate::views) struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct LoginResponse {
    /// Send it back as `Authorization: Bearer <token>`
    pub token: String,
    pub username: String,
    #[schema(value_type = String, format = DateTime)]
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq)]
pub(in crate::views) struct WhoAmI {
    pub username: String,
}

/// Exchange the admin credentials for a bearer token
#[utoipa::path(
    post, path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "The session token", body = LoginResponse),
        (status = 401, description = "Wrong username or password", body = InternalError),
    )
)]
#[tracing::instrument(skip_all)]
pub(in crate::views) async fn login(
    State(AppState { db_pool, config, .. }): State<AppState>,
    Json(LoginRequest { username, password }): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let conn = &mut db_pool.get().await?;
    let user = match AdminUser::retrieve_by_username(conn, username.clone()).await? {
        Some(user) => Some(user).filter(|user| user.verify_password(&password)),
        None => {
            AdminUser::reject_unknown(&password);
            None
        }
    };
    let Some(user) = user else {
        tracing::warn!(%username, "rejected admin login");
        return Err(AuthError::InvalidCredentials { username }.into());
    };

    let now = Utc::now().naive_utc();
    let purged = AdminSession::purge_expired(conn, now).await?;
    if purged > 0 {
        tracing::debug!(purged, "purged expired sessions");
    }
    let session_ttl = config.admin_config.session_ttl;
    let (session, token) = AdminSession::open(conn, &user, session_ttl, now).await?;
    tracing::info!(username = %user.username, expires_at = %session.expires_at, "admin logged in");
    Ok(Json(LoginResponse {
        token,
        username: user.username,
        expires_at: session.expires_at,
    }))
}

/// Revoke the token used by the request
#[utoipa::path(
    post, path = "/auth/logout",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 204, description = "The token was revoked"),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
    )
)]
pub(in crate::views) async fn logout(
    State(AppState { db_pool, .. }): State<AppState>,
    Extension(auth): AuthenticationExt,
) -> Result<StatusCode> {
    let Authentication::Admin { token, .. } = auth else {
        return Err(AuthorizationError::Unauthorized.into());
    };
    let conn = &mut db_pool.get().await?;
    AdminSession::revoke(conn, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Check a token and return who it belongs to
#[utoipa::path(
    get, path = "/auth/verify",
    tag = "auth",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The token is valid", body = WhoAmI),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
    )
)]
pub(in crate::views) async fn verify(Extension(auth): AuthenticationExt) -> Result<Json<WhoAmI>> {
    let user = auth.admin()?;
    Ok(Json(WhoAmI {
        username: user.username.clone(),
    }))
}
