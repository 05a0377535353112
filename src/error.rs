use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use colored::Colorize;
use database::DatabaseError;
use database::DatabasePoolBuildError;
use database::DatabasePoolError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::result::Result as StdResult;
use tracing::error;
use utoipa::ToSchema;

pub type Result<T, E = InternalError> = StdResult<T, E>;

/// Trait for all errors that can be returned by the clubsite API
pub trait ClubsiteError: Error + Send + Sync {
    fn get_status(&self) -> StatusCode;

    fn get_type(&self) -> &str;

    fn context(&self) -> HashMap<String, Value> {
        Default::default()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "StatusCode")]
pub(crate) struct StatusCodeRemoteDef(#[serde(getter = "StatusCode::as_u16")] u16);

impl From<StatusCodeRemoteDef> for StatusCode {
    fn from(def: StatusCodeRemoteDef) -> Self {
        StatusCode::from_u16(def.0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub(crate) fn default_status_code() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// The JSON body of every error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct InternalError {
    #[serde(with = "StatusCodeRemoteDef", default = "default_status_code")]
    #[schema(value_type = u16, minimum = 100, maximum = 599)]
    pub status: StatusCode,
    #[serde(rename = "type")]
    pub error_type: String,
    pub context: HashMap<String, Value>,
    pub message: String,
}

impl Error for InternalError {}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl<T: ClubsiteError> From<T> for InternalError {
    fn from(err: T) -> Self {
        InternalError {
            status: err.get_status(),
            error_type: err.get_type().to_owned(),
            context: err.context(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        error!(
            "[{}] {}: {}",
            self.error_type.bold(),
            self.message,
            Backtrace::capture() // won't log unless RUST_BACKTRACE=1
        );
        (self.status, Json(self)).into_response()
    }
}

impl ClubsiteError for DatabasePoolBuildError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        "clubsite:DatabaseAccessError"
    }
}

impl ClubsiteError for DatabasePoolError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        "clubsite:DatabaseAccessError"
    }
}

impl ClubsiteError for DatabaseError {
    fn get_status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn get_type(&self) -> &str {
        "clubsite:DatabaseAccessError"
    }
}

impl ClubsiteError for clubsite_models::Error {
    fn get_status(&self) -> StatusCode {
        match self {
            Self::UniqueViolation { .. } => StatusCode::CONFLICT,
            Self::ForeignKeyViolation { .. }
            | Self::PasswordHashing(_)
            | Self::SessionExpiryOutOfRange { .. }
            | Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn get_type(&self) -> &str {
        match self {
            Self::UniqueViolation { .. } => "clubsite:model:UniqueViolation",
            Self::ForeignKeyViolation { .. } => "clubsite:model:ForeignKeyViolation",
            Self::PasswordHashing(_) => "clubsite:model:PasswordHashing",
            Self::SessionExpiryOutOfRange { .. } => "clubsite:model:SessionExpiryOutOfRange",
            Self::DatabaseError(_) => "clubsite:model:ModelError",
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::UniqueViolation { table, columns } => HashMap::from([
                ("table".to_owned(), json!(table)),
                ("columns".to_owned(), json!(columns)),
            ]),
            Self::SessionExpiryOutOfRange { ttl_seconds } => {
                HashMap::from([("ttl_seconds".to_owned(), json!(ttl_seconds))])
            }
            _ => Default::default(),
        }
    }
}
