pub mod attachment;
pub mod authn;
pub mod document;
pub mod prelude;
pub mod season_result;

// Export all Model at crate root
pub use attachment::Attachment;
pub use authn::AdminSession;
pub use authn::AdminUser;
pub use document::Document;
pub use document::DocumentChangeset;
pub use document::DocumentSummary;
pub use document::NewDocument;
pub use season_result::NewSeasonResult;
pub use season_result::SeasonResult;
pub use season_result::SeasonResultChangeset;
pub use season_result::SeasonResultSummary;

use std::sync::LazyLock;

use database::DatabaseError;

use diesel::result::DatabaseErrorInformation;
use diesel::result::DatabaseErrorKind;
use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unique constraint violation on table \"{table}\" for columns {columns:?}")]
    UniqueViolation { table: String, columns: Vec<String> },
    #[error("foreign key constraint violation: {message}")]
    ForeignKeyViolation { message: String },
    #[error("could not hash the password: {0}")]
    PasswordHashing(String),
    #[error("a session of {ttl_seconds}s would expire beyond the representable dates")]
    SessionExpiryOutOfRange { ttl_seconds: i64 },
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
}

impl Error {
    pub(crate) fn password_hashing(e: argon2::password_hash::Error) -> Self {
        Self::PasswordHashing(e.to_string())
    }
}

/// Parses SQLite's `UNIQUE constraint failed: table.col_a, table.col_b`
fn try_parse_unique_violation(e: &(dyn DatabaseErrorInformation + Send + Sync)) -> Option<Error> {
    static RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"^UNIQUE constraint failed: ([^.\s]+)\.(.+)$"#)
            .expect("unique violation pattern is valid")
    });
    let captures = RE.captures(e.message())?;
    let table = captures.get(1)?.as_str().to_owned();
    let columns = captures
        .get(2)?
        .as_str()
        .split(", ")
        .map(|qualified| {
            qualified
                .rsplit_once('.')
                .map_or(qualified, |(_, column)| column)
                .to_owned()
        })
        .collect();
    Some(Error::UniqueViolation { table, columns })
}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        match &e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, inner) => {
                try_parse_unique_violation(inner.as_ref()).unwrap_or_else(move || {
                    tracing::error!(error = %e, "failed to parse SQLite unique violation message");
                    Self::DatabaseError(e.into())
                })
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, inner) => {
                Self::ForeignKeyViolation {
                    message: inner.message().to_owned(),
                }
            }
            _ => Self::DatabaseError(e.into()),
        }
    }
}
