//! Versioned schema migrations
//!
//! The applied version is stored in `PRAGMA user_version`. Each step runs in an
//! `IMMEDIATE` transaction together with the version bump, so a failing step leaves
//! the database exactly as it found it.

mod layout;
mod legacy;

use std::path::PathBuf;

use diesel::RunQueryDsl;
use diesel::SqliteConnection;
use diesel::connection::SimpleConnection as _;
use diesel::sql_query;
use diesel::sql_types::Integer;
use tracing::info;

use crate::DatabaseError;

pub use layout::TableLayout;
pub use layout::table_columns;
pub use legacy::DroppedRow;
pub use legacy::LegacyCopyReport;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Directory the legacy file paths are resolved against
    pub legacy_uploads_dir: PathBuf,
}

impl MigrationOptions {
    pub fn new(legacy_uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            legacy_uploads_dir: legacy_uploads_dir.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
    #[error(transparent)]
    Connection(#[from] DatabaseError),
    #[error("database schema version {found} is newer than the latest known version {latest}")]
    UnknownVersion { found: i32, latest: i32 },
    #[error("table '{table}' matches neither the legacy nor the current layout (columns: {columns:?})")]
    UnrecognizedLayout { table: String, columns: Vec<String> },
}

/// What a call to [run_pending_migrations] did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationSummary {
    pub from_version: i32,
    pub to_version: i32,
    pub applied: Vec<&'static str>,
    pub legacy_copies: Vec<LegacyCopyReport>,
}

type Step = fn(
    &mut SqliteConnection,
    &MigrationOptions,
    &mut MigrationSummary,
) -> Result<(), MigrationError>;

struct Migration {
    version: i32,
    name: &'static str,
    up: Step,
}

const MIGRATIONS: [Migration; 4] = [
    Migration {
        version: 1,
        name: "inline_result_payloads",
        up: inline_result_payloads,
    },
    Migration {
        version: 2,
        name: "inline_document_payloads",
        up: inline_document_payloads,
    },
    Migration {
        version: 3,
        name: "create_content_tables",
        up: create_content_tables,
    },
    Migration {
        version: 4,
        name: "create_admin_sessions",
        up: create_admin_sessions,
    },
];

fn inline_result_payloads(
    conn: &mut SqliteConnection,
    options: &MigrationOptions,
    summary: &mut MigrationSummary,
) -> Result<(), MigrationError> {
    let report = legacy::inline_payloads(conn, &legacy::LEGACY_RESULTS, options)?;
    summary.legacy_copies.extend(report);
    Ok(())
}

fn inline_document_payloads(
    conn: &mut SqliteConnection,
    options: &MigrationOptions,
    summary: &mut MigrationSummary,
) -> Result<(), MigrationError> {
    let report = legacy::inline_payloads(conn, &legacy::LEGACY_DOCUMENTS, options)?;
    summary.legacy_copies.extend(report);
    Ok(())
}

fn create_content_tables(
    conn: &mut SqliteConnection,
    _: &MigrationOptions,
    _: &mut MigrationSummary,
) -> Result<(), MigrationError> {
    conn.batch_execute(&results_table_ddl("results"))?;
    conn.batch_execute(&documents_table_ddl("documents"))?;
    conn.batch_execute(ADMIN_USERS_DDL)?;
    Ok(())
}

fn create_admin_sessions(
    conn: &mut SqliteConnection,
    _: &MigrationOptions,
    _: &mut MigrationSummary,
) -> Result<(), MigrationError> {
    conn.batch_execute(ADMIN_SESSIONS_DDL)?;
    Ok(())
}

const ADMIN_USERS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS admin_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const ADMIN_SESSIONS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS admin_sessions (
    token_hash TEXT PRIMARY KEY NOT NULL,
    user_id INTEGER NOT NULL REFERENCES admin_users (id) ON DELETE CASCADE,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    expires_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS admin_sessions_expires_at ON admin_sessions (expires_at);
"#;

pub(crate) fn results_table_ddl(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    year TEXT NOT NULL,
    image_data BLOB NOT NULL,
    image_filename TEXT NOT NULL,
    image_mimetype TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (category, year)
);
"#
    )
}

pub(crate) fn documents_table_ddl(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {name} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    file_data BLOB NOT NULL,
    file_filename TEXT NOT NULL,
    file_mimetype TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#
    )
}

/// The version a fully migrated database reports
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or_default()
}

#[derive(diesel::QueryableByName)]
struct UserVersion {
    #[diesel(sql_type = Integer)]
    user_version: i32,
}

pub fn schema_version(conn: &mut SqliteConnection) -> Result<i32, diesel::result::Error> {
    let version = sql_query("PRAGMA user_version").get_result::<UserVersion>(conn)?;
    Ok(version.user_version)
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> diesel::QueryResult<()> {
    // PRAGMA arguments cannot be bound
    conn.batch_execute(&format!("PRAGMA user_version = {version}"))
}

/// Brings the database up to [latest_version]
///
/// Must run before the server accepts requests. Already applied steps are skipped.
#[tracing::instrument(skip_all, fields(legacy_uploads_dir = %options.legacy_uploads_dir.display()))]
pub fn run_pending_migrations(
    conn: &mut SqliteConnection,
    options: &MigrationOptions,
) -> Result<MigrationSummary, MigrationError> {
    // journal_mode cannot change inside a transaction
    conn.batch_execute("PRAGMA journal_mode = WAL;")?;

    let from_version = schema_version(conn)?;
    let latest = latest_version();
    if from_version > latest {
        return Err(MigrationError::UnknownVersion {
            found: from_version,
            latest,
        });
    }

    let mut summary = MigrationSummary {
        from_version,
        to_version: from_version,
        ..Default::default()
    };
    for migration in MIGRATIONS.iter().filter(|m| m.version > from_version) {
        conn.immediate_transaction(|conn| {
            (migration.up)(conn, options, &mut summary)?;
            set_schema_version(conn, migration.version)?;
            Ok::<_, MigrationError>(())
        })?;
        info!(
            version = migration.version,
            name = migration.name,
            "migration applied"
        );
        summary.to_version = migration.version;
        summary.applied.push(migration.name);
    }
    for report in &summary.legacy_copies {
        info!(
            table = report.table,
            copied = report.copied,
            dropped = report.dropped.len(),
            "legacy payloads inlined"
        );
    }
    Ok(summary)
}
