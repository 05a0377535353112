use std::path::Path;
use std::path::PathBuf;

use diesel::RunQueryDsl;
use diesel::SqliteConnection;
use diesel::connection::SimpleConnection as _;
use diesel::sql_query;
use diesel::sql_types::BigInt;
use diesel::sql_types::Binary;
use diesel::sql_types::Nullable;
use diesel::sql_types::Text;
use tracing::warn;

use super::MigrationError;
use super::MigrationOptions;
use super::TableLayout;

/// A column carried over from the legacy table, with the SQL used when the value is NULL
type KeptColumn = (&'static str, Option<&'static str>);

pub(super) struct LegacyTable {
    table: &'static str,
    path_column: &'static str,
    data_column: &'static str,
    filename_column: &'static str,
    mimetype_column: &'static str,
    kept_columns: &'static [KeptColumn],
    ddl: fn(&str) -> String,
}

pub(super) const LEGACY_RESULTS: LegacyTable = LegacyTable {
    table: "results",
    path_column: "image_path",
    data_column: "image_data",
    filename_column: "image_filename",
    mimetype_column: "image_mimetype",
    kept_columns: &[
        ("id", None),
        ("category", None),
        ("year", None),
        ("description", None),
        ("created_at", Some("CURRENT_TIMESTAMP")),
        ("updated_at", Some("CURRENT_TIMESTAMP")),
    ],
    ddl: super::results_table_ddl,
};

pub(super) const LEGACY_DOCUMENTS: LegacyTable = LegacyTable {
    table: "documents",
    path_column: "file_path",
    data_column: "file_data",
    filename_column: "file_filename",
    mimetype_column: "file_mimetype",
    kept_columns: &[
        ("id", None),
        ("title", None),
        ("category", None),
        ("description", None),
        ("created_at", Some("CURRENT_TIMESTAMP")),
        ("updated_at", Some("CURRENT_TIMESTAMP")),
    ],
    ddl: super::documents_table_ddl,
};

/// Outcome of inlining the payloads of one legacy table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyCopyReport {
    pub table: &'static str,
    pub copied: usize,
    pub dropped: Vec<DroppedRow>,
}

/// A legacy row left behind because its file could not be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    pub id: i64,
    pub path: Option<String>,
    pub reason: String,
}

#[derive(diesel::QueryableByName)]
struct LegacyPayloadRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Nullable<Text>)]
    path: Option<String>,
}

#[derive(Debug)]
struct Payload {
    data: Vec<u8>,
    filename: String,
    mimetype: String,
}

#[derive(Debug, thiserror::Error)]
enum UnreadablePayload {
    #[error("no file path recorded")]
    NoPath,
    #[error("could not read '{0}': {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Where a stored legacy path points to
///
/// Absolute paths that exist are used as they are. Anything else is taken relative to
/// `uploads_dir`, ignoring leading slashes (the legacy app stored URL-like paths).
fn resolve_legacy_path(uploads_dir: &Path, stored: &str) -> PathBuf {
    let stored_path = Path::new(stored);
    if stored_path.is_absolute() && stored_path.is_file() {
        return stored_path.to_path_buf();
    }
    uploads_dir.join(stored.trim_start_matches(['/', '\\']))
}

fn read_payload(uploads_dir: &Path, stored: Option<&str>) -> Result<Payload, UnreadablePayload> {
    let stored = stored
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(UnreadablePayload::NoPath)?;
    let path = resolve_legacy_path(uploads_dir, stored);
    let data = std::fs::read(&path).map_err(|e| UnreadablePayload::Io(path.clone(), e))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| stored.to_owned());
    let mimetype = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned();
    Ok(Payload {
        data,
        filename,
        mimetype,
    })
}

/// Swaps a legacy table into the inline payload layout
///
/// Rows are copied into `<table>_migration`, which then replaces the legacy table.
/// Returns `None` when there is nothing to migrate.
pub(super) fn inline_payloads(
    conn: &mut SqliteConnection,
    legacy: &LegacyTable,
    options: &MigrationOptions,
) -> Result<Option<LegacyCopyReport>, MigrationError> {
    let columns = match TableLayout::inspect(
        conn,
        legacy.table,
        legacy.path_column,
        legacy.data_column,
    )? {
        TableLayout::Missing | TableLayout::Current => return Ok(None),
        TableLayout::Legacy { columns } => columns,
    };
    if !columns.iter().any(|c| c == "id") {
        return Err(MigrationError::UnrecognizedLayout {
            table: legacy.table.to_owned(),
            columns,
        });
    }

    let table = legacy.table;
    let staging = format!("{table}_migration");
    conn.batch_execute(&format!("DROP TABLE IF EXISTS {staging};"))?;
    conn.batch_execute(&(legacy.ddl)(&staging))?;

    let kept = legacy
        .kept_columns
        .iter()
        .filter(|(name, _)| columns.iter().any(|c| c == name))
        .collect::<Vec<_>>();
    let targets = kept
        .iter()
        .map(|(name, _)| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sources = kept
        .iter()
        .map(|(name, fallback)| match fallback {
            Some(fallback) => format!("COALESCE(\"{name}\", {fallback})"),
            None => format!("\"{name}\""),
        })
        .collect::<Vec<_>>()
        .join(", ");
    // payload columns are filled row by row below
    sql_query(format!(
        "INSERT INTO {staging} ({targets}, {data}, {filename}, {mimetype}) \
         SELECT {sources}, X'', '', '' FROM {table}",
        data = legacy.data_column,
        filename = legacy.filename_column,
        mimetype = legacy.mimetype_column,
    ))
    .execute(conn)?;

    let rows = sql_query(format!(
        "SELECT id, \"{path}\" AS path FROM {table} ORDER BY id",
        path = legacy.path_column
    ))
    .load::<LegacyPayloadRow>(conn)?;

    let mut report = LegacyCopyReport {
        table,
        copied: 0,
        dropped: Vec::new(),
    };
    for row in rows {
        match read_payload(&options.legacy_uploads_dir, row.path.as_deref()) {
            Ok(payload) => {
                sql_query(format!(
                    "UPDATE {staging} SET {data} = ?, {filename} = ?, {mimetype} = ? WHERE id = ?",
                    data = legacy.data_column,
                    filename = legacy.filename_column,
                    mimetype = legacy.mimetype_column,
                ))
                .bind::<Binary, _>(payload.data)
                .bind::<Text, _>(payload.filename)
                .bind::<Text, _>(payload.mimetype)
                .bind::<BigInt, _>(row.id)
                .execute(conn)?;
                report.copied += 1;
            }
            Err(reason) => {
                warn!(table, id = row.id, %reason, "dropping legacy row with unreadable payload");
                sql_query(format!("DELETE FROM {staging} WHERE id = ?"))
                    .bind::<BigInt, _>(row.id)
                    .execute(conn)?;
                report.dropped.push(DroppedRow {
                    id: row.id,
                    path: row.path,
                    reason: reason.to_string(),
                });
            }
        }
    }

    // ids handed out by the legacy table must stay burnt
    conn.batch_execute(&format!(
        "UPDATE sqlite_sequence
             SET seq = (SELECT MAX(seq) FROM sqlite_sequence WHERE name IN ('{table}', '{staging}'))
             WHERE name = '{staging}';
         INSERT INTO sqlite_sequence (name, seq)
             SELECT '{staging}', seq FROM sqlite_sequence
             WHERE name = '{table}'
             AND NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = '{staging}');
         DROP TABLE {table};
         ALTER TABLE {staging} RENAME TO {table};"
    ))?;

    Ok(Some(report))
}
