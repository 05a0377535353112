use diesel::RunQueryDsl;
use diesel::SqliteConnection;
use diesel::sql_query;
use diesel::sql_types::Text;

use super::MigrationError;

/// How a content table is laid out on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLayout {
    Missing,
    /// Payloads live on the filesystem, the row only stores their path
    Legacy { columns: Vec<String> },
    /// Payloads are stored inline
    Current,
}

impl TableLayout {
    /// Classifies `table` from its column list
    ///
    /// A table is legacy when it has `path_column` and lacks `data_column`.
    pub fn inspect(
        conn: &mut SqliteConnection,
        table: &str,
        path_column: &str,
        data_column: &str,
    ) -> Result<Self, MigrationError> {
        let columns = table_columns(conn, table)?;
        let has = |name: &str| columns.iter().any(|c| c == name);
        match (has(path_column), has(data_column)) {
            _ if columns.is_empty() => Ok(Self::Missing),
            (_, true) => Ok(Self::Current),
            (true, false) => Ok(Self::Legacy { columns }),
            (false, false) => Err(MigrationError::UnrecognizedLayout {
                table: table.to_owned(),
                columns,
            }),
        }
    }
}

#[derive(diesel::QueryableByName)]
struct ColumnName {
    #[diesel(sql_type = Text)]
    name: String,
}

/// Column names of `table` in declaration order, empty when the table does not exist
pub fn table_columns(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<String>, diesel::result::Error> {
    let columns = sql_query("SELECT name FROM pragma_table_info(?)")
        .bind::<Text, _>(table)
        .load::<ColumnName>(conn)?;
    Ok(columns.into_iter().map(|c| c.name).collect())
}
