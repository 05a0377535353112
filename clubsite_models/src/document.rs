//! This module manage documents in the database.
//!
//! Each document is identified by a unique key (`i64`). Documents have no natural key,
//! every creation appends a row.

use chrono::NaiveDateTime;
use chrono::Utc;
use database::DbConnection;
use database::tables::documents;
use diesel::ExpressionMethods as _;
use diesel::OptionalExtension as _;
use diesel::QueryDsl as _;
use diesel::RunQueryDsl as _;
use diesel::SelectableHelper as _;

use crate::Attachment;
use crate::Error;
use crate::prelude::DeleteStatic;
use crate::prelude::Retrieve;

#[derive(Debug, Clone, PartialEq, diesel::Queryable, diesel::Selectable)]
#[diesel(table_name = documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub file_data: Vec<u8>,
    pub file_filename: String,
    pub file_mimetype: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, diesel::Queryable, diesel::Selectable)]
#[diesel(table_name = documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentSummary {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub file_filename: String,
    pub file_mimetype: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub category: String,
    pub description: Option<String>,
    pub file: Attachment,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentChangeset {
    pub title: Option<String>,
    pub category: Option<String>,
    pub description: Option<Option<String>>,
    pub file: Option<Attachment>,
}

#[derive(diesel::AsChangeset)]
#[diesel(table_name = documents)]
struct DocumentRowChangeset<'a> {
    title: Option<&'a str>,
    category: Option<&'a str>,
    file_data: Option<&'a [u8]>,
    file_filename: Option<&'a str>,
    file_mimetype: Option<&'a str>,
    description: Option<Option<&'a str>>,
    updated_at: NaiveDateTime,
}

impl DocumentChangeset {
    fn as_row(&self, now: NaiveDateTime) -> DocumentRowChangeset<'_> {
        DocumentRowChangeset {
            title: self.title.as_deref(),
            category: self.category.as_deref(),
            file_data: self.file.as_ref().map(|file| file.data.as_slice()),
            file_filename: self.file.as_ref().map(|file| file.filename.as_str()),
            file_mimetype: self.file.as_ref().map(|file| file.mimetype.as_str()),
            description: self.description.as_ref().map(Option::as_deref),
            updated_at: now,
        }
    }
}

impl From<Document> for DocumentSummary {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            title: document.title,
            category: document.category,
            file_filename: document.file_filename,
            file_mimetype: document.file_mimetype,
            description: document.description,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

impl Document {
    #[tracing::instrument(name = "model:document:create", skip_all, fields(title = %new.title))]
    pub async fn create(conn: &mut DbConnection, new: NewDocument) -> Result<Self, Error> {
        conn.interact(move |conn| {
            let now = Utc::now().naive_utc();
            diesel::insert_into(documents::table)
                .values((
                    documents::title.eq(new.title.as_str()),
                    documents::category.eq(new.category.as_str()),
                    documents::file_data.eq(new.file.data.as_slice()),
                    documents::file_filename.eq(new.file.filename.as_str()),
                    documents::file_mimetype.eq(new.file.mimetype.as_str()),
                    documents::description.eq(new.description.as_deref()),
                    documents::created_at.eq(now),
                    documents::updated_at.eq(now),
                ))
                .returning(Document::as_returning())
                .get_result(conn)
                .map_err(Error::from)
        })
        .await
    }

    pub async fn retrieve_file(
        conn: &mut DbConnection,
        id: i64,
    ) -> Result<Option<Attachment>, Error> {
        conn.interact(move |conn| {
            documents::table
                .find(id)
                .select((
                    documents::file_data,
                    documents::file_filename,
                    documents::file_mimetype,
                ))
                .first::<Attachment>(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }

    #[tracing::instrument(name = "model:document:update", skip(conn, changeset))]
    pub async fn update(
        conn: &mut DbConnection,
        id: i64,
        changeset: DocumentChangeset,
    ) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            let now = Utc::now().naive_utc();
            diesel::update(documents::table.find(id))
                .set(&changeset.as_row(now))
                .returning(Document::as_returning())
                .get_result(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }
}

impl Retrieve<i64> for Document {
    async fn retrieve(conn: &mut DbConnection, id: i64) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            documents::table
                .find(id)
                .select(Document::as_select())
                .first(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }
}

impl DeleteStatic<i64> for Document {
    async fn delete_static(conn: &mut DbConnection, id: i64) -> Result<bool, Error> {
        conn.interact(move |conn| {
            diesel::delete(documents::table.find(id))
                .execute(conn)
                .map(|deleted| deleted > 0)
                .map_err(Error::from)
        })
        .await
    }
}

impl Retrieve<i64> for DocumentSummary {
    async fn retrieve(conn: &mut DbConnection, id: i64) -> Result<Option<Self>, Error> {
        conn.interact(move |conn| {
            documents::table
                .find(id)
                .select(DocumentSummary::as_select())
                .first(conn)
                .optional()
                .map_err(Error::from)
        })
        .await
    }
}

impl DocumentSummary {
    /// Newest documents first, optionally restricted to one category
    pub async fn list(
        conn: &mut DbConnection,
        category: Option<String>,
    ) -> Result<Vec<Self>, Error> {
        conn.interact(move |conn| {
            let mut query = documents::table
                .select(DocumentSummary::as_select())
                .order((documents::created_at.desc(), documents::id.desc()))
                .into_boxed();
            if let Some(category) = category {
                query = query.filter(documents::category.eq(category));
            }
            query.load(conn).map_err(Error::from)
        })
        .await
    }
}
