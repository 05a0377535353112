use std::collections::HashMap;
use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDateTime;
use clubsite_models::Document;
use clubsite_models::DocumentChangeset;
use clubsite_models::DocumentSummary;
use clubsite_models::NewDocument;
use clubsite_models::prelude::*;
use database::DbConnectionPool;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use utoipa::IntoParams;
use utoipa::ToSchema;

use super::AppState;
use super::AuthenticationExt;
use super::upload::PayloadKind;
use super::upload::UploadForm;
use super::upload::attachment_response;
use crate::error::ClubsiteError;
use crate::error::InternalError;
use crate::error::Result;

#[derive(Debug, Error)]
pub(in crate::views) enum DocumentError {
    #[error("Document '{document_id}' could not be found")]
    NotFound { document_id: i64 },

    #[error(transparent)]
    Database(#[from] clubsite_models::Error),
}

impl ClubsiteError for DocumentError {
    fn get_status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Database(e) => e.get_status(),
        }
    }

    fn get_type(&self) -> &str {
        match self {
            Self::NotFound { .. } => "clubsite:documents:NotFound",
            Self::Database(e) => e.get_type(),
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::NotFound { document_id } => {
                HashMap::from([("document_id".to_owned(), json!(document_id))])
            }
            Self::Database(e) => e.context(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct DocumentResponse {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub description: Option<String>,
    pub file_filename: String,
    pub file_mimetype: String,
    pub file_url: String,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: NaiveDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: NaiveDateTime,
}

impl From<DocumentSummary> for DocumentResponse {
    fn from(summary: DocumentSummary) -> Self {
        Self {
            file_url: format!("/documents/{}/file", summary.id),
            id: summary.id,
            title: summary.title,
            category: summary.category,
            description: summary.description,
            file_filename: summary.file_filename,
            file_mimetype: summary.file_mimetype,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        DocumentSummary::from(document).into()
    }
}

#[derive(ToSchema)]
#[allow(unused)] // Schema only
pub(in crate::views) struct DocumentForm {
    title: String,
    category: String,
    description: Option<String>,
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(ToSchema)]
#[allow(unused)] // Schema only
pub(in crate::views) struct DocumentPatchForm {
    title: Option<String>,
    category: Option<String>,
    /// An empty value clears the description
    description: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    file: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub(in crate::views) struct DocumentIdParam {
    /// The id of a document
    document_id: i64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub(in crate::views) struct DocumentListQuery {
    /// Only list the documents of this category
    category: Option<String>,
}

const TEXT_FIELDS: &[&str] = &["title", "category", "description"];
const FILE_FIELD: &str = "file";

/// Upload a document
#[utoipa::path(
    post, path = "/documents",
    tag = "documents",
    request_body(content = DocumentForm, content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses(
        (status = 201, description = "The created document", body = DocumentResponse),
        (status = 400, description = "A field is missing or malformed", body = InternalError),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
        (status = 413, description = "The file is too large", body = InternalError),
        (status = 415, description = "The file is not a PDF", body = InternalError),
    )
)]
pub(in crate::views) async fn create(
    State(AppState { db_pool, config, .. }): State<AppState>,
    Extension(auth): AuthenticationExt,
    form: Multipart,
) -> Result<(StatusCode, Json<DocumentResponse>)> {
    auth.admin()?;
    let mut form = UploadForm::read(form, TEXT_FIELDS, FILE_FIELD, config.max_upload_size).await?;
    let new = NewDocument {
        title: form.required("title")?,
        category: form.required("category")?,
        description: form.optional("description"),
        file: form.required_file(PayloadKind::Pdf)?,
    };

    let conn = &mut db_pool.get().await?;
    let document = Document::create(conn, new)
        .await
        .map_err(DocumentError::from)?;
    tracing::info!(id = document.id, title = %document.title, "document stored");
    Ok((StatusCode::CREATED, Json(document.into())))
}

/// List documents, newest first
#[utoipa::path(
    get, path = "/documents",
    tag = "documents",
    params(DocumentListQuery),
    responses(
        (status = 200, description = "The documents", body = Vec<DocumentResponse>),
    )
)]
pub(in crate::views) async fn list(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Query(DocumentListQuery { category }): Query<DocumentListQuery>,
) -> Result<Json<Vec<DocumentResponse>>> {
    let conn = &mut db_pool.get().await?;
    let category = category.filter(|category| !category.is_empty());
    let documents = DocumentSummary::list(conn, category)
        .await
        .map_err(DocumentError::from)?;
    Ok(Json(documents.into_iter().map(Into::into).collect()))
}

/// Retrieve the metadata of a document
#[utoipa::path(
    get, path = "/documents/{document_id}",
    tag = "documents",
    params(DocumentIdParam),
    responses(
        (status = 200, description = "The document", body = DocumentResponse),
        (status = 404, description = "Document not found", body = InternalError),
    )
)]
pub(in crate::views) async fn get(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Path(DocumentIdParam { document_id }): Path<DocumentIdParam>,
) -> Result<Json<DocumentResponse>> {
    let conn = &mut db_pool.get().await?;
    let document = DocumentSummary::retrieve_or_fail(conn, document_id, || {
        DocumentError::NotFound { document_id }
    })
    .await?;
    Ok(Json(document.into()))
}

/// Download the file of a document
#[utoipa::path(
    get, path = "/documents/{document_id}/file",
    tag = "documents",
    params(DocumentIdParam),
    responses(
        (status = 200, description = "The PDF payload", content_type = "application/pdf"),
        (status = 404, description = "Document not found", body = InternalError),
    )
)]
pub(in crate::views) async fn get_file(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Path(DocumentIdParam { document_id }): Path<DocumentIdParam>,
) -> Result<impl IntoResponse> {
    let conn = &mut db_pool.get().await?;
    let file = Document::retrieve_file(conn, document_id)
        .await
        .map_err(DocumentError::from)?
        .ok_or(DocumentError::NotFound { document_id })?;
    Ok(attachment_response(file))
}

/// Partially update a document
#[utoipa::path(
    put, path = "/documents/{document_id}",
    tag = "documents",
    params(DocumentIdParam),
    request_body(content = DocumentPatchForm, content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The updated document", body = DocumentResponse),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
        (status = 404, description = "Document not found", body = InternalError),
        (status = 413, description = "The file is too large", body = InternalError),
        (status = 415, description = "The file is not a PDF", body = InternalError),
    )
)]
pub(in crate::views) async fn update(
    State(AppState { db_pool, config, .. }): State<AppState>,
    Extension(auth): AuthenticationExt,
    Path(DocumentIdParam { document_id }): Path<DocumentIdParam>,
    form: Multipart,
) -> Result<Json<DocumentResponse>> {
    auth.admin()?;
    let mut form = UploadForm::read(form, TEXT_FIELDS, FILE_FIELD, config.max_upload_size).await?;
    let changeset = DocumentChangeset {
        title: form.optional("title"),
        category: form.optional("category"),
        description: form.nullable("description"),
        file: form.file(PayloadKind::Pdf)?,
    };

    let conn = &mut db_pool.get().await?;
    let document = Document::update(conn, document_id, changeset)
        .await
        .map_err(DocumentError::from)?
        .ok_or(DocumentError::NotFound { document_id })?;
    Ok(Json(document.into()))
}

/// Delete a document and its file
#[utoipa::path(
    delete, path = "/documents/{document_id}",
    tag = "documents",
    params(DocumentIdParam),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "The document was deleted"),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
        (status = 404, description = "Document not found", body = InternalError),
    )
)]
pub(in crate::views) async fn delete(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Extension(auth): AuthenticationExt,
    Path(DocumentIdParam { document_id }): Path<DocumentIdParam>,
) -> Result<StatusCode> {
    auth.admin()?;
    let conn = &mut db_pool.get().await?;
    Document::delete_static_or_fail(conn, document_id, || DocumentError::NotFound {
        document_id,
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
