use std::collections::HashMap;
use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDateTime;
use clubsite_models::NewSeasonResult;
use clubsite_models::SeasonResult;
use clubsite_models::SeasonResultChangeset;
use clubsite_models::SeasonResultSummary;
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
pub(in crate::views) enum ResultError {
    #[error("Result '{result_id}' could not be found")]
    NotFound { result_id: i64 },

    #[error("No result for category '{category}' in year '{year}'")]
    BusinessKeyNotFound { category: String, year: String },

    #[error("A result for category '{category}' in year '{year}' already exists")]
    AlreadyExists { category: String, year: String },

    #[error(transparent)]
    Database(#[from] clubsite_models::Error),
}

impl ClubsiteError for ResultError {
    fn get_status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } | Self::BusinessKeyNotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyExists { .. } => StatusCode::CONFLICT,
            Self::Database(e) => e.get_status(),
        }
    }

    fn get_type(&self) -> &str {
        match self {
            Self::NotFound { .. } => "clubsite:results:NotFound",
            Self::BusinessKeyNotFound { .. } => "clubsite:results:BusinessKeyNotFound",
            Self::AlreadyExists { .. } => "clubsite:results:AlreadyExists",
            Self::Database(e) => e.get_type(),
        }
    }

    fn context(&self) -> HashMap<String, Value> {
        match self {
            Self::NotFound { result_id } => {
                HashMap::from([("result_id".to_owned(), json!(result_id))])
            }
            Self::BusinessKeyNotFound { category, year }
            | Self::AlreadyExists { category, year } => HashMap::from([
                ("category".to_owned(), json!(category)),
                ("year".to_owned(), json!(year)),
            ]),
            Self::Database(e) => e.context(),
        }
    }
}

/// A season result without its image payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub(in crate::views) struct SeasonResultResponse {
    pub id: i64,
    pub category: String,
    pub year: String,
    pub description: Option<String>,
    pub image_filename: String,
    pub image_mimetype: String,
    /// Where the image payload can be downloaded
    pub image_url: String,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: NaiveDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: NaiveDateTime,
}

impl From<SeasonResultSummary> for SeasonResultResponse {
    fn from(summary: SeasonResultSummary) -> Self {
        Self {
            image_url: format!("/results/{}/image", summary.id),
            id: summary.id,
            category: summary.category,
            year: summary.year,
            description: summary.description,
            image_filename: summary.image_filename,
            image_mimetype: summary.image_mimetype,
            created_at: summary.created_at,
            updated_at: summary.updated_at,
        }
    }
}

impl From<SeasonResult> for SeasonResultResponse {
    fn from(result: SeasonResult) -> Self {
        SeasonResultSummary::from(result).into()
    }
}

#[derive(ToSchema)]
#[allow(unused)] // Schema only
pub(in crate::views) struct SeasonResultForm {
    category: String,
    year: String,
    description: Option<String>,
    #[schema(value_type = String, format = Binary)]
    image: Vec<u8>,
}

#[derive(ToSchema)]
#[allow(unused)] // Schema only
pub(in crate::views) struct SeasonResultPatchForm {
    category: Option<String>,
    year: Option<String>,
    /// An empty value clears the description
    description: Option<String>,
    #[schema(value_type = Option<String>, format = Binary)]
    image: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub(in crate::views) struct ResultIdParam {
    /// The id of a season result
    key: i64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub(in crate::views) struct BusinessKeyParam {
    /// The category slug, for instance `mini-odbojka`
    key: String,
    /// The season, for instance `2024` or `2023/24`
    year: String,
}

const TEXT_FIELDS: &[&str] = &["category", "year", "description"];
const FILE_FIELD: &str = "image";

/// Create a season result, or replace the one already stored for its category and year
#[utoipa::path(
    post, path = "/results",
    tag = "results",
    request_body(content = SeasonResultForm, content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses(
        (status = 201, description = "The stored result", body = SeasonResultResponse),
        (status = 400, description = "A field is missing or malformed", body = InternalError),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
        (status = 413, description = "The image is too large", body = InternalError),
        (status = 415, description = "The image type is not supported", body = InternalError),
    )
)]
pub(in crate::views) async fn create(
    State(AppState { db_pool, config, .. }): State<AppState>,
    Extension(auth): AuthenticationExt,
    form: Multipart,
) -> Result<(StatusCode, Json<SeasonResultResponse>)> {
    auth.admin()?;
    let mut form = UploadForm::read(form, TEXT_FIELDS, FILE_FIELD, config.max_upload_size).await?;
    let new = NewSeasonResult {
        category: form.required("category")?,
        year: form.required("year")?,
        description: form.optional("description"),
        image: form.required_file(PayloadKind::Image)?,
    };

    let conn = &mut db_pool.get().await?;
    let result = SeasonResult::upsert(conn, new).await?;
    tracing::info!(
        id = result.id,
        category = %result.category,
        year = %result.year,
        "result stored"
    );
    Ok((StatusCode::CREATED, Json(result.into())))
}

/// List every season result, most recent season first
#[utoipa::path(
    get, path = "/results",
    tag = "results",
    responses(
        (status = 200, description = "All results", body = Vec<SeasonResultResponse>),
    )
)]
pub(in crate::views) async fn list(
    State(db_pool): State<Arc<DbConnectionPool>>,
) -> Result<Json<Vec<SeasonResultResponse>>> {
    let conn = &mut db_pool.get().await?;
    let results = SeasonResultSummary::list(conn).await?;
    Ok(Json(results.into_iter().map(Into::into).collect()))
}

/// Retrieve the result of a category for a season
#[utoipa::path(
    get, path = "/results/{key}/{year}",
    tag = "results",
    params(BusinessKeyParam),
    responses(
        (status = 200, description = "The result", body = SeasonResultResponse),
        (status = 404, description = "No result for this category and season", body = InternalError),
    )
)]
pub(in crate::views) async fn get_by_business_key(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Path(BusinessKeyParam {
        key: category,
        year,
    }): Path<BusinessKeyParam>,
) -> Result<Json<SeasonResultResponse>> {
    let conn = &mut db_pool.get().await?;
    let result =
        SeasonResultSummary::retrieve_by_business_key(conn, category.clone(), year.clone())
            .await?
            .ok_or(ResultError::BusinessKeyNotFound { category, year })?;
    Ok(Json(result.into()))
}

/// Download the image of a result
#[utoipa::path(
    get, path = "/results/{key}/image",
    tag = "results",
    params(ResultIdParam),
    responses(
        (status = 200, description = "The image, served with its stored media type", content_type = "image/*"),
        (status = 404, description = "Result not found", body = InternalError),
    )
)]
pub(in crate::views) async fn get_image(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Path(ResultIdParam { key: result_id }): Path<ResultIdParam>,
) -> Result<impl IntoResponse> {
    let conn = &mut db_pool.get().await?;
    let image = SeasonResult::retrieve_image(conn, result_id)
        .await?
        .ok_or(ResultError::NotFound { result_id })?;
    Ok(attachment_response(image))
}

/// Partially update a result
///
/// Only the provided fields change. A new image replaces the stored one.
#[utoipa::path(
    put, path = "/results/{key}",
    tag = "results",
    params(ResultIdParam),
    request_body(content = SeasonResultPatchForm, content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The updated result", body = SeasonResultResponse),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
        (status = 404, description = "Result not found", body = InternalError),
        (status = 409, description = "Another result already uses this category and season", body = InternalError),
        (status = 413, description = "The image is too large", body = InternalError),
        (status = 415, description = "The image type is not supported", body = InternalError),
    )
)]
pub(in crate::views) async fn update(
    State(AppState { db_pool, config, .. }): State<AppState>,
    Extension(auth): AuthenticationExt,
    Path(ResultIdParam { key: result_id }): Path<ResultIdParam>,
    form: Multipart,
) -> Result<Json<SeasonResultResponse>> {
    auth.admin()?;
    let mut form = UploadForm::read(form, TEXT_FIELDS, FILE_FIELD, config.max_upload_size).await?;
    let changeset = SeasonResultChangeset {
        category: form.optional("category"),
        year: form.optional("year"),
        description: form.nullable("description"),
        image: form.file(PayloadKind::Image)?,
    };

    let requested_key = (changeset.category.clone(), changeset.year.clone());

    let conn = &mut db_pool.get().await?;
    let result = match SeasonResult::update(conn, result_id, changeset).await {
        Ok(result) => result.ok_or(ResultError::NotFound { result_id })?,
        Err(clubsite_models::Error::UniqueViolation { .. }) => {
            let current = SeasonResult::retrieve_or_fail(conn, result_id, || {
                ResultError::NotFound { result_id }
            })
            .await?;
            let (category, year) = requested_key;
            return Err(ResultError::AlreadyExists {
                category: category.unwrap_or(current.category),
                year: year.unwrap_or(current.year),
            }
            .into());
        }
        Err(e) => return Err(ResultError::from(e).into()),
    };
    Ok(Json(result.into()))
}

/// Delete a result and its image
#[utoipa::path(
    delete, path = "/results/{key}",
    tag = "results",
    params(ResultIdParam),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "The result was deleted"),
        (status = 401, description = "Missing or invalid credentials", body = InternalError),
        (status = 404, description = "Result not found", body = InternalError),
    )
)]
pub(in crate::views) async fn delete(
    State(db_pool): State<Arc<DbConnectionPool>>,
    Extension(auth): AuthenticationExt,
    Path(ResultIdParam { key: result_id }): Path<ResultIdParam>,
) -> Result<StatusCode> {
    auth.admin()?;
    let conn = &mut db_pool.get().await?;
    SeasonResult::delete_static_or_fail(conn, result_id, || {
        ResultError::NotFound { result_id }
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum_test::multipart::Part;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::views::test_app::TestApp;
    use crate::views::test_app::TestAppBuilder;
    use crate::views::test_app::multipart_form;
    use crate::views::upload::fixtures::JPEG;
    use crate::views::upload::fixtures::PDF;
    use crate::views::upload::fixtures::PNG;

    impl TestApp {
        async fn create_result(
            &self,
            token: &str,
            category: &str,
            year: &str,
            description: &str,
            image: (&[u8], &str, &str),
        ) -> SeasonResultResponse {
            let (data, filename, mimetype) = image;
            let form = multipart_form(
                &[
                    ("category", category),
                    ("year", year),
                    ("description", description),
                ],
                Some(("image", data, filename, mimetype)),
            );
            self.fetch(self.post("/results").authorization_bearer(token).multipart(form))
                .await
                .assert_status(StatusCode::CREATED)
                .json_into()
        }

        async fn list_results(&self) -> Vec<SeasonResultResponse> {
            self.fetch(self.get("/results"))
                .await
                .assert_status(StatusCode::OK)
                .json_into()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn second_submission_replaces_the_first() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;

        let first = app
            .create_result(&token, "mini-odbojka", "2024", "A", (PNG, "a.png", "image/png"))
            .await;
        let second = app
            .create_result(&token, "mini-odbojka", "2024", "B", (JPEG, "b.jpg", "image/jpeg"))
            .await;

        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        let results = app.list_results().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].description.as_deref(), Some("B"));
        assert_eq!(results[0].image_filename, "b.jpg");
        assert_eq!(results[0].image_mimetype, "image/jpeg");

        let image = app
            .fetch(app.get(&results[0].image_url))
            .await
            .assert_status(StatusCode::OK);
        assert_eq!(image.content_type(), "image/jpeg");
        assert_eq!(image.bytes(), JPEG.to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn list_is_ordered_by_season_then_category() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        for (category, year) in [
            ("pionirji", "2023"),
            ("mini-odbojka", "2023"),
            ("pionirji", "2024"),
            ("kadeti", "2024"),
        ] {
            app.create_result(&token, category, year, "", (PNG, "r.png", "image/png"))
                .await;
        }

        let keys = app
            .list_results()
            .await
            .into_iter()
            .map(|result| (result.year, result.category))
            .collect::<Vec<_>>();

        assert_eq!(
            keys,
            vec![
                ("2024".to_owned(), "kadeti".to_owned()),
                ("2024".to_owned(), "pionirji".to_owned()),
                ("2023".to_owned(), "mini-odbojka".to_owned()),
                ("2023".to_owned(), "pionirji".to_owned()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn image_is_served_with_its_stored_metadata() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        let result = app
            .create_result(&token, "kadeti", "2023/24", "", (PNG, "podium.png", "image/png"))
            .await;
        assert_eq!(result.description, None);

        let response = app
            .fetch(app.get(&format!("/results/{}/image", result.id)))
            .await
            .assert_status(StatusCode::OK);

        assert_eq!(response.content_type(), "image/png");
        assert_eq!(
            response.header("Content-Disposition"),
            "inline; filename=\"podium.png\""
        );
        assert_eq!(response.bytes(), PNG.to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn lookup_by_business_key() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        let created = app
            .create_result(&token, "kadeti", "2023/24", "Prvaki", (PNG, "p.png", "image/png"))
            .await;

        let found: SeasonResultResponse = app
            .fetch(app.get("/results/kadeti/2023%2F24"))
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(found, created);

        let error: InternalError = app
            .fetch(app.get("/results/kadeti/2022"))
            .await
            .assert_status(StatusCode::NOT_FOUND)
            .json_into();
        assert_eq!(error.error_type, "clubsite:results:BusinessKeyNotFound");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn mutations_require_a_valid_token() {
        let app = TestAppBuilder::default_app();
        let form = multipart_form(
            &[("category", "kadeti"), ("year", "2024")],
            Some(("image", PNG, "p.png", "image/png")),
        );

        app.fetch(app.post("/results").multipart(form))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        app.fetch(app.delete("/results/1").authorization_bearer("forged"))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
        assert!(app.list_results().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn expired_token_cannot_upload() {
        let app = TestAppBuilder::new()
            .session_ttl(chrono::Duration::zero())
            .build();
        let token = app.admin_token().await;
        let form = multipart_form(
            &[("category", "kadeti"), ("year", "2024")],
            Some(("image", PNG, "p.png", "image/png")),
        );

        app.fetch(app.post("/results").authorization_bearer(&token).multipart(form))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn invalid_uploads_are_rejected_before_storing() {
        let app = TestAppBuilder::new().max_upload_size(1024).build();
        let token = app.admin_token().await;
        let oversized = [PNG, &[0u8; 2048][..]].concat();

        let cases: [(Vec<(&str, &str)>, Option<(&str, &[u8], &str, &str)>, StatusCode); 5] = [
            (
                vec![("category", "kadeti")],
                Some(("image", PNG, "p.png", "image/png")),
                StatusCode::BAD_REQUEST,
            ),
            (
                vec![("category", "kadeti"), ("year", "2024")],
                None,
                StatusCode::BAD_REQUEST,
            ),
            (
                vec![("category", "kadeti"), ("year", "2024"), ("coach", "Ana")],
                Some(("image", PNG, "p.png", "image/png")),
                StatusCode::BAD_REQUEST,
            ),
            (
                vec![("category", "kadeti"), ("year", "2024")],
                Some(("image", PDF, "p.pdf", "application/pdf")),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (
                vec![("category", "kadeti"), ("year", "2024")],
                Some(("image", oversized.as_slice(), "big.png", "image/png")),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
        ];
        for (texts, file, expected) in cases {
            let form = multipart_form(&texts, file);
            app.fetch(app.post("/results").authorization_bearer(&token).multipart(form))
                .await
                .assert_status(expected);
        }

        assert!(app.list_results().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn repeated_fields_are_rejected() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        let second_image = Part::bytes(JPEG.to_vec())
            .file_name("b.jpg")
            .mime_type("image/jpeg");

        let forms = [
            multipart_form(
                &[("category", "kadeti"), ("year", "2024")],
                Some(("image", PNG, "a.png", "image/png")),
            )
            .add_part("image", second_image),
            multipart_form(
                &[("category", "kadeti"), ("year", "2024"), ("year", "2025")],
                Some(("image", PNG, "a.png", "image/png")),
            ),
        ];
        for form in forms {
            let error: InternalError = app
                .fetch(app.post("/results").authorization_bearer(&token).multipart(form))
                .await
                .assert_status(StatusCode::BAD_REQUEST)
                .json_into();
            assert_eq!(error.error_type, "clubsite:upload:DuplicateField");
        }

        assert!(app.list_results().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn update_changes_only_provided_fields() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        let created = app
            .create_result(&token, "kadeti", "2024", "Drugo mesto", (PNG, "p.png", "image/png"))
            .await;

        let updated: SeasonResultResponse = app
            .fetch(
                app.put(&format!("/results/{}", created.id))
                    .authorization_bearer(&token)
                    .multipart(multipart_form(&[("description", "Prvo mesto")], None)),
            )
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(updated.description.as_deref(), Some("Prvo mesto"));
        assert_eq!(updated.category, "kadeti");
        assert_eq!(updated.image_filename, "p.png");

        let cleared: SeasonResultResponse = app
            .fetch(
                app.put(&format!("/results/{}", created.id))
                    .authorization_bearer(&token)
                    .multipart(multipart_form(
                        &[("description", "")],
                        Some(("image", JPEG, "final.jpg", "image/jpeg")),
                    )),
            )
            .await
            .assert_status(StatusCode::OK)
            .json_into();
        assert_eq!(cleared.description, None);
        assert_eq!(cleared.image_mimetype, "image/jpeg");
        let image = app
            .fetch(app.get(&cleared.image_url))
            .await
            .assert_status(StatusCode::OK)
            .bytes();
        assert_eq!(image, JPEG.to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn update_onto_a_taken_key_conflicts() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        app.create_result(&token, "kadeti", "2024", "", (PNG, "a.png", "image/png"))
            .await;
        let other = app
            .create_result(&token, "kadeti", "2023", "", (PNG, "b.png", "image/png"))
            .await;

        let error: InternalError = app
            .fetch(
                app.put(&format!("/results/{}", other.id))
                    .authorization_bearer(&token)
                    .multipart(multipart_form(&[("year", "2024")], None)),
            )
            .await
            .assert_status(StatusCode::CONFLICT)
            .json_into();

        assert_eq!(error.error_type, "clubsite:results:AlreadyExists");
        assert_eq!(error.context["year"], serde_json::json!("2024"));
        assert_eq!(app.list_results().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn update_of_unknown_result_is_not_found() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;

        app.fetch(
            app.put("/results/404")
                .authorization_bearer(&token)
                .multipart(multipart_form(&[("description", "x")], None)),
        )
        .await
        .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn deleted_result_disappears() {
        let app = TestAppBuilder::default_app();
        let token = app.admin_token().await;
        let result = app
            .create_result(&token, "kadeti", "2024", "", (PNG, "a.png", "image/png"))
            .await;

        app.fetch(
            app.delete(&format!("/results/{}", result.id))
                .authorization_bearer(&token),
        )
        .await
        .assert_status(StatusCode::NO_CONTENT);

        assert!(app.list_results().await.is_empty());
        app.fetch(app.get(&result.image_url))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.fetch(
            app.delete(&format!("/results/{}", result.id))
                .authorization_bearer(&token),
        )
        .await
        .assert_status(StatusCode::NOT_FOUND);
    }
}
