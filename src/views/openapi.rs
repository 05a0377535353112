use axum::Json;
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::path::PathItem;
use utoipa::openapi::path::Operation;
use utoipa::openapi::security::HttpAuthScheme;
use utoipa::openapi::security::HttpBuilder;
use utoipa::openapi::security::SecurityScheme;

use crate::error::InternalError;

fn path_item_operations_mut(path_item: &mut PathItem) -> Vec<&mut Operation> {
    let mut operations = Vec::new();
    operations.extend(path_item.get.as_mut());
    operations.extend(path_item.put.as_mut());
    operations.extend(path_item.post.as_mut());
    operations.extend(path_item.delete.as_mut());
    operations.extend(path_item.patch.as_mut());
    operations
}

/// Declares the `bearer` scheme the protected routes refer to
struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .description(Some("Token returned by `POST /auth/login`"))
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Clubsite",
        description = "Season results, documents and admin sessions of the club website",
    ),
    paths(
        super::health,
        super::version,
        super::auth::login,
        super::auth::logout,
        super::auth::verify,
        super::results::create,
        super::results::list,
        super::results::get_by_business_key,
        super::results::get_image,
        super::results::update,
        super::results::delete,
        super::documents::create,
        super::documents::list,
        super::documents::get,
        super::documents::get_file,
        super::documents::update,
        super::documents::delete,
    ),
    components(schemas(InternalError, common::Version)),
    modifiers(&BearerSecurity),
    tags(
        (name = "auth", description = "Admin login and session tokens"),
        (name = "results", description = "Season results and their images"),
        (name = "documents", description = "Club documents and their PDF files"),
    )
)]
pub struct OpenApiRoot;

impl OpenApiRoot {
    // Drop the operation_id that defaults to the handler name, many handlers share one.
    fn remove_operation_id(openapi: &mut utoipa::openapi::OpenApi) {
        for (_, endpoint) in openapi.paths.paths.iter_mut() {
            for operation in path_item_operations_mut(endpoint) {
                operation.operation_id = None;
            }
        }
    }

    pub fn build_openapi() -> utoipa::openapi::OpenApi {
        let mut openapi = OpenApiRoot::openapi();
        Self::remove_operation_id(&mut openapi);
        openapi
    }
}

pub(in crate::views) async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(OpenApiRoot::build_openapi())
}
