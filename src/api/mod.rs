//! HTTP layer: the JSON-RPC endpoint, interceptors, uploads, and system
//! routes.

pub mod handlers;
pub mod middleware;
pub mod upload;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};

/// OpenAPI document for the plain HTTP routes.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "rpc-gateway",
        description = "JSON-RPC over HTTP and WebSocket with per-address credit rate limiting"
    ),
    paths(handlers::system::health_handler),
    components(schemas(
        handlers::system::HealthResponse,
        upload::FormFile,
        ErrorResponse,
        ErrorBody
    )),
    tags((name = "System", description = "Service status"))
)]
pub struct ApiDoc;

/// Builds the system router, with Swagger UI when the feature is enabled.
pub fn build_router() -> Router<AppState> {
    let router = Router::new().merge(handlers::system::routes());
    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );
    #[cfg(not(feature = "swagger-ui"))]
    let router = router.route(
        "/api-docs/openapi.json",
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    );
    router
}
