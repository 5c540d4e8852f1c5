use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{middleware, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;

use crate::state::AppState;
use crate::{api, logging, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "trigwatch API",
        description = "Trigger definition, target verification and search API",
    ),
    tags(
        (name = "Health", description = "Service health"),
        (name = "Triggers", description = "Trigger management, verification and search")
    )
)]
struct ApiDoc;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let origin = if allowed.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_http_app(state: AppState) -> Router {
    let (router, spec) = api::routes().split_for_parts();
    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(spec);

    let cors = cors_layer(&state.config.api.cors_allowed_origins);
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::request_context,
        ))
        .with_state(state)
        .merge(openapi::json_route(Arc::new(merged_spec)))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
