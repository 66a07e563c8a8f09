//! Route configuration.

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderName, Method, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post};
use chunkline_protocol::constants::{
    DOWNLOAD_PATH, HEALTH_PATH, TUS_CHECKSUM_ALGORITHM, TUS_EXTENSION, TUS_HEADERS, TUS_MAX_SIZE,
    TUS_RESUMABLE, TUS_VERSION, UPLOAD_CHECKSUM, UPLOAD_EXPIRES, UPLOAD_LENGTH, UPLOAD_METADATA,
    UPLOAD_OFFSET, UPLOADS_INFO_PATH, UPLOADS_PATH,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{files, tus};
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let tus_routes = Router::new()
        .route(UPLOADS_PATH, post(tus::create_upload))
        .route(
            &format!("{UPLOADS_PATH}/{{id}}"),
            patch(tus::append_chunk)
                .head(tus::query_offset)
                .delete(tus::terminate_upload),
        )
        .layer(middleware::map_response(tus::add_resumable_header))
        .layer(DefaultBodyLimit::max(state.config.body_limit()));

    Router::new()
        .merge(tus_routes)
        .route(UPLOADS_INFO_PATH, get(files::list_uploads))
        .route(&format!("{DOWNLOAD_PATH}/{{id}}"), get(files::download))
        .route(HEALTH_PATH, get(files::health))
        .layer(cors_layer(&state.config))
        .layer(middleware::from_fn_with_state(state.clone(), tus_discovery))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answers tus capability discovery before the CORS layer, which treats every
/// `OPTIONS` as a preflight.
async fn tus_discovery(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let is_discovery = request.method() == Method::OPTIONS
        && request.uri().path() == UPLOADS_PATH
        && !request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    if is_discovery {
        return tus::add_resumable_header(tus::options(State(state)).await).await;
    }
    next.run(request).await
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let allowed: Vec<HeaderName> = TUS_HEADERS
        .into_iter()
        .chain([UPLOAD_CHECKSUM, "x-requested-with"])
        .map(HeaderName::from_static)
        .chain([header::CONTENT_TYPE, header::AUTHORIZATION])
        .collect();
    let exposed: Vec<HeaderName> = [
        UPLOAD_OFFSET,
        UPLOAD_LENGTH,
        UPLOAD_METADATA,
        UPLOAD_EXPIRES,
        TUS_EXTENSION,
        TUS_MAX_SIZE,
        TUS_CHECKSUM_ALGORITHM,
        TUS_RESUMABLE,
        TUS_VERSION,
    ]
    .into_iter()
    .map(HeaderName::from_static)
    .chain([header::LOCATION, header::CONTENT_LOCATION])
    .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::HEAD,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(allowed)
        .expose_headers(exposed);

    if config.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        layer
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}
