use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::{
    handlers,
    middleware::{advanced_results_middleware, auth_middleware, ListContext},
};
use crate::{config::Config, services::advanced_results::ListEndpoint, AppState};

/// Room for multipart boundaries and part headers around the image itself.
const MULTIPART_SLACK: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router<AppState> {
    let image_limit = state.config.uploads.max_image_bytes() as usize + MULTIPART_SLACK;

    // Public auth routes
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/auth/forgotPassword", post(handlers::auth::forgot_password))
        .route("/auth/resetPassword/:token", put(handlers::auth::reset_password));

    // User routes (protected)
    let user_routes = Router::new()
        .route("/auth/logout", get(handlers::auth::logout))
        .route("/auth/changePassword", put(handlers::auth::change_password))
        .route(
            "/",
            get(handlers::users::get_all_users).route_layer(middleware::from_fn_with_state(
                ListContext::new(state.clone(), ListEndpoint::users()),
                advanced_results_middleware,
            )),
        )
        .route("/me", get(handlers::users::get_current_user))
        .route("/:id", get(handlers::users::get_user))
        .route("/:id", put(handlers::users::edit_user))
        .route("/:id", delete(handlers::users::delete_user))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Device routes (protected)
    let device_routes = Router::new()
        .route(
            "/",
            get(handlers::devices::get_all_devices).route_layer(middleware::from_fn_with_state(
                ListContext::new(state.clone(), ListEndpoint::devices()),
                advanced_results_middleware,
            )),
        )
        .route("/", post(handlers::devices::create_device))
        .route("/:id", get(handlers::devices::get_device))
        .route("/:id", put(handlers::devices::edit_device))
        .route("/:id", delete(handlers::devices::delete_device))
        .route(
            "/:id/image",
            put(handlers::devices::upload_image).layer(DefaultBodyLimit::max(image_limit)),
        )
        .route("/:id/image", get(handlers::devices::get_image))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/users", auth_routes.merge(user_routes))
        .nest("/devices", device_routes)
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
}

/// Full application: health check plus the versioned API.
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", create_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
