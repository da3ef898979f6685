use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
    Extension,
};
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::{
        advanced_results::{advanced_results, ListEndpoint, ListSource},
        auth::validate_token,
        devices::DevicesService,
        filter::{EntityKind, QueryParams},
        users::UsersService,
    },
    AppState,
};

/// Name of the session cookie set on login.
pub const TOKEN_COOKIE: &str = "token";

/// Value written to the session cookie on logout.
pub const LOGGED_OUT: &str = "none";

/// Authenticated caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: String,
}

/// Bearer header wins over the session cookie.
fn session_token(request: &Request, jar: &CookieJar) -> Option<String> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| {
        jar.get(TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty() && v != LOGGED_OUT)
    })
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(&request, &jar).ok_or_else(AppError::not_authorized)?;

    let claims = validate_token(&state.config.jwt, &token).map_err(|e| {
        tracing::debug!("rejected session token: {}", e);
        AppError::not_authorized()
    })?;

    // tokens outlive deleted accounts
    let user = UsersService::new(state.db.clone())
        .find_by_id(claims.user_id()?)
        .await?
        .ok_or_else(AppError::not_authorized)?;

    request.extensions_mut().insert(CurrentUser {
        id: user.id,
        email: user.email,
    });

    Ok(next.run(request).await)
}

/// State for [`advanced_results_middleware`]: which list a route serves.
#[derive(Clone)]
pub struct ListContext {
    pub state: AppState,
    pub endpoint: ListEndpoint,
}

impl ListContext {
    pub fn new(state: AppState, endpoint: ListEndpoint) -> Self {
        Self { state, endpoint }
    }
}

/// Runs the list query for the route and leaves the result in extensions.
/// Must sit inside [`auth_middleware`].
pub async fn advanced_results_middleware(
    State(ctx): State<ListContext>,
    Extension(user): Extension<CurrentUser>,
    params: QueryParams,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let source: Box<dyn ListSource> = match ctx.endpoint.entity {
        EntityKind::Devices => Box::new(DevicesService::new(ctx.state.db.clone())),
        EntityKind::Users => Box::new(UsersService::new(ctx.state.db.clone())),
    };

    let results = advanced_results(source.as_ref(), ctx.endpoint, &params, user.id).await?;
    request.extensions_mut().insert(results);

    Ok(next.run(request).await)
}
