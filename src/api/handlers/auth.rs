use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use crate::{
    api::{
        extract::AppJson,
        middleware::{CurrentUser, LOGGED_OUT, TOKEN_COOKIE},
        response::{MessageResponse, TokenResponse},
    },
    config::Config,
    error::AppResult,
    models::{
        ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RegisterRequest,
        ResetPasswordRequest,
    },
    services::auth::AuthService,
    AppState,
};

/// Seconds the logged-out placeholder cookie lingers.
const LOGOUT_COOKIE_SECS: i64 = 5;

fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(config.cookie.secure)
        .max_age(time::Duration::days(config.cookie.ttl_days))
        .build()
}

/// Sets the session cookie and echoes the token in the body.
fn with_session(state: &AppState, jar: CookieJar, token: String) -> (CookieJar, Json<TokenResponse>) {
    let jar = jar.add(session_cookie(&state.config, token.clone()));
    (jar, Json(TokenResponse::new(token)))
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(req): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, CookieJar, Json<TokenResponse>)> {
    let auth_service = AuthService::new(state.db.clone(), state.config.clone());
    let (_, token) = auth_service.register(req).await?;

    let (jar, body) = with_session(&state, jar, token);
    Ok((StatusCode::CREATED, jar, body))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let auth_service = AuthService::new(state.db.clone(), state.config.clone());
    let (user, token) = auth_service.login(&req.email, &req.password).await?;
    tracing::info!(user_id = %user.id, "user logged in");

    Ok(with_session(&state, jar, token))
}

pub async fn logout(
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    let cookie = Cookie::build((TOKEN_COOKIE, LOGGED_OUT))
        .path("/")
        .http_only(true)
        .max_age(time::Duration::seconds(LOGOUT_COOKIE_SECS))
        .build();
    tracing::info!(user_id = %user.id, email = %user.email, "user logged out");

    (jar.add(cookie), Json(MessageResponse::new("User logged out")))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let auth_service = AuthService::new(state.db, state.config);
    auth_service
        .change_password(user.id, &req.old_password, &req.new_password)
        .await?;

    Ok(Json(MessageResponse::new("Password changed successfully")))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(req): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let auth_service = AuthService::new(state.db, state.config);
    auth_service.forgot_password(&req.email).await?;

    Ok(Json(MessageResponse::new("Password reset token issued")))
}

pub async fn reset_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(token): Path<String>,
    AppJson(req): AppJson<ResetPasswordRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let auth_service = AuthService::new(state.db.clone(), state.config.clone());
    let (_, session) = auth_service.reset_password(&token, &req.password).await?;

    Ok(with_session(&state, jar, session))
}
