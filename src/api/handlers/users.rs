use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::{
    api::{
        extract::{parse_id, AppJson},
        middleware::CurrentUser,
        response::{DataResponse, MessageResponse},
    },
    error::AppResult,
    models::{UpdateUserRequest, User},
    services::{advanced_results::AdvancedResults, users::UsersService},
    AppState,
};

pub async fn get_all_users(Extension(results): Extension<AdvancedResults>) -> Json<AdvancedResults> {
    Json(results)
}

pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<DataResponse<User>>> {
    let user = UsersService::new(state.db).get(user.id).await?;
    Ok(Json(DataResponse::new(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<User>>> {
    let id = parse_id(&id)?;
    let user = UsersService::new(state.db).get(id).await?;
    Ok(Json(DataResponse::new(user)))
}

pub async fn edit_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateUserRequest>,
) -> AppResult<Json<DataResponse<User>>> {
    let id = parse_id(&id)?;
    let updated = UsersService::new(state.db).update(id, user.id, req).await?;
    Ok(Json(DataResponse::new(updated)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id(&id)?;
    UsersService::new(state.db).delete(id, user.id).await?;
    Ok(Json(MessageResponse::new("User successfully removed")))
}
