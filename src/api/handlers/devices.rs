use axum::{
    extract::{Multipart, Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    Extension, Json,
};

use crate::{
    api::{
        extract::{parse_id, AppJson, JsonOrDefault},
        middleware::CurrentUser,
        response::{DataResponse, MessageResponse},
    },
    error::AppResult,
    models::{CreateDeviceRequest, Device, UpdateDeviceRequest},
    services::{
        advanced_results::AdvancedResults,
        checkout::UpdateMode,
        devices::{DevicesService, ImageUpload},
        filter::QueryParams,
    },
    AppState,
};

/// Multipart field carrying the device image.
const IMAGE_FIELD: &str = "file";

pub async fn get_all_devices(
    Extension(results): Extension<AdvancedResults>,
) -> Json<AdvancedResults> {
    Json(results)
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Device>>> {
    let id = parse_id(&id)?;
    let device = DevicesService::new(state.db).get(id).await?;
    Ok(Json(DataResponse::new(device)))
}

pub async fn create_device(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    AppJson(req): AppJson<CreateDeviceRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<Device>>)> {
    let device = DevicesService::new(state.db).create(user.id, req).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(device))))
}

/// `PUT /devices/:id`. With `?check` the body is a checkout or checkin.
/// A missing body is an empty update, so the device lookup reports first.
pub async fn edit_device(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    params: QueryParams,
    JsonOrDefault(req): JsonOrDefault<UpdateDeviceRequest>,
) -> AppResult<Json<DataResponse<Device>>> {
    let id = parse_id(&id)?;
    let mode = if params.contains("check") {
        UpdateMode::Checkout
    } else {
        UpdateMode::GeneralEdit
    };

    let device = DevicesService::new(state.db)
        .update(id, user.id, mode, req)
        .await?;
    Ok(Json(DataResponse::new(device)))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id(&id)?;
    DevicesService::new(state.db).delete(id, user.id).await?;
    Ok(Json(MessageResponse::new("Device successfully removed")))
}

pub async fn upload_image(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Json<DataResponse<Device>>> {
    let id = parse_id(&id)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await?;

        upload = Some(ImageUpload { content_type, data });
        break;
    }

    let device = DevicesService::new(state.db)
        .attach_image(id, user.id, upload, state.config.uploads.max_image_bytes())
        .await?;
    Ok(Json(DataResponse::new(device)))
}

/// Raw image bytes with their stored content type.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let (content_type, data) = DevicesService::new(state.db).image(id).await?;
    Ok(([(CONTENT_TYPE, content_type)], data))
}
