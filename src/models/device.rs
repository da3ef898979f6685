use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{ser::SerializeStruct, Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const DEVICE_NAME_MAX: usize = 50;
pub const OS_MAX: usize = 25;
pub const MANUFACTURER_MAX: usize = 100;

#[derive(Debug, Clone, FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device: String,
    pub os: String,
    pub manufacturer: String,
    pub image_data: Option<Vec<u8>>,
    pub image_content_type: Option<String>,
    pub is_checkedout: bool,
    pub last_checkedout_date: Option<DateTime<Utc>>,
    pub last_checkedout_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceImage {
    pub data: String,
    pub content_type: String,
}

impl Device {
    pub fn image(&self) -> Option<DeviceImage> {
        match (&self.image_data, &self.image_content_type) {
            (Some(data), Some(content_type)) => Some(DeviceImage {
                data: BASE64.encode(data),
                content_type: content_type.clone(),
            }),
            _ => None,
        }
    }
}

// Field names here are the ones list queries filter, sort and select on.
impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Device", 10)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("user", &self.user_id)?;
        state.serialize_field("device", &self.device)?;
        state.serialize_field("os", &self.os)?;
        state.serialize_field("manufacturer", &self.manufacturer)?;
        state.serialize_field("image", &self.image())?;
        state.serialize_field("isCheckedout", &self.is_checkedout)?;
        state.serialize_field("lastCheckedoutDate", &self.last_checkedout_date)?;
        state.serialize_field("lastCheckedoutBy", &self.last_checkedout_by)?;
        state.serialize_field("createdAt", &self.created_at)?;
        state.end()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub device: String,
    pub os: String,
    pub manufacturer: String,
}

impl CreateDeviceRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_field("Device name", &self.device, DEVICE_NAME_MAX)?;
        check_field("OS", &self.os, OS_MAX)?;
        check_field("Manufacturer name", &self.manufacturer, MANUFACTURER_MAX)
    }
}

/// Body of `PUT /devices/:id`. `is_checkedout` is only legal on the check route.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    pub device: Option<String>,
    pub os: Option<String>,
    pub manufacturer: Option<String>,
    pub is_checkedout: Option<bool>,
}

impl UpdateDeviceRequest {
    pub fn validate(&self) -> AppResult<()> {
        if let Some(device) = &self.device {
            check_field("Device name", device, DEVICE_NAME_MAX)?;
        }
        if let Some(os) = &self.os {
            check_field("OS", os, OS_MAX)?;
        }
        if let Some(manufacturer) = &self.manufacturer {
            check_field("Manufacturer name", manufacturer, MANUFACTURER_MAX)?;
        }
        Ok(())
    }
}

fn check_field(label: &str, value: &str, max: usize) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("Please provide {}", label)));
    }
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} can only have a maximum of {} characters",
            label, max
        )));
    }
    Ok(())
}
