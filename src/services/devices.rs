use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{CreateDeviceRequest, Device, UpdateDeviceRequest, UserSummary},
};

use super::{
    advanced_results::{push_order_by, ListQuery, ListSource, Populate},
    checkout::{authorize_update, can_modify, Transition, UpdateMode},
    filter::Filter,
    pagination::sql_bound,
};

static IMAGE_TYPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(jpg|jpeg|png)").expect("image pattern is valid"));

/// Width of `devices.image_content_type`.
const CONTENT_TYPE_MAX: usize = 100;

/// File pulled out of a multipart upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub content_type: String,
    pub data: Bytes,
}

pub fn validate_image(upload: &ImageUpload, max_bytes: u64) -> AppResult<()> {
    if upload.content_type.chars().count() > CONTENT_TYPE_MAX {
        return Err(AppError::BadRequest(format!(
            "image content type can only have a maximum of {} characters",
            CONTENT_TYPE_MAX
        )));
    }
    if !IMAGE_TYPE_RE.is_match(&upload.content_type) {
        return Err(AppError::BadRequest("please upload an image file".to_string()));
    }
    if upload.data.len() as u64 > max_bytes {
        return Err(AppError::BadRequest(format!(
            "please upload an image less than {} MB",
            max_bytes / 1_048_576
        )));
    }
    Ok(())
}

/// Swaps each row's `user` id for the owner's summary, when known.
fn expand_owners(rows: &mut [Value], owners: &HashMap<Uuid, UserSummary>) {
    for row in rows {
        let Some(owner) = row
            .get("user")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
            .and_then(|id| owners.get(&id))
        else {
            continue;
        };
        if let Ok(summary) = serde_json::to_value(owner) {
            row["user"] = summary;
        }
    }
}

pub struct DevicesService {
    db: PgPool,
}

impl DevicesService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, owner: Uuid, req: CreateDeviceRequest) -> AppResult<Device> {
        req.validate()?;

        let device: Device = sqlx::query_as(
            r#"
            INSERT INTO devices (id, user_id, device, os, manufacturer)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(&req.device)
        .bind(&req.os)
        .bind(&req.manufacturer)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(device_id = %device.id, owner = %owner, "device created");
        Ok(device)
    }

    pub async fn find(&self, id: Uuid) -> AppResult<Option<Device>> {
        let device: Option<Device> = sqlx::query_as("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(device)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Device> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Device does not exist".to_string()))
    }

    /// Applies a checkout, checkin or owner edit.
    ///
    /// Checkout and checkin are single conditional writes on the current
    /// flag, so of two concurrent checkouts exactly one lands and the other
    /// is re-evaluated against the winner's state.
    pub async fn update(
        &self,
        id: Uuid,
        caller: Uuid,
        mode: UpdateMode,
        req: UpdateDeviceRequest,
    ) -> AppResult<Device> {
        let current = self.get(id).await?;
        req.validate()?;
        let transition = authorize_update(&current, caller, mode, req.is_checkedout)?;
        tracing::debug!(
            device_id = %id,
            ?transition,
            expected = ?transition.expected_state(),
            "applying device update"
        );

        let updated: Option<Device> = match transition {
            Transition::CheckOut { by } => {
                sqlx::query_as(
                    r#"
                    UPDATE devices
                    SET is_checkedout = TRUE,
                        last_checkedout_by = $2,
                        last_checkedout_date = NOW()
                    WHERE id = $1 AND is_checkedout = FALSE
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(by)
                .fetch_optional(&self.db)
                .await?
            }
            Transition::CheckIn { holder } => {
                sqlx::query_as(
                    r#"
                    UPDATE devices
                    SET is_checkedout = FALSE,
                        last_checkedout_by = NULL,
                        last_checkedout_date = NULL
                    WHERE id = $1
                      AND is_checkedout = TRUE
                      AND last_checkedout_by IS NOT DISTINCT FROM $2
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(holder)
                .fetch_optional(&self.db)
                .await?
            }
            Transition::Edit => {
                sqlx::query_as(
                    r#"
                    UPDATE devices
                    SET device = COALESCE($3, device),
                        os = COALESCE($4, os),
                        manufacturer = COALESCE($5, manufacturer)
                    WHERE id = $1 AND user_id = $2
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(caller)
                .bind(&req.device)
                .bind(&req.os)
                .bind(&req.manufacturer)
                .fetch_optional(&self.db)
                .await?
            }
        };

        match updated {
            Some(device) => {
                tracing::info!(device_id = %id, caller = %caller, ?transition, "device updated");
                Ok(device)
            }
            None => Err(self.lost_race(id, caller, mode, req.is_checkedout).await),
        }
    }

    /// The conditional write matched nothing: explain why from fresh state.
    async fn lost_race(
        &self,
        id: Uuid,
        caller: Uuid,
        mode: UpdateMode,
        requested: Option<bool>,
    ) -> AppError {
        let fresh = match self.get(id).await {
            Ok(device) => device,
            Err(e) => return e,
        };
        tracing::debug!(device_id = %id, "conditional device update lost a race");

        match authorize_update(&fresh, caller, mode, requested) {
            Err(e) => e,
            Ok(_) => AppError::Conflict("Device was modified concurrently, retry".to_string()),
        }
    }

    pub async fn delete(&self, id: Uuid, caller: Uuid) -> AppResult<()> {
        let device = self.get(id).await?;
        if !can_modify(caller, &device) {
            return Err(AppError::Unauthorized(
                "You cannot remove device added by another person".to_string(),
            ));
        }

        sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        tracing::info!(device_id = %id, "device removed");
        Ok(())
    }

    pub async fn attach_image(
        &self,
        id: Uuid,
        caller: Uuid,
        upload: Option<ImageUpload>,
        max_bytes: u64,
    ) -> AppResult<Device> {
        let device = self.get(id).await?;
        if !can_modify(caller, &device) {
            return Err(AppError::Unauthorized(
                "You cannot modify device added by another person".to_string(),
            ));
        }

        let upload =
            upload.ok_or_else(|| AppError::BadRequest("please upload a file".to_string()))?;
        validate_image(&upload, max_bytes)?;

        let device: Device = sqlx::query_as(
            r#"
            UPDATE devices
            SET image_data = $2, image_content_type = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(upload.data.as_ref())
        .bind(&upload.content_type)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(
            device_id = %id,
            bytes = upload.data.len(),
            content_type = %upload.content_type,
            "device image stored"
        );
        Ok(device)
    }

    pub async fn image(&self, id: Uuid) -> AppResult<(String, Vec<u8>)> {
        let device = self.get(id).await?;
        match (device.image_content_type, device.image_data) {
            (Some(content_type), Some(data)) => Ok((content_type, data)),
            _ => Err(AppError::NotFound("Device has no image".to_string())),
        }
    }

    async fn owners(&self, ids: Vec<Uuid>) -> AppResult<HashMap<Uuid, UserSummary>> {
        let owners: Vec<UserSummary> =
            sqlx::query_as("SELECT id, user_name, email FROM users WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.db)
                .await?;
        Ok(owners.into_iter().map(|u| (u.id, u)).collect())
    }
}

#[async_trait]
impl ListSource for DevicesService {
    async fn count(&self, filter: &Filter) -> AppResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM devices");
        filter.push_where(&mut builder);

        let total: i64 = builder.build_query_scalar().fetch_one(&self.db).await?;
        Ok(total as u64)
    }

    async fn fetch(&self, query: ListQuery<'_>) -> AppResult<Vec<Value>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM devices");
        query.filter.push_where(&mut builder);
        push_order_by(query.sort, &mut builder);
        builder.push(" OFFSET ").push_bind(sql_bound(query.skip));
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(sql_bound(limit));
        }

        let devices: Vec<Device> = builder.build_query_as().fetch_all(&self.db).await?;

        let owner_ids: Vec<Uuid> = devices.iter().map(|d| d.user_id).collect();
        let mut rows = devices
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to serialize devices: {}", e))?;

        if query.populate == Some(Populate::Owner) && !owner_ids.is_empty() {
            let owners = self.owners(owner_ids).await?;
            expand_owners(&mut rows, &owners);
        }

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::services::{
        testing::{seed_device, seed_user, test_pool},
        users::UsersService,
    };

    fn upload(content_type: &str, len: usize) -> ImageUpload {
        ImageUpload {
            content_type: content_type.to_string(),
            data: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn accepts_common_image_types() {
        assert_ok!(validate_image(&upload("image/png", 10), 1_048_576));
        assert_ok!(validate_image(&upload("image/jpeg", 10), 1_048_576));
        assert_ok!(validate_image(&upload("IMAGE/JPG", 10), 1_048_576));
    }

    #[test]
    fn rejects_non_images() {
        match validate_image(&upload("application/pdf", 10), 1_048_576) {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "please upload an image file"),
            other => panic!("expected BadRequest, got {:?}", other),
        }
        assert_err!(validate_image(&upload("image/gif", 10), 1_048_576));
    }

    #[test]
    fn rejects_content_types_wider_than_the_column() {
        let padded = format!("image/png; name={}", "x".repeat(CONTENT_TYPE_MAX));
        match validate_image(&upload(&padded, 10), 1_048_576) {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("maximum of 100")),
            other => panic!("expected BadRequest, got {:?}", other),
        }

        let exact = format!("image/png{}", "x".repeat(CONTENT_TYPE_MAX - "image/png".len()));
        assert_ok!(validate_image(&upload(&exact, 10), 1_048_576));
    }

    #[test]
    fn rejects_oversized_images() {
        let limit = 1_048_576;
        assert_ok!(validate_image(&upload("image/png", limit as usize), limit));
        match validate_image(&upload("image/png", limit as usize + 1), limit) {
            Err(AppError::BadRequest(msg)) => {
                assert_eq!(msg, "please upload an image less than 1 MB")
            }
            other => panic!("expected BadRequest, got {:?}", other),
        }
    }

    #[test]
    fn expands_known_owners_only() {
        let known = Uuid::new_v4();
        let unknown = Uuid::new_v4();
        let mut rows = vec![
            json!({ "id": "a", "user": known.to_string() }),
            json!({ "id": "b", "user": unknown.to_string() }),
        ];
        let owners = HashMap::from([(
            known,
            UserSummary {
                id: known,
                user_name: "jane".to_string(),
                email: "jane@example.com".to_string(),
            },
        )]);

        expand_owners(&mut rows, &owners);

        assert_eq!(rows[0]["user"]["userName"], "jane");
        assert_eq!(rows[1]["user"], unknown.to_string());
    }

    // Conditional writes, against a real database.

    fn check(flag: bool) -> UpdateDeviceRequest {
        UpdateDeviceRequest {
            is_checkedout: Some(flag),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn checkout_records_borrower_and_checkin_clears_it() {
        let Some(db) = test_pool().await else { return };
        let service = DevicesService::new(db.clone());
        let owner = seed_user(&db).await;
        let borrower = seed_user(&db).await;
        let device = seed_device(&db, owner).await;

        let out = service
            .update(device.id, borrower, UpdateMode::Checkout, check(true))
            .await
            .unwrap();
        assert!(out.is_checkedout);
        assert_eq!(out.last_checkedout_by, Some(borrower));
        assert!(out.last_checkedout_date.is_some());

        let back = service
            .update(device.id, borrower, UpdateMode::Checkout, check(false))
            .await
            .unwrap();
        assert!(!back.is_checkedout);
        assert_eq!(back.last_checkedout_by, None);
        assert_eq!(back.last_checkedout_date, None);
    }

    #[tokio::test]
    async fn second_checkout_conflicts_and_leaves_the_row_alone() {
        let Some(db) = test_pool().await else { return };
        let service = DevicesService::new(db.clone());
        let first = seed_user(&db).await;
        let second = seed_user(&db).await;
        let device = seed_device(&db, first).await;

        let out = service
            .update(device.id, first, UpdateMode::Checkout, check(true))
            .await
            .unwrap();

        for caller in [second, first] {
            match service
                .update(device.id, caller, UpdateMode::Checkout, check(true))
                .await
            {
                Err(AppError::Conflict(msg)) => assert_eq!(msg, "Already checked out by someone"),
                other => panic!("expected Conflict, got {:?}", other),
            }
        }

        let stored = service.get(device.id).await.unwrap();
        assert_eq!(stored.last_checkedout_by, Some(first));
        assert_eq!(stored.last_checkedout_date, out.last_checkedout_date);
    }

    #[tokio::test]
    async fn only_the_borrower_can_check_in() {
        let Some(db) = test_pool().await else { return };
        let service = DevicesService::new(db.clone());
        let owner = seed_user(&db).await;
        let borrower = seed_user(&db).await;
        let device = seed_device(&db, owner).await;

        let out = service
            .update(device.id, borrower, UpdateMode::Checkout, check(true))
            .await
            .unwrap();

        assert!(matches!(
            service
                .update(device.id, owner, UpdateMode::Checkout, check(false))
                .await,
            Err(AppError::Unauthorized(_))
        ));

        let stored = service.get(device.id).await.unwrap();
        assert!(stored.is_checkedout);
        assert_eq!(stored.last_checkedout_by, Some(borrower));
        assert_eq!(stored.last_checkedout_date, out.last_checkedout_date);
    }

    #[tokio::test]
    async fn concurrent_checkouts_have_one_winner() {
        let Some(db) = test_pool().await else { return };
        let service = DevicesService::new(db.clone());
        let owner = seed_user(&db).await;
        let a = seed_user(&db).await;
        let b = seed_user(&db).await;
        let device = seed_device(&db, owner).await;

        let (ra, rb) = tokio::join!(
            service.update(device.id, a, UpdateMode::Checkout, check(true)),
            service.update(device.id, b, UpdateMode::Checkout, check(true)),
        );

        let winner = match (&ra, &rb) {
            (Ok(_), Err(AppError::Conflict(_))) => a,
            (Err(AppError::Conflict(_)), Ok(_)) => b,
            other => panic!("expected exactly one checkout to land, got {:?}", other),
        };

        let stored = service.get(device.id).await.unwrap();
        assert!(stored.is_checkedout);
        assert_eq!(stored.last_checkedout_by, Some(winner));
    }

    #[tokio::test]
    async fn check_request_without_body_is_bad_request() {
        let Some(db) = test_pool().await else { return };
        let service = DevicesService::new(db.clone());
        let owner = seed_user(&db).await;
        let device = seed_device(&db, owner).await;

        match service
            .update(device.id, owner, UpdateMode::Checkout, UpdateDeviceRequest::default())
            .await
        {
            Err(AppError::BadRequest(msg)) => assert_eq!(msg, "provide check in / out details"),
            other => panic!("expected BadRequest, got {:?}", other),
        }

        // the lookup reports before the body is looked at
        match service
            .update(Uuid::new_v4(), owner, UpdateMode::Checkout, UpdateDeviceRequest::default())
            .await
        {
            Err(AppError::NotFound(msg)) => assert_eq!(msg, "Device does not exist"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn owner_reclaims_a_device_after_its_borrower_is_deleted() {
        let Some(db) = test_pool().await else { return };
        let service = DevicesService::new(db.clone());
        let owner = seed_user(&db).await;
        let borrower = seed_user(&db).await;
        let device = seed_device(&db, owner).await;

        service
            .update(device.id, borrower, UpdateMode::Checkout, check(true))
            .await
            .unwrap();
        UsersService::new(db.clone())
            .delete(borrower, borrower)
            .await
            .unwrap();

        let orphaned = service.get(device.id).await.unwrap();
        assert!(orphaned.is_checkedout);
        assert_eq!(orphaned.last_checkedout_by, None);

        let back = service
            .update(device.id, owner, UpdateMode::Checkout, check(false))
            .await
            .unwrap();
        assert!(!back.is_checkedout);
        assert_eq!(back.last_checkedout_date, None);
    }
}
