//! Fixtures for tests that need a real database. They run against
//! `DATABASE_URL` and are skipped when it is unset.

use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::models::{CreateDeviceRequest, Device};

use super::{devices::DevicesService, users::UsersService};

pub async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database test");
        return None;
    };

    let db = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("apply migrations");
    Some(db)
}

pub async fn seed_user(db: &PgPool) -> Uuid {
    UsersService::new(db.clone())
        .create(
            "garage tester",
            &format!("{}@example.com", Uuid::new_v4()),
            "not-a-real-hash",
        )
        .await
        .expect("seed user")
        .id
}

pub async fn seed_device(db: &PgPool, owner: Uuid) -> Device {
    DevicesService::new(db.clone())
        .create(
            owner,
            CreateDeviceRequest {
                device: "Pixel 8".to_string(),
                os: "Android 14".to_string(),
                manufacturer: "Google".to_string(),
            },
        )
        .await
        .expect("seed device")
}
