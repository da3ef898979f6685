use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{validate_email, validate_user_name, UpdateUserRequest, User},
};

use super::{
    advanced_results::{push_order_by, ListQuery, ListSource},
    filter::Filter,
    pagination::sql_bound,
};

pub struct UsersService {
    db: PgPool,
}

impl UsersService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_name: &str, email: &str, password_hash: &str) -> AppResult<User> {
        let user: User = sqlx::query_as(
            r#"
            INSERT INTO users (id, user_name, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await?;

        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    pub async fn get(&self, id: Uuid) -> AppResult<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User does not exist".to_string()))
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    /// Self-edit. `caller` must be the user being edited.
    pub async fn update(&self, id: Uuid, caller: Uuid, req: UpdateUserRequest) -> AppResult<User> {
        if caller != id {
            return Err(AppError::Forbidden(
                "Current user cannot modify another user".to_string(),
            ));
        }
        if let Some(user_name) = &req.user_name {
            validate_user_name(user_name)?;
        }
        if let Some(email) = &req.email {
            validate_email(email)?;
        }

        let user: Option<User> = sqlx::query_as(
            r#"
            UPDATE users
            SET user_name = COALESCE($2, user_name),
                email = COALESCE($3, email)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&req.user_name)
        .bind(&req.email)
        .fetch_optional(&self.db)
        .await?;

        user.ok_or_else(|| AppError::NotFound("User does not exist".to_string()))
    }

    /// Self-delete. Owned devices go with the account.
    pub async fn delete(&self, id: Uuid, caller: Uuid) -> AppResult<()> {
        if caller != id {
            return Err(AppError::Forbidden(
                "Current user cannot remove another user".to_string(),
            ));
        }

        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User does not exist".to_string()));
        }

        tracing::info!(user_id = %id, "user removed");
        Ok(())
    }

    pub async fn set_password(&self, id: Uuid, password_hash: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                reset_password_token = NULL,
                reset_password_expire = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET reset_password_token = $2, reset_password_expire = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn find_by_reset_token(&self, token_hash: &str) -> AppResult<Option<User>> {
        let user: Option<User> = sqlx::query_as(
            r#"
            SELECT * FROM users
            WHERE reset_password_token = $1 AND reset_password_expire > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}

#[async_trait]
impl ListSource for UsersService {
    async fn count(&self, filter: &Filter) -> AppResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users");
        filter.push_where(&mut builder);

        let total: i64 = builder.build_query_scalar().fetch_one(&self.db).await?;
        Ok(total as u64)
    }

    async fn fetch(&self, query: ListQuery<'_>) -> AppResult<Vec<Value>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM users");
        query.filter.push_where(&mut builder);
        push_order_by(query.sort, &mut builder);
        builder.push(" OFFSET ").push_bind(sql_bound(query.skip));
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(sql_bound(limit));
        }

        let users: Vec<User> = builder.build_query_as().fetch_all(&self.db).await?;

        users
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to serialize users: {}", e).into())
    }
}
