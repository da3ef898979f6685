use std::sync::Arc;

use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::{Config, JwtConfig},
    error::{AppError, AppResult},
    models::{validate_email, validate_password, validate_user_name, RegisterRequest, User},
};

use super::users::UsersService;

/// Minutes a password reset token stays valid.
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id
    pub iss: String, // issuer
    pub exp: i64,    // expiry
    pub iat: i64,    // issued at
}

impl Claims {
    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::not_authorized())
    }
}

pub fn issue_token(jwt: &JwtConfig, user_id: Uuid) -> AppResult<String> {
    let now = Utc::now();
    let exp = now + Duration::seconds(jwt.token_ttl.as_secs() as i64);

    let claims = Claims {
        sub: user_id.to_string(),
        iss: jwt.issuer.clone(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    let key = EncodingKey::from_secret(jwt.secret.as_bytes());
    Ok(encode(&Header::default(), &claims, &key)?)
}

pub fn validate_token(jwt: &JwtConfig, token: &str) -> AppResult<Claims> {
    let key = DecodingKey::from_secret(jwt.secret.as_bytes());
    let mut validation = Validation::default();
    validation.set_issuer(&[jwt.issuer.as_str()]);

    let token_data = decode::<Claims>(token, &key, &validation)?;
    Ok(token_data.claims)
}

/// Reset tokens are stored hashed; only the raw token is handed to the user.
pub fn hash_reset_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

fn generate_reset_token() -> String {
    let bytes: [u8; 10] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_password(password: &str) -> AppResult<String> {
    hash(password, DEFAULT_COST).map_err(|e| anyhow::anyhow!("Hash error: {}", e).into())
}

fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    verify(password, password_hash).map_err(|e| anyhow::anyhow!("Verify error: {}", e).into())
}

pub struct AuthService {
    users: UsersService,
    config: Arc<Config>,
}

impl AuthService {
    pub fn new(db: PgPool, config: Arc<Config>) -> Self {
        Self {
            users: UsersService::new(db),
            config,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> AppResult<(User, String)> {
        validate_user_name(&req.user_name)?;
        validate_email(&req.email)?;
        validate_password(&req.password)?;

        let password_hash = hash_password(&req.password)?;
        let user = self
            .users
            .create(&req.user_name, &req.email, &password_hash)
            .await?;

        let token = issue_token(&self.config.jwt, user.id)?;
        Ok((user, token))
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<(User, String)> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User does not exists".to_string()))?;

        if !verify_password(password, &user.password_hash)? {
            tracing::debug!(user_id = %user.id, "login rejected: wrong password");
            return Err(AppError::Unauthorized("Incorrect password".to_string()));
        }

        let token = issue_token(&self.config.jwt, user.id)?;
        Ok((user, token))
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let user = self.users.get(user_id).await?;

        if old_password == new_password {
            return Err(AppError::Unauthorized(
                "Old and new password cannot be similar".to_string(),
            ));
        }
        validate_password(new_password)?;

        if !verify_password(old_password, &user.password_hash)? {
            return Err(AppError::Unauthorized(
                "Entered password does not match with current password".to_string(),
            ));
        }

        let password_hash = hash_password(new_password)?;
        self.users.set_password(user.id, &password_hash).await?;

        tracing::info!(user_id = %user.id, "password changed");
        Ok(())
    }

    /// Stores a fresh reset token for `email`; the raw token goes out of band.
    pub async fn forgot_password(&self, email: &str) -> AppResult<()> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound("There is no user with that email".to_string()))?;

        let token = generate_reset_token();
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
        self.users
            .set_reset_token(user.id, &hash_reset_token(&token), expires_at)
            .await?;

        if self.config.is_development() {
            tracing::info!("Password reset token for {}: {}", email, token);
        } else {
            tracing::warn!("Password reset email delivery not configured");
        }

        Ok(())
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> AppResult<(User, String)> {
        let user = self
            .users
            .find_by_reset_token(&hash_reset_token(token))
            .await?
            .ok_or_else(|| AppError::BadRequest("Invalid token".to_string()))?;

        validate_password(password)?;
        let password_hash = hash_password(password)?;
        self.users.set_password(user.id, &password_hash).await?;

        let token = issue_token(&self.config.jwt, user.id)?;
        Ok((user, token))
    }
}
