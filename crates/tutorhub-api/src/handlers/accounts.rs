use axum::{
    extract::State,
    http::{header, HeaderMap},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use tutorhub_core::{
    validation::{validate_email, validate_password},
    TutorHubError,
};
use uuid::Uuid;

use super::{hash_password, verify_password};
use crate::auth::{TokenPair, TokenType};
use crate::extract::Json;
use crate::mailer::MailMessage;
use crate::{ApiError, ApiResult, AppState};

const BAD_CREDENTIALS: &str = "No active account found with the given credentials";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Exchanges credentials for an access/refresh token pair.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenPair>> {
    state.throttle.check("login", &req.email)?;

    let user = match state.db.find_user_by_email(&req.email)? {
        Some(user) if user.is_active => user,
        _ => return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into())),
    };
    if !verify_password(req.password, user.password_hash.clone()).await? {
        warn!(user_id = user.id, "failed login");
        return Err(ApiError::Unauthorized(BAD_CREDENTIALS.into()));
    }

    state.db.touch_last_login(user.id, Utc::now())?;
    info!(user_id = user.id, "user logged in");
    Ok(Json(state.tokens.issue_pair(&user)?))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let claims = state.tokens.verify(&req.refresh, TokenType::Refresh)?;
    let user = match state.db.get_user(claims.user_id) {
        Ok(user) if user.is_active => user,
        Ok(_) | Err(TutorHubError::NotFound { .. }) => {
            return Err(ApiError::Unauthorized("Token is invalid or expired".into()))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(RefreshResponse {
        access: state.tokens.issue(&user, TokenType::Access)?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

fn reset_link(state: &AppState, headers: &HeaderMap, token: &str) -> String {
    let base = match &state.settings.mail.public_base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{}", host)
        }
    };
    format!("{}/reset-password/{}/", base, token)
}

/// Issues a single-use reset token for a known address and mails the link.
pub async fn request_password_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<Json<Value>> {
    let email = validate_email(&req.email)?;
    state.throttle.check("password-reset", &email)?;
    let user = state
        .db
        .find_user_by_email(&email)?
        .ok_or_else(|| ApiError::Validation("User with this email does not exist.".into()))?;

    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let ttl = Duration::minutes(state.settings.password_reset.token_ttl_minutes as i64);
    state
        .db
        .create_password_reset(&user.email, &token, Utc::now() + ttl)?;

    let message = MailMessage {
        from: state.settings.mail.from.clone(),
        to: vec![user.email.clone()],
        subject: "Password Reset Request".to_string(),
        body: format!(
            "Click the link below to reset your password:\n{}",
            reset_link(&state, &headers, &token)
        ),
    };
    state
        .mailer
        .send(message)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(user_id = user.id, "password reset requested");
    Ok(Json(json!({ "detail": "Password reset e-mail has been sent." })))
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetConfirmRequest>,
) -> ApiResult<Json<Value>> {
    validate_password(&req.new_password)?;
    let password_hash = hash_password(req.new_password).await?;
    state
        .db
        .confirm_password_reset(req.token.trim(), password_hash, Utc::now())?;
    Ok(Json(json!({ "detail": "Password has been reset." })))
}
