use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tracing::{debug, warn};
use tutorhub_core::{
    validation::normalize_email, AuthConfig, Settings, TutorHubError, User, UserId,
};
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT payload. Role flags are embedded so clients can route without an
/// extra lookup; the server always re-reads the user.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub user_id: UserId,
    pub email: String,
    pub is_student: bool,
    pub is_tutor: bool,
    pub token_type: TokenType,
    pub jti: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TokenService {
    pub fn new(secret: &[u8], config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs: config.access_token_ttl_secs,
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    /// Uses `secrets.jwt_secret`, or a random per-process secret when none
    /// is configured (tokens then die with the process).
    pub fn from_settings(settings: &Settings) -> Self {
        match &settings.secrets.jwt_secret {
            Some(secret) => Self::new(secret.expose_secret().as_bytes(), &settings.auth),
            None => {
                warn!("secrets.jwt_secret is not set; using an ephemeral signing key");
                let secret = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
                Self::new(secret.as_bytes(), &settings.auth)
            }
        }
    }

    pub fn issue(&self, user: &User, token_type: TokenType) -> ApiResult<String> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl_secs,
            TokenType::Refresh => self.refresh_ttl_secs,
        };
        let now = Utc::now().timestamp().max(0) as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            user_id: user.id,
            email: user.email.clone(),
            is_student: user.is_student,
            is_tutor: user.is_tutor,
            token_type,
            jti: Uuid::new_v4().simple().to_string(),
            iat: now,
            exp: now + ttl as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("failed to sign token: {}", e)))
    }

    pub fn issue_pair(&self, user: &User) -> ApiResult<TokenPair> {
        Ok(TokenPair {
            access: self.issue(user, TokenType::Access)?,
            refresh: self.issue(user, TokenType::Refresh)?,
        })
    }

    pub fn verify(&self, token: &str, expected: TokenType) -> ApiResult<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!(error = %e, "rejected token");
            ApiError::Unauthorized("Token is invalid or expired".into())
        })?;
        if data.claims.token_type != expected {
            return Err(ApiError::Unauthorized("Token has wrong type".into()));
        }
        Ok(data.claims)
    }
}

/// The authenticated caller, resolved from `Authorization: Bearer <access>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

impl AuthUser {
    pub fn id(&self) -> UserId {
        self.user.id
    }

    /// Owners may act on their own records; staff on anyone's.
    pub fn ensure_self_or_staff(&self, owner: UserId) -> ApiResult<()> {
        if self.user.id == owner || self.user.is_staff {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "You do not have permission to perform this action.".into(),
            ))
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided.".into())
            })?;

        let claims = state.tokens.verify(token, TokenType::Access)?;
        let user = match state.db.get_user(claims.user_id) {
            Ok(user) => user,
            Err(TutorHubError::NotFound { .. }) => {
                return Err(ApiError::Unauthorized("User not found".into()))
            }
            Err(e) => return Err(e.into()),
        };
        if !user.is_active {
            return Err(ApiError::Unauthorized("User is inactive".into()));
        }
        Ok(AuthUser { user, claims })
    }
}

/// A missing `Authorization` header yields `None`; a present but invalid
/// one is still rejected.
impl OptionalFromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(None);
        }
        <AuthUser as FromRequestParts<AppState>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

/// Per-email limiter for login and password-reset requests.
///
/// Every distinct email adds a key, so [`LoginThrottle::prune`] has to run
/// periodically to forget keys whose quota has fully replenished.
pub struct LoginThrottle {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl LoginThrottle {
    pub fn new(per_minute: u32) -> Self {
        Self::with_quota(Quota::per_minute(
            NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN),
        ))
    }

    pub fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Drops keys that are back to a full quota and releases the memory.
    pub fn prune(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        let dropped = before.saturating_sub(self.limiter.len());
        if dropped > 0 {
            debug!(dropped, remaining = self.limiter.len(), "pruned login throttle");
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }

    pub fn check(&self, scope: &str, email: &str) -> ApiResult<()> {
        let key = format!("{}:{}", scope, normalize_email(email).to_lowercase());
        self.limiter.check_key(&key).map_err(|_| {
            warn!(scope, "rate limit exceeded");
            ApiError::RateLimited
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutboxMailer;
    use http::{Request, StatusCode};
    use std::sync::Arc;
    use tutorhub_store::{Database, KvBackend, Table, WriteBatch};

    /// A store that cannot be reached.
    struct Offline;

    impl KvBackend for Offline {
        fn get(&self, _: Table, _: i64) -> tutorhub_core::Result<Option<Vec<u8>>> {
            Err(TutorHubError::Database("connection refused".into()))
        }

        fn put(&self, _: Table, _: i64, _: Vec<u8>) -> tutorhub_core::Result<()> {
            Err(TutorHubError::Database("connection refused".into()))
        }

        fn delete(&self, _: Table, _: i64) -> tutorhub_core::Result<bool> {
            Err(TutorHubError::Database("connection refused".into()))
        }

        fn scan(&self, _: Table) -> tutorhub_core::Result<Vec<Vec<u8>>> {
            Err(TutorHubError::Database("connection refused".into()))
        }

        fn next_id(&self, _: Table) -> tutorhub_core::Result<i64> {
            Err(TutorHubError::Database("connection refused".into()))
        }

        fn write_batch(&self, _: WriteBatch) -> tutorhub_core::Result<()> {
            Err(TutorHubError::Database("connection refused".into()))
        }

        fn backend_name(&self) -> &'static str {
            "offline"
        }
    }

    fn state_over(db: Database) -> AppState {
        AppState::with_parts(Settings::default(), Arc::new(db), Arc::new(OutboxMailer::new()))
    }

    async fn authenticate(state: &AppState, token: &str) -> ApiResult<AuthUser> {
        let (mut parts, _) = Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(())
            .unwrap()
            .into_parts();
        <AuthUser as FromRequestParts<AppState>>::from_request_parts(&mut parts, state).await
    }

    fn user() -> User {
        User {
            id: 7,
            email: "jwt@uni.edu".into(),
            password_hash: String::new(),
            is_student: true,
            is_tutor: false,
            is_staff: false,
            is_superuser: false,
            is_active: true,
            profile_picture: None,
            date_joined: Utc::now(),
            last_login: None,
        }
    }

    fn service() -> TokenService {
        TokenService::new(b"0123456789abcdef0123456789abcdef", &AuthConfig::default())
    }

    #[test]
    fn access_token_carries_role_claims() {
        let tokens = service();
        let pair = tokens.issue_pair(&user()).unwrap();
        let claims = tokens.verify(&pair.access, TokenType::Access).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.email, "jwt@uni.edu");
        assert!(claims.is_student);
        assert!(!claims.is_tutor);
        assert_eq!(claims.exp - claims.iat, 300);
    }

    #[test]
    fn token_types_are_not_interchangeable() {
        let tokens = service();
        let pair = tokens.issue_pair(&user()).unwrap();
        assert!(tokens.verify(&pair.refresh, TokenType::Access).is_err());
        assert!(tokens.verify(&pair.access, TokenType::Refresh).is_err());
        assert!(tokens.verify(&pair.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let other = TokenService::new(b"another-secret-another-secret-!!", &AuthConfig::default());
        let token = other.issue(&user(), TokenType::Access).unwrap();
        assert!(service().verify(&token, TokenType::Access).is_err());
        assert!(service().verify("garbage", TokenType::Access).is_err());
    }

    #[test]
    fn prune_forgets_replenished_emails() {
        let quota = Quota::with_period(std::time::Duration::from_millis(10)).unwrap();
        let throttle = LoginThrottle::with_quota(quota);
        for i in 0..100 {
            throttle.check("login", &format!("user{}@uni.edu", i)).unwrap();
        }
        assert_eq!(throttle.len(), 100);

        std::thread::sleep(std::time::Duration::from_millis(50));
        throttle.prune();
        assert!(throttle.is_empty());
        assert!(throttle.check("login", "user0@uni.edu").is_ok());
    }

    #[test]
    fn prune_keeps_emails_still_limited() {
        let throttle = LoginThrottle::new(1);
        throttle.check("login", "busy@uni.edu").unwrap();
        throttle.prune();
        assert_eq!(throttle.len(), 1);
        assert!(matches!(throttle.check("login", "busy@uni.edu"), Err(ApiError::RateLimited)));
    }

    #[test]
    fn throttle_is_keyed_per_email() {
        let throttle = LoginThrottle::new(2);
        assert!(throttle.check("login", "a@uni.edu").is_ok());
        assert!(throttle.check("login", "a@UNI.edu").is_ok());
        assert!(matches!(throttle.check("login", "a@uni.edu"), Err(ApiError::RateLimited)));
        assert!(throttle.check("login", "b@uni.edu").is_ok());
        assert!(throttle.check("reset", "a@uni.edu").is_ok());
    }

    #[tokio::test]
    async fn unknown_user_is_unauthorized() {
        let state = state_over(Database::in_memory());
        let token = state.tokens.issue(&user(), TokenType::Access).unwrap();
        let err = authenticate(&state, &token).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn storage_failure_is_a_server_error() {
        let state = state_over(Database::new(Arc::new(Offline)));
        let token = state.tokens.issue(&user(), TokenType::Access).unwrap();
        let err = authenticate(&state, &token).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
