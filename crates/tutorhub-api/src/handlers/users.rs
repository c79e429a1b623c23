use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use tracing::info;
use tutorhub_core::{validation::validate_password, NewUser, UserFilter, UserId, UserPatch};

use super::{double_option, hash_password, UserResponse};
use crate::extract::{Json, Path, Query};
use crate::{ApiResult, AppState, AuthUser};

#[derive(Debug, Deserialize, Default)]
pub struct UserListQuery {
    pub is_student: Option<bool>,
    pub is_tutor: Option<bool>,
    pub search: Option<String>,
    /// `email` sorts by address; anything else keeps id order.
    pub ordering: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let filter = UserFilter {
        is_student: query.is_student,
        is_tutor: query.is_tutor,
        search: query.search,
        order_by_email: query.ordering.as_deref() == Some("email"),
    };
    let users = state.db.list_users(&filter)?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub is_student: bool,
    #[serde(default)]
    pub is_tutor: bool,
    #[serde(default)]
    pub profile_picture: Option<String>,
}

/// Registration. Role flags create the matching profile rows.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    validate_password(&req.password)?;
    let password_hash = hash_password(req.password).await?;
    let user = state.db.register_user(NewUser {
        email: req.email,
        password_hash,
        is_student: req.is_student,
        is_tutor: req.is_tutor,
        is_staff: false,
        is_superuser: false,
        profile_picture: req.profile_picture,
    })?;
    info!(user_id = user.id, "registered user");
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> ApiResult<Json<UserResponse>> {
    let user = state.db.get_user(id)?;
    Ok(Json(UserResponse::from(&user)))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub is_student: Option<bool>,
    pub is_tutor: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub profile_picture: Option<Option<String>>,
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<UserId>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    auth.ensure_self_or_staff(id)?;
    let user = state.db.update_user(
        id,
        UserPatch {
            email: req.email,
            is_student: req.is_student,
            is_tutor: req.is_tutor,
            is_active: None,
            profile_picture: req.profile_picture,
        },
    )?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<UserId>,
) -> ApiResult<StatusCode> {
    auth.ensure_self_or_staff(id)?;
    state.db.delete_user(id)?;
    Ok(StatusCode::NO_CONTENT)
}
