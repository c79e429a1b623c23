use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;
use tutorhub_core::{
    validation::validate_password, Course, NewUser, Rating, Tutor, TutorId, TutorPatch,
    TutorProfile, User, UserId,
};

use super::{double_option, hash_password, UserResponse};
use crate::extract::{Json, Path, Query};
use crate::{ApiError, ApiResult, AppState, AuthUser};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TutorResponse {
    pub id: TutorId,
    pub user: UserResponse,
    pub profile_picture: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub year: i32,
    pub courses: Course,
    pub bio: String,
    pub rating: f64,
    pub total_ratings: u32,
}

impl TutorResponse {
    fn new(tutor: &Tutor, user: &User) -> Self {
        Self {
            id: tutor.id,
            user: UserResponse::from(user),
            profile_picture: user.profile_picture.clone(),
            first_name: tutor.first_name.clone(),
            last_name: tutor.last_name.clone(),
            year: tutor.year,
            courses: tutor.courses,
            bio: tutor.bio.clone(),
            rating: tutor.rating,
            total_ratings: tutor.total_ratings,
        }
    }
}

fn render(state: &AppState, tutor: &Tutor) -> ApiResult<TutorResponse> {
    let user = state.db.get_user(tutor.user_id)?;
    Ok(TutorResponse::new(tutor, &user))
}

#[derive(Debug, Deserialize, Default)]
pub struct TutorListQuery {
    pub search: Option<String>,
}

pub async fn list_tutors(
    State(state): State<AppState>,
    Query(query): Query<TutorListQuery>,
) -> ApiResult<Json<Vec<TutorResponse>>> {
    let tutors = state.db.list_tutors(query.search.as_deref())?;
    let body = tutors
        .iter()
        .map(|t| render(&state, t))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct NewTutorUser {
    pub email: String,
    pub password: String,
}

/// Either `user` (a new account) or `user_id` (an existing one) must be
/// given, not both.
#[derive(Debug, Deserialize)]
pub struct CreateTutorRequest {
    pub user: Option<NewTutorUser>,
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub year: i32,
    #[serde(default)]
    pub courses: Course,
    #[serde(default)]
    pub bio: String,
}

pub async fn create_tutor(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Json(req): Json<CreateTutorRequest>,
) -> ApiResult<(StatusCode, Json<TutorResponse>)> {
    let profile = TutorProfile {
        first_name: req.first_name,
        last_name: req.last_name,
        year: req.year,
        courses: req.courses,
        bio: req.bio,
    };

    let tutor = match (req.user, req.user_id) {
        (Some(new_user), None) => {
            validate_password(&new_user.password)?;
            let password_hash = hash_password(new_user.password).await?;
            state.db.create_tutor_with_user(
                NewUser {
                    email: new_user.email,
                    password_hash,
                    profile_picture: req.profile_picture,
                    ..NewUser::default()
                },
                profile,
            )?
        }
        (None, Some(user_id)) => {
            let auth = auth.ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided.".into())
            })?;
            auth.ensure_self_or_staff(user_id)?;
            state
                .db
                .create_tutor(user_id, profile, req.profile_picture)?
        }
        _ => {
            return Err(ApiError::Validation(
                "provide exactly one of `user` or `user_id`".into(),
            ))
        }
    };

    info!(tutor_id = tutor.id, "created tutor");
    Ok((StatusCode::CREATED, Json(render(&state, &tutor)?)))
}

pub async fn get_tutor(
    State(state): State<AppState>,
    Path(id): Path<TutorId>,
) -> ApiResult<Json<TutorResponse>> {
    let tutor = state.db.get_tutor(id)?;
    Ok(Json(render(&state, &tutor)?))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateTutorRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub year: Option<i32>,
    pub courses: Option<Course>,
    pub bio: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub profile_picture: Option<Option<String>>,
}

pub async fn update_tutor(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<TutorId>,
    Json(req): Json<UpdateTutorRequest>,
) -> ApiResult<Json<TutorResponse>> {
    let tutor = state.db.get_tutor(id)?;
    auth.ensure_self_or_staff(tutor.user_id)?;
    let tutor = state.db.update_tutor(
        id,
        TutorPatch {
            first_name: req.first_name,
            last_name: req.last_name,
            year: req.year,
            courses: req.courses,
            bio: req.bio,
            profile_picture: req.profile_picture,
        },
    )?;
    Ok(Json(render(&state, &tutor)?))
}

pub async fn delete_tutor(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<TutorId>,
) -> ApiResult<StatusCode> {
    let tutor = state.db.get_tutor(id)?;
    auth.ensure_self_or_staff(tutor.user_id)?;
    state.db.delete_tutor(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RateTutorRequest {
    pub rating: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateTutorResponse {
    pub id: TutorId,
    pub rating: f64,
    pub total_ratings: u32,
}

pub async fn rate_tutor(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<TutorId>,
    Json(req): Json<RateTutorRequest>,
) -> ApiResult<Json<RateTutorResponse>> {
    let score = Rating::new(req.rating)?;
    let tutor = state.db.get_tutor(id)?;
    if tutor.user_id == auth.id() {
        return Err(ApiError::Forbidden("Tutors cannot rate themselves.".into()));
    }
    let tutor = state.db.rate_tutor(id, score)?;
    Ok(Json(RateTutorResponse {
        id: tutor.id,
        rating: tutor.rating,
        total_ratings: tutor.total_ratings,
    }))
}
