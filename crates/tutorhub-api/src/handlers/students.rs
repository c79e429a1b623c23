use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tutorhub_core::{Student, StudentId, User, UserId, UserPatch};

use crate::extract::{Json, Path};
use crate::{ApiResult, AppState, AuthUser};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StudentResponse {
    pub id: StudentId,
    pub user_id: UserId,
    pub email: String,
    pub is_student: bool,
    pub is_tutor: bool,
}

impl StudentResponse {
    fn new(student: &Student, user: &User) -> Self {
        Self {
            id: student.id,
            user_id: user.id,
            email: user.email.clone(),
            is_student: user.is_student,
            is_tutor: user.is_tutor,
        }
    }
}

fn render(state: &AppState, student: &Student) -> ApiResult<StudentResponse> {
    let user = state.db.get_user(student.user_id)?;
    Ok(StudentResponse::new(student, &user))
}

pub async fn list_students(State(state): State<AppState>) -> ApiResult<Json<Vec<StudentResponse>>> {
    let students = state.db.list_students()?;
    let body = students
        .iter()
        .map(|s| render(&state, s))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub user_id: UserId,
}

pub async fn create_student(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateStudentRequest>,
) -> ApiResult<(StatusCode, Json<StudentResponse>)> {
    auth.ensure_self_or_staff(req.user_id)?;
    let student = state.db.create_student(req.user_id)?;
    Ok((StatusCode::CREATED, Json(render(&state, &student)?)))
}

pub async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<StudentId>,
) -> ApiResult<Json<StudentResponse>> {
    let student = state.db.get_student(id)?;
    Ok(Json(render(&state, &student)?))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateStudentRequest {
    pub email: Option<String>,
    pub is_student: Option<bool>,
    pub is_tutor: Option<bool>,
}

pub async fn update_student(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<StudentId>,
    Json(req): Json<UpdateStudentRequest>,
) -> ApiResult<Json<StudentResponse>> {
    let student = state.db.get_student(id)?;
    auth.ensure_self_or_staff(student.user_id)?;
    let student = state.db.update_student(
        id,
        UserPatch {
            email: req.email,
            is_student: req.is_student,
            is_tutor: req.is_tutor,
            ..UserPatch::default()
        },
    )?;
    Ok(Json(render(&state, &student)?))
}

pub async fn delete_student(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<StudentId>,
) -> ApiResult<StatusCode> {
    let student = state.db.get_student(id)?;
    auth.ensure_self_or_staff(student.user_id)?;
    state.db.delete_student(id)?;
    Ok(StatusCode::NO_CONTENT)
}
