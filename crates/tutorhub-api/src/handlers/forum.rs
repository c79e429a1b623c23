use axum::{extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tutorhub_core::{
    Answer, AnswerId, Comment, CommentId, Question, QuestionId, Vote, VoteId, VoteTally, VoteType,
};

use super::EmailLookup;
use crate::extract::{Json, Path, Query};
use crate::{ApiResult, AppState, AuthUser};

// -------- Questions --------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QuestionResponse {
    pub id: QuestionId,
    pub user: String,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl QuestionResponse {
    fn new(question: Question, user: String) -> Self {
        Self {
            id: question.id,
            user,
            title: question.title,
            content: question.content,
            timestamp: question.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateQuestionRequest {
    pub title: String,
    pub content: String,
}

pub async fn list_questions(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> ApiResult<Json<Vec<QuestionResponse>>> {
    let emails = EmailLookup::load(&state.db)?;
    let questions = state.db.list_questions()?;
    Ok(Json(
        questions
            .into_iter()
            .map(|q| {
                let user = emails.email(q.user_id);
                QuestionResponse::new(q, user)
            })
            .collect(),
    ))
}

pub async fn create_question(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateQuestionRequest>,
) -> ApiResult<(StatusCode, Json<QuestionResponse>)> {
    let question = state
        .db
        .create_question(auth.id(), &req.title, &req.content)?;
    Ok((
        StatusCode::CREATED,
        Json(QuestionResponse::new(question, auth.user.email)),
    ))
}

// -------- Answers --------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnswerResponse {
    pub id: AnswerId,
    pub question_id: QuestionId,
    pub user: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl AnswerResponse {
    fn new(answer: Answer, user: String) -> Self {
        Self {
            id: answer.id,
            question_id: answer.question_id,
            user,
            content: answer.content,
            timestamp: answer.timestamp,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AnswerListQuery {
    pub question_id: Option<QuestionId>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAnswerRequest {
    pub question_id: QuestionId,
    pub content: String,
}

pub async fn list_answers(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<AnswerListQuery>,
) -> ApiResult<Json<Vec<AnswerResponse>>> {
    let emails = EmailLookup::load(&state.db)?;
    let answers = state.db.list_answers(query.question_id)?;
    Ok(Json(
        answers
            .into_iter()
            .map(|a| {
                let user = emails.email(a.user_id);
                AnswerResponse::new(a, user)
            })
            .collect(),
    ))
}

pub async fn create_answer(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateAnswerRequest>,
) -> ApiResult<(StatusCode, Json<AnswerResponse>)> {
    let answer = state
        .db
        .create_answer(auth.id(), req.question_id, &req.content)?;
    Ok((
        StatusCode::CREATED,
        Json(AnswerResponse::new(answer, auth.user.email)),
    ))
}

// -------- Comments --------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CommentResponse {
    pub id: CommentId,
    pub answer_id: AnswerId,
    pub user: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl CommentResponse {
    fn new(comment: Comment, user: String) -> Self {
        Self {
            id: comment.id,
            answer_id: comment.answer_id,
            user,
            content: comment.content,
            timestamp: comment.timestamp,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ByAnswerQuery {
    pub answer_id: Option<AnswerId>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub answer_id: AnswerId,
    pub content: String,
}

pub async fn list_comments(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ByAnswerQuery>,
) -> ApiResult<Json<Vec<CommentResponse>>> {
    let emails = EmailLookup::load(&state.db)?;
    let comments = state.db.list_comments(query.answer_id)?;
    Ok(Json(
        comments
            .into_iter()
            .map(|c| {
                let user = emails.email(c.user_id);
                CommentResponse::new(c, user)
            })
            .collect(),
    ))
}

pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<(StatusCode, Json<CommentResponse>)> {
    let comment = state
        .db
        .create_comment(auth.id(), req.answer_id, &req.content)?;
    Ok((
        StatusCode::CREATED,
        Json(CommentResponse::new(comment, auth.user.email)),
    ))
}

// -------- Votes --------

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VoteResponse {
    pub id: VoteId,
    pub answer: AnswerId,
    pub user: String,
    pub vote_type: VoteType,
}

impl VoteResponse {
    fn new(vote: Vote, user: String) -> Self {
        Self {
            id: vote.id,
            answer: vote.answer_id,
            user,
            vote_type: vote.vote_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    pub answer_id: AnswerId,
    pub vote_type: String,
}

pub async fn list_votes(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ByAnswerQuery>,
) -> ApiResult<Json<Vec<VoteResponse>>> {
    let emails = EmailLookup::load(&state.db)?;
    let votes = state.db.list_votes(query.answer_id)?;
    Ok(Json(
        votes
            .into_iter()
            .map(|v| {
                let user = emails.email(v.user_id);
                VoteResponse::new(v, user)
            })
            .collect(),
    ))
}

/// 201 for a first vote, 200 when an earlier vote was replaced.
pub async fn cast_vote(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CastVoteRequest>,
) -> ApiResult<(StatusCode, Json<VoteResponse>)> {
    let vote_type: VoteType = req.vote_type.parse()?;
    let (vote, created) = state.db.cast_vote(auth.id(), req.answer_id, vote_type)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(VoteResponse::new(vote, auth.user.email))))
}

pub async fn vote_tally(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(answer_id): Path<AnswerId>,
) -> ApiResult<Json<VoteTally>> {
    Ok(Json(state.db.vote_tally(answer_id)?))
}
