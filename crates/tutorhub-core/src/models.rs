use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, TutorHubError};

pub type UserId = i64;
pub type StudentId = i64;
pub type TutorId = i64;
pub type QuestionId = i64;
pub type AnswerId = i64;
pub type CommentId = i64;
pub type VoteId = i64;

/// Account record. Email is the login identifier and is unique after
/// normalisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub is_student: bool,
    pub is_tutor: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub profile_picture: Option<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Input for account creation. `password_hash` is already hashed.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub is_student: bool,
    pub is_tutor: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub is_student: Option<bool>,
    pub is_tutor: Option<bool>,
    pub is_active: Option<bool>,
    pub profile_picture: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub is_student: Option<bool>,
    pub is_tutor: Option<bool>,
    pub search: Option<String>,
    pub order_by_email: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Student {
    pub id: StudentId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Course {
    #[default]
    #[serde(rename = "AI")]
    IntroToAi,
    #[serde(rename = "DS")]
    DataStructures,
    #[serde(rename = "WT")]
    WebTechnologies,
    #[serde(rename = "MS")]
    Modelling,
}

impl Course {
    pub const ALL: [Course; 4] = [
        Course::IntroToAi,
        Course::DataStructures,
        Course::WebTechnologies,
        Course::Modelling,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Course::IntroToAi => "AI",
            Course::DataStructures => "DS",
            Course::WebTechnologies => "WT",
            Course::Modelling => "MS",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Course::IntroToAi => "Intro to AI",
            Course::DataStructures => "Data Structure and Algorithms",
            Course::WebTechnologies => "Web Technologies",
            Course::Modelling => "Modelling and Simulations",
        }
    }
}

impl fmt::Display for Course {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Course {
    type Err = TutorHubError;

    fn from_str(s: &str) -> Result<Self> {
        Course::ALL
            .into_iter()
            .find(|c| c.code() == s)
            .ok_or_else(|| TutorHubError::Validation(format!("\"{}\" is not a valid course", s)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tutor {
    pub id: TutorId,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub year: i32,
    pub courses: Course,
    pub bio: String,
    pub rating: f64,
    pub total_ratings: u32,
}

impl Tutor {
    /// Folds one more score into the running average and returns it.
    pub fn apply_rating(&mut self, score: Rating) -> f64 {
        self.total_ratings += 1;
        let n = f64::from(self.total_ratings);
        self.rating = (self.rating * (n - 1.0) + f64::from(score.value())) / n;
        self.rating
    }
}

/// Editable part of a tutor profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TutorProfile {
    pub first_name: String,
    pub last_name: String,
    pub year: i32,
    pub courses: Course,
    pub bio: String,
}

#[derive(Debug, Clone, Default)]
pub struct TutorPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub year: Option<i32>,
    pub courses: Option<Course>,
    pub bio: Option<String>,
    pub profile_picture: Option<Option<String>>,
}

/// A single 1..=5 score given to a tutor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rating(u8);

impl Rating {
    pub const MIN: i64 = 1;
    pub const MAX: i64 = 5;

    pub fn new(value: i64) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(TutorHubError::Validation(format!(
                "rating must be between {} and {}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Rating {
    type Error = TutorHubError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PasswordReset {
    pub id: i64,
    pub email: String,
    pub token: String,
    pub token_expires: DateTime<Utc>,
}

impl PasswordReset {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expires <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub user_id: UserId,
    pub title: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: AnswerId,
    pub question_id: QuestionId,
    pub user_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: CommentId,
    pub answer_id: AnswerId,
    pub user_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteType::Upvote => "upvote",
            VoteType::Downvote => "downvote",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteType {
    type Err = TutorHubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upvote" => Ok(VoteType::Upvote),
            "downvote" => Ok(VoteType::Downvote),
            other => Err(TutorHubError::Validation(format!(
                "vote_type must be \"upvote\" or \"downvote\", got \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: VoteId,
    pub user_id: UserId,
    pub answer_id: AnswerId,
    pub vote_type: VoteType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteTally {
    pub answer_id: AnswerId,
    pub upvotes: u32,
    pub downvotes: u32,
    pub score: i64,
}

impl VoteTally {
    pub fn from_votes<'a>(answer_id: AnswerId, votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let (mut upvotes, mut downvotes) = (0u32, 0u32);
        for vote in votes.into_iter().filter(|v| v.answer_id == answer_id) {
            match vote.vote_type {
                VoteType::Upvote => upvotes += 1,
                VoteType::Downvote => downvotes += 1,
            }
        }
        Self {
            answer_id,
            upvotes,
            downvotes,
            score: i64::from(upvotes) - i64::from(downvotes),
        }
    }
}
