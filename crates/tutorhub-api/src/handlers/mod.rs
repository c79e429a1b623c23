pub mod accounts;
pub mod forum;
pub mod health;
pub mod students;
pub mod tutors;
pub mod users;

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tutorhub_core::{User, UserFilter, UserId};
use tutorhub_store::Database;

use crate::{ApiError, ApiResult};

/// Hashes on the blocking pool.
pub(crate) async fn hash_password(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || tutorhub_core::hash_password(&password))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(ApiError::from)
}

pub(crate) async fn verify_password(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || tutorhub_core::verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Public projection of a user. Never includes the password hash.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub is_student: bool,
    pub is_tutor: bool,
    pub profile_picture: Option<String>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            is_student: user.is_student,
            is_tutor: user.is_tutor,
            profile_picture: user.profile_picture.clone(),
        }
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in partial updates.
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Resolves author ids to emails for list responses with one scan.
pub(crate) struct EmailLookup(HashMap<UserId, String>);

impl EmailLookup {
    pub(crate) fn load(db: &Database) -> ApiResult<Self> {
        let users = db.list_users(&UserFilter::default())?;
        Ok(Self(users.into_iter().map(|u| (u.id, u.email)).collect()))
    }

    pub(crate) fn email(&self, id: UserId) -> String {
        self.0.get(&id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        picture: Option<Option<String>>,
    }

    #[test]
    fn double_option_separates_null_from_missing() {
        let missing: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"picture": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"picture": "a.png"}"#).unwrap();
        assert_eq!(missing.picture, None);
        assert_eq!(null.picture, Some(None));
        assert_eq!(set.picture, Some(Some("a.png".into())));
    }
}
