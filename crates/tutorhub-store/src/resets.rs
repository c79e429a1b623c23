use chrono::{DateTime, Utc};
use tracing::{debug, info};
use tutorhub_core::{PasswordReset, Result, TutorHubError, User};

use crate::{Database, WriteBatch};

impl Database {
    pub fn create_password_reset(
        &self,
        email: &str,
        token: &str,
        expires: DateTime<Utc>,
    ) -> Result<PasswordReset> {
        let _guard = self.lock();
        if self.first_where::<PasswordReset>(|r| r.token == token)?.is_some() {
            return Err(TutorHubError::Conflict("reset token already issued".into()));
        }
        let reset = self.insert(PasswordReset {
            id: 0,
            email: email.to_string(),
            token: token.to_string(),
            token_expires: expires,
        })?;
        debug!(reset_id = reset.id, "issued password reset token");
        Ok(reset)
    }

    pub fn find_password_reset(&self, token: &str) -> Result<Option<PasswordReset>> {
        self.first_where::<PasswordReset>(|r| r.token == token)
    }

    pub fn delete_password_reset(&self, id: i64) -> Result<bool> {
        let _guard = self.lock();
        self.remove::<PasswordReset>(id)
    }

    /// Removes every token whose deadline has passed; returns how many.
    pub fn delete_expired_password_resets(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock();
        let expired = self.all_where::<PasswordReset>(|r| r.is_expired(now))?;
        let mut batch = WriteBatch::new();
        for reset in &expired {
            self.stage_remove::<PasswordReset>(&mut batch, reset.id);
        }
        self.commit(batch)?;
        if !expired.is_empty() {
            info!(count = expired.len(), "purged expired password reset tokens");
        }
        Ok(expired.len())
    }

    /// Consumes a reset token and stores the new password hash. Unknown,
    /// expired and orphaned tokens all fail with the same message. Every
    /// outstanding token for the address is invalidated on success.
    pub fn confirm_password_reset(
        &self,
        token: &str,
        new_password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let _guard = self.lock();
        let invalid = || TutorHubError::Validation("Invalid token".into());

        let reset = self
            .first_where::<PasswordReset>(|r| r.token == token)?
            .ok_or_else(invalid)?;
        if reset.is_expired(now) {
            self.remove::<PasswordReset>(reset.id)?;
            return Err(invalid());
        }
        let mut user = self
            .first_where::<User>(|u| u.email.eq_ignore_ascii_case(&reset.email))?
            .ok_or_else(invalid)?;

        user.password_hash = new_password_hash;
        let mut batch = WriteBatch::new();
        self.stage_save(&mut batch, &user)?;
        for stale in self.all_where::<PasswordReset>(|r| r.email == reset.email)? {
            self.stage_remove::<PasswordReset>(&mut batch, stale.id);
        }
        self.commit(batch)?;
        info!(user_id = user.id, "password reset completed");
        Ok(user)
    }
}
