use chrono::Utc;
use tracing::debug;
use tutorhub_core::{
    validation::{validate_max_len, validate_not_blank, MAX_TITLE_LEN},
    Answer, AnswerId, Comment, Question, QuestionId, Result, TutorHubError, User, UserId, Vote,
    VoteTally, VoteType,
};

use crate::{Database, WriteBatch};

impl Database {
    pub fn create_question(&self, user_id: UserId, title: &str, content: &str) -> Result<Question> {
        validate_not_blank("title", title)?;
        validate_max_len("title", title, MAX_TITLE_LEN)?;
        validate_not_blank("content", content)?;
        let _guard = self.lock();
        self.require::<User>(user_id)?;
        self.insert(Question {
            id: 0,
            user_id,
            title: title.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn get_question(&self, id: QuestionId) -> Result<Question> {
        self.require(id)
    }

    pub fn list_questions(&self) -> Result<Vec<Question>> {
        self.all()
    }

    pub fn create_answer(
        &self,
        user_id: UserId,
        question_id: QuestionId,
        content: &str,
    ) -> Result<Answer> {
        validate_not_blank("content", content)?;
        let _guard = self.lock();
        self.require::<User>(user_id)?;
        if self.load::<Question>(question_id)?.is_none() {
            return Err(TutorHubError::Validation("Question does not exist".into()));
        }
        self.insert(Answer {
            id: 0,
            question_id,
            user_id,
            content: content.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn get_answer(&self, id: AnswerId) -> Result<Answer> {
        self.require(id)
    }

    pub fn list_answers(&self, question_id: Option<QuestionId>) -> Result<Vec<Answer>> {
        self.all_where::<Answer>(|a| question_id.map_or(true, |q| a.question_id == q))
    }

    pub fn create_comment(
        &self,
        user_id: UserId,
        answer_id: AnswerId,
        content: &str,
    ) -> Result<Comment> {
        validate_not_blank("content", content)?;
        let _guard = self.lock();
        self.require::<User>(user_id)?;
        if self.load::<Answer>(answer_id)?.is_none() {
            return Err(TutorHubError::Validation("Answer not found.".into()));
        }
        self.insert(Comment {
            id: 0,
            answer_id,
            user_id,
            content: content.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub fn list_comments(&self, answer_id: Option<AnswerId>) -> Result<Vec<Comment>> {
        self.all_where::<Comment>(|c| answer_id.map_or(true, |a| c.answer_id == a))
    }

    /// Records a user's vote on an answer. A user holds at most one vote per
    /// answer; voting again replaces the type. The flag reports whether a new
    /// vote row was created.
    pub fn cast_vote(
        &self,
        user_id: UserId,
        answer_id: AnswerId,
        vote_type: VoteType,
    ) -> Result<(Vote, bool)> {
        let _guard = self.lock();
        self.require::<User>(user_id)?;
        if self.load::<Answer>(answer_id)?.is_none() {
            return Err(TutorHubError::Validation("Answer not found.".into()));
        }
        match self.first_where::<Vote>(|v| v.user_id == user_id && v.answer_id == answer_id)? {
            Some(mut existing) => {
                existing.vote_type = vote_type;
                self.save(&existing)?;
                debug!(vote_id = existing.id, %vote_type, "replaced vote");
                Ok((existing, false))
            }
            None => {
                let vote = self.insert(Vote {
                    id: 0,
                    user_id,
                    answer_id,
                    vote_type,
                })?;
                Ok((vote, true))
            }
        }
    }

    pub fn list_votes(&self, answer_id: Option<AnswerId>) -> Result<Vec<Vote>> {
        self.all_where::<Vote>(|v| answer_id.map_or(true, |a| v.answer_id == a))
    }

    pub fn vote_tally(&self, answer_id: AnswerId) -> Result<VoteTally> {
        self.require::<Answer>(answer_id)?;
        let votes = self.list_votes(Some(answer_id))?;
        Ok(VoteTally::from_votes(answer_id, &votes))
    }

    /// Stages the removal of an answer with its comments and votes.
    pub(crate) fn stage_remove_answer(
        &self,
        batch: &mut WriteBatch,
        answer_id: AnswerId,
    ) -> Result<()> {
        for comment in self.all_where::<Comment>(|c| c.answer_id == answer_id)? {
            self.stage_remove::<Comment>(batch, comment.id);
        }
        for vote in self.all_where::<Vote>(|v| v.answer_id == answer_id)? {
            self.stage_remove::<Vote>(batch, vote.id);
        }
        self.stage_remove::<Answer>(batch, answer_id);
        Ok(())
    }

    /// Stages the removal of a question and its whole answer thread.
    pub(crate) fn stage_remove_question(
        &self,
        batch: &mut WriteBatch,
        question_id: QuestionId,
    ) -> Result<()> {
        for answer in self.all_where::<Answer>(|a| a.question_id == question_id)? {
            self.stage_remove_answer(batch, answer.id)?;
        }
        self.stage_remove::<Question>(batch, question_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorhub_core::NewUser;

    fn setup() -> (Database, User, User) {
        let db = Database::in_memory();
        let mk = |email: &str| {
            db.create_user(NewUser {
                email: email.into(),
                password_hash: "hash".into(),
                ..NewUser::default()
            })
            .unwrap()
        };
        let asker = mk("asker@uni.edu");
        let helper = mk("helper@uni.edu");
        (db, asker, helper)
    }

    #[test]
    fn thread_of_question_answer_comment() {
        let (db, asker, helper) = setup();
        let q = db.create_question(asker.id, "Recursion", "How deep?").unwrap();
        let a = db.create_answer(helper.id, q.id, "Until the base case").unwrap();
        let c = db.create_comment(asker.id, a.id, "thanks").unwrap();

        assert_eq!(db.list_answers(Some(q.id)).unwrap(), vec![a.clone()]);
        assert!(db.list_answers(Some(q.id + 1)).unwrap().is_empty());
        assert_eq!(db.list_comments(Some(a.id)).unwrap(), vec![c]);
    }

    #[test]
    fn missing_parents_are_validation_errors() {
        let (db, asker, _) = setup();
        let err = db.create_answer(asker.id, 42, "orphan").unwrap_err();
        assert!(matches!(err, TutorHubError::Validation(ref m) if m == "Question does not exist"));
        let err = db.create_comment(asker.id, 42, "orphan").unwrap_err();
        assert!(matches!(err, TutorHubError::Validation(ref m) if m == "Answer not found."));
        assert!(db.cast_vote(asker.id, 42, VoteType::Upvote).is_err());
    }

    #[test]
    fn question_fields_are_validated() {
        let (db, asker, _) = setup();
        assert!(db.create_question(asker.id, "", "body").is_err());
        assert!(db.create_question(asker.id, &"t".repeat(256), "body").is_err());
        assert!(db.create_question(asker.id, "title", "   ").is_err());
    }

    #[test]
    fn revoting_replaces_previous_vote() {
        let (db, asker, helper) = setup();
        let q = db.create_question(asker.id, "Q", "?").unwrap();
        let a = db.create_answer(helper.id, q.id, "A").unwrap();

        let (first, created) = db.cast_vote(asker.id, a.id, VoteType::Upvote).unwrap();
        assert!(created);
        let (second, created) = db.cast_vote(asker.id, a.id, VoteType::Downvote).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        db.cast_vote(helper.id, a.id, VoteType::Downvote).unwrap();
        let tally = db.vote_tally(a.id).unwrap();
        assert_eq!((tally.upvotes, tally.downvotes, tally.score), (0, 2, -2));
        assert!(db.vote_tally(a.id + 100).is_err());
    }
}
