use chrono::{DateTime, Utc};
use tracing::info;
use tutorhub_core::{
    validation::validate_email, Answer, Comment, NewUser, PasswordReset, Question, Result,
    Student, Tutor, TutorHubError, TutorProfile, User, UserFilter, UserId, UserPatch, Vote,
};

use crate::{Database, WriteBatch};

impl Database {
    /// Creates an account without any profile rows.
    pub fn create_user(&self, new: NewUser) -> Result<User> {
        let _guard = self.lock();
        let user = self.insert(self.prepare_user(new)?)?;
        info!(user_id = user.id, "created user");
        Ok(user)
    }

    /// Creates an account and the profile rows its role flags call for: a
    /// Student row for `is_student` and a blank Tutor row for `is_tutor`.
    /// A tutor is never also a student, so `is_tutor` wins over `is_student`.
    pub fn register_user(&self, new: NewUser) -> Result<User> {
        let _guard = self.lock();
        let is_student = new.is_student && !new.is_tutor;
        let user = self.prepare_user(NewUser { is_student, ..new })?;

        let mut batch = WriteBatch::new();
        let user = self.stage_insert(&mut batch, user)?;
        if user.is_student {
            self.stage_insert(&mut batch, Student { id: 0, user_id: user.id })?;
        }
        if user.is_tutor {
            self.stage_insert(&mut batch, blank_tutor(user.id, TutorProfile::default()))?;
        }
        self.commit(batch)?;
        info!(user_id = user.id, "created user");
        Ok(user)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.require(id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = tutorhub_core::validation::normalize_email(email);
        self.first_where::<User>(|u| u.email.eq_ignore_ascii_case(&email))
    }

    pub fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut users = self.all_where::<User>(|u| {
            filter.is_student.map_or(true, |v| u.is_student == v)
                && filter.is_tutor.map_or(true, |v| u.is_tutor == v)
                && search
                    .as_deref()
                    .map_or(true, |s| u.email.to_lowercase().contains(s))
        })?;
        if filter.order_by_email {
            users.sort_by(|a, b| a.email.cmp(&b.email));
        }
        Ok(users)
    }

    pub fn update_user(&self, id: UserId, patch: UserPatch) -> Result<User> {
        let _guard = self.lock();
        self.update_user_locked(id, patch)
    }

    pub fn set_password(&self, id: UserId, password_hash: String) -> Result<()> {
        let _guard = self.lock();
        let mut user: User = self.require(id)?;
        user.password_hash = password_hash;
        self.save(&user)
    }

    pub fn touch_last_login(&self, id: UserId, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock();
        let mut user: User = self.require(id)?;
        user.last_login = Some(at);
        self.save(&user)
    }

    /// Deletes an account together with everything that references it, in
    /// one batch.
    pub fn delete_user(&self, id: UserId) -> Result<()> {
        let _guard = self.lock();
        let user: User = self.require(id)?;
        let mut batch = WriteBatch::new();

        for student in self.all_where::<Student>(|s| s.user_id == id)? {
            self.stage_remove::<Student>(&mut batch, student.id);
        }
        for tutor in self.all_where::<Tutor>(|t| t.user_id == id)? {
            self.stage_remove::<Tutor>(&mut batch, tutor.id);
        }
        for question in self.all_where::<Question>(|q| q.user_id == id)? {
            self.stage_remove_question(&mut batch, question.id)?;
        }
        for answer in self.all_where::<Answer>(|a| a.user_id == id)? {
            self.stage_remove_answer(&mut batch, answer.id)?;
        }
        for comment in self.all_where::<Comment>(|c| c.user_id == id)? {
            self.stage_remove::<Comment>(&mut batch, comment.id);
        }
        for vote in self.all_where::<Vote>(|v| v.user_id == id)? {
            self.stage_remove::<Vote>(&mut batch, vote.id);
        }
        for reset in self.all_where::<PasswordReset>(|r| r.email == user.email)? {
            self.stage_remove::<PasswordReset>(&mut batch, reset.id);
        }
        self.stage_remove::<User>(&mut batch, id);

        self.commit(batch)?;
        info!(user_id = id, "deleted user and dependent records");
        Ok(())
    }

    /// Validates a new account and checks the email is free. The returned
    /// user has no id yet.
    pub(crate) fn prepare_user(&self, new: NewUser) -> Result<User> {
        let email = validate_email(&new.email)?;
        if self.email_taken(&email, None)? {
            return Err(TutorHubError::Conflict(
                "user with this email already exists.".into(),
            ));
        }
        Ok(User {
            id: 0,
            email,
            password_hash: new.password_hash,
            is_student: new.is_student,
            is_tutor: new.is_tutor,
            is_staff: new.is_staff,
            is_superuser: new.is_superuser,
            is_active: true,
            profile_picture: new.profile_picture,
            date_joined: Utc::now(),
            last_login: None,
        })
    }

    /// Applies a patch and keeps profile rows in step with the role flags.
    ///
    /// Setting `is_tutor` demotes a student: `is_student` is cleared and the
    /// Student row removed. Asking for `is_student` on a tutor is refused.
    pub(crate) fn update_user_locked(&self, id: UserId, patch: UserPatch) -> Result<User> {
        let mut user: User = self.require(id)?;
        let mut batch = WriteBatch::new();

        if let Some(email) = patch.email {
            let email = validate_email(&email)?;
            if self.email_taken(&email, Some(id))? {
                return Err(TutorHubError::Conflict(
                    "user with this email already exists.".into(),
                ));
            }
            if email != user.email {
                // Pending resets were issued for the old address.
                for reset in self.all_where::<PasswordReset>(|r| r.email == user.email)? {
                    self.stage_remove::<PasswordReset>(&mut batch, reset.id);
                }
            }
            user.email = email;
        }
        if let Some(active) = patch.is_active {
            user.is_active = active;
        }
        if let Some(picture) = patch.profile_picture {
            user.profile_picture = picture;
        }

        let is_tutor = patch.is_tutor.unwrap_or(user.is_tutor);
        let is_student = match patch.is_student {
            Some(true) if is_tutor && patch.is_tutor != Some(true) => {
                return Err(TutorHubError::Validation(
                    "a tutor cannot also be a student".into(),
                ))
            }
            _ if patch.is_tutor == Some(true) => false,
            Some(wanted) => wanted,
            None => user.is_student,
        };
        if is_student != user.is_student || patch.is_student.is_some() {
            self.stage_student_row(&mut batch, id, is_student)?;
        }
        if patch.is_tutor.is_some() {
            self.stage_tutor_row(&mut batch, id, is_tutor)?;
        }
        user.is_student = is_student;
        user.is_tutor = is_tutor;

        self.stage_save(&mut batch, &user)?;
        self.commit(batch)?;
        Ok(user)
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> Result<bool> {
        Ok(self
            .first_where::<User>(|u| {
                u.email.eq_ignore_ascii_case(email) && Some(u.id) != except
            })?
            .is_some())
    }

    pub(crate) fn stage_student_row(
        &self,
        batch: &mut WriteBatch,
        user_id: UserId,
        wanted: bool,
    ) -> Result<()> {
        let existing = self.all_where::<Student>(|s| s.user_id == user_id)?;
        match (wanted, existing.is_empty()) {
            (true, true) => {
                self.stage_insert(batch, Student { id: 0, user_id })?;
            }
            (false, false) => {
                for student in existing {
                    self.stage_remove::<Student>(batch, student.id);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn stage_tutor_row(&self, batch: &mut WriteBatch, user_id: UserId, wanted: bool) -> Result<()> {
        let existing = self.all_where::<Tutor>(|t| t.user_id == user_id)?;
        match (wanted, existing.is_empty()) {
            (true, true) => {
                self.stage_insert(batch, blank_tutor(user_id, TutorProfile::default()))?;
            }
            (false, false) => {
                for tutor in existing {
                    self.stage_remove::<Tutor>(batch, tutor.id);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

pub(crate) fn blank_tutor(user_id: UserId, profile: TutorProfile) -> Tutor {
    Tutor {
        id: 0,
        user_id,
        first_name: profile.first_name,
        last_name: profile.last_name,
        year: profile.year,
        courses: profile.courses,
        bio: profile.bio,
        rating: 0.0,
        total_ratings: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KvBackend, MemoryBackend, Table};
    use std::sync::Arc;
    use tutorhub_core::VoteType;

    /// Memory store whose batch commits always fail, as a storage error
    /// part way through a cascade would.
    struct BatchFails(MemoryBackend);

    impl KvBackend for BatchFails {
        fn get(&self, table: Table, id: i64) -> Result<Option<Vec<u8>>> {
            self.0.get(table, id)
        }

        fn put(&self, table: Table, id: i64, value: Vec<u8>) -> Result<()> {
            self.0.put(table, id, value)
        }

        fn delete(&self, table: Table, id: i64) -> Result<bool> {
            self.0.delete(table, id)
        }

        fn scan(&self, table: Table) -> Result<Vec<Vec<u8>>> {
            self.0.scan(table)
        }

        fn next_id(&self, table: Table) -> Result<i64> {
            self.0.next_id(table)
        }

        fn write_batch(&self, _batch: WriteBatch) -> Result<()> {
            Err(TutorHubError::Database("disk full".into()))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            ..NewUser::default()
        }
    }

    #[test]
    fn emails_are_unique_case_insensitively() {
        let db = Database::in_memory();
        db.create_user(new_user("sam@Uni.edu")).unwrap();
        let err = db.create_user(new_user("SAM@uni.edu")).unwrap_err();
        assert!(matches!(err, TutorHubError::Conflict(_)));
        assert!(db.find_user_by_email("sam@UNI.EDU").unwrap().is_some());
    }

    #[test]
    fn registration_creates_role_rows() {
        let db = Database::in_memory();
        let student = db
            .register_user(NewUser {
                is_student: true,
                ..new_user("s@uni.edu")
            })
            .unwrap();
        let tutor = db
            .register_user(NewUser {
                is_tutor: true,
                ..new_user("t@uni.edu")
            })
            .unwrap();

        let students = db.list_students().unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].user_id, student.id);
        let tutors = db.list_tutors(None).unwrap();
        assert_eq!(tutors.len(), 1);
        assert_eq!(tutors[0].user_id, tutor.id);
        assert_eq!(tutors[0].rating, 0.0);
    }

    #[test]
    fn filters_and_ordering() {
        let db = Database::in_memory();
        db.register_user(NewUser { is_student: true, ..new_user("zed@uni.edu") }).unwrap();
        db.register_user(NewUser { is_tutor: true, ..new_user("amy@uni.edu") }).unwrap();
        db.register_user(NewUser { is_student: true, ..new_user("bob@other.org") }).unwrap();

        let students = db
            .list_users(&UserFilter { is_student: Some(true), order_by_email: true, ..Default::default() })
            .unwrap();
        let emails: Vec<_> = students.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["bob@other.org", "zed@uni.edu"]);

        let uni = db
            .list_users(&UserFilter { search: Some("UNI.EDU".into()), ..Default::default() })
            .unwrap();
        assert_eq!(uni.len(), 2);
    }

    #[test]
    fn flag_patch_keeps_rows_in_step() {
        let db = Database::in_memory();
        let user = db.register_user(NewUser { is_student: true, ..new_user("x@uni.edu") }).unwrap();
        db.update_user(user.id, UserPatch { is_student: Some(false), ..Default::default() })
            .unwrap();
        assert!(db.list_students().unwrap().is_empty());
        db.update_user(user.id, UserPatch { is_tutor: Some(true), ..Default::default() })
            .unwrap();
        assert_eq!(db.list_tutors(None).unwrap().len(), 1);
    }

    #[test]
    fn tutor_flag_on_a_student_drops_the_student_row() {
        let db = Database::in_memory();
        let user = db.register_user(NewUser { is_student: true, ..new_user("s2t@uni.edu") }).unwrap();
        assert_eq!(db.list_students().unwrap().len(), 1);

        let user = db
            .update_user(user.id, UserPatch { is_tutor: Some(true), ..Default::default() })
            .unwrap();
        assert!(user.is_tutor);
        assert!(!user.is_student);
        assert!(db.list_students().unwrap().is_empty());
        assert_eq!(db.list_tutors(None).unwrap().len(), 1);

        let stored = db.get_user(user.id).unwrap();
        assert!(!stored.is_student);

        let err = db
            .update_user(user.id, UserPatch { is_student: Some(true), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, TutorHubError::Validation(_)));
        assert!(db.list_students().unwrap().is_empty());
    }

    #[test]
    fn registering_as_both_roles_makes_a_tutor_only() {
        let db = Database::in_memory();
        let user = db
            .register_user(NewUser { is_student: true, is_tutor: true, ..new_user("both@uni.edu") })
            .unwrap();
        assert!(user.is_tutor);
        assert!(!user.is_student);
        assert!(db.list_students().unwrap().is_empty());
        assert_eq!(db.list_tutors(None).unwrap().len(), 1);
    }

    #[test]
    fn deleting_user_cascades() {
        let db = Database::in_memory();
        let alice = db.register_user(NewUser { is_student: true, ..new_user("alice@uni.edu") }).unwrap();
        let bob = db.register_user(new_user("bob@uni.edu")).unwrap();

        let q = db.create_question(alice.id, "Big-O?", "What is it").unwrap();
        let bob_answer = db.create_answer(bob.id, q.id, "Asymptotics").unwrap();
        db.create_comment(bob.id, bob_answer.id, "see CLRS").unwrap();
        db.cast_vote(bob.id, bob_answer.id, VoteType::Upvote).unwrap();

        let bob_q = db.create_question(bob.id, "Heaps", "min or max").unwrap();
        let alice_answer = db.create_answer(alice.id, bob_q.id, "both").unwrap();
        db.cast_vote(bob.id, alice_answer.id, VoteType::Downvote).unwrap();

        db.delete_user(alice.id).unwrap();

        assert!(db.get_user(alice.id).is_err());
        assert!(db.list_students().unwrap().is_empty());
        assert_eq!(db.list_questions().unwrap().len(), 1);
        assert!(db.list_answers(None).unwrap().is_empty());
        assert!(db.list_comments(None).unwrap().is_empty());
        assert!(db.list_votes(None).unwrap().is_empty());
        assert!(db.get_user(bob.id).is_ok());
    }

    #[test]
    fn failed_cascade_leaves_everything_in_place() {
        let db = Database::new(Arc::new(BatchFails(MemoryBackend::new())));
        let alice = db.create_user(new_user("alice@uni.edu")).unwrap();
        let bob = db.create_user(new_user("bob@uni.edu")).unwrap();
        let q = db.create_question(alice.id, "Tries", "prefix trees?").unwrap();
        let answer = db.create_answer(bob.id, q.id, "yes").unwrap();
        db.create_comment(alice.id, answer.id, "thanks").unwrap();

        let err = db.delete_user(alice.id).unwrap_err();
        assert!(matches!(err, TutorHubError::Database(_)));

        assert!(db.get_user(alice.id).is_ok());
        assert_eq!(db.list_questions().unwrap().len(), 1);
        assert_eq!(db.list_answers(None).unwrap().len(), 1);
        assert_eq!(db.list_comments(None).unwrap().len(), 1);
    }

    #[test]
    fn failed_promotion_and_reset_confirm_change_nothing() {
        let db = Database::new(Arc::new(BatchFails(MemoryBackend::new())));
        let user = db.create_user(new_user("carol@uni.edu")).unwrap();

        assert!(db.create_tutor(user.id, TutorProfile::default(), Some("c.png".into())).is_err());
        let user = db.get_user(user.id).unwrap();
        assert!(!user.is_tutor);
        assert!(user.profile_picture.is_none());
        assert!(db.list_tutors(None).unwrap().is_empty());

        let expires = Utc::now() + chrono::Duration::minutes(10);
        db.create_password_reset("carol@uni.edu", "tok", expires).unwrap();
        assert!(db.confirm_password_reset("tok", "new-hash".into(), Utc::now()).is_err());
        assert_eq!(db.get_user(user.id).unwrap().password_hash, "hash");
        assert!(db.find_password_reset("tok").unwrap().is_some());
    }
}
