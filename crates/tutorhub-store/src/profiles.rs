use tracing::info;
use tutorhub_core::{
    validation::{validate_max_len, MAX_NAME_LEN},
    NewUser, Rating, Result, Student, StudentId, Tutor, TutorHubError, TutorId, TutorPatch,
    TutorProfile, User, UserId, UserPatch,
};

use crate::users::blank_tutor;
use crate::{Database, WriteBatch};

fn validate_profile(profile: &TutorProfile) -> Result<()> {
    validate_max_len("first_name", &profile.first_name, MAX_NAME_LEN)?;
    validate_max_len("last_name", &profile.last_name, MAX_NAME_LEN)?;
    if profile.year < 0 {
        return Err(TutorHubError::Validation("year must not be negative".into()));
    }
    Ok(())
}

impl Database {
    // -------- Students --------

    /// Attaches a student profile to an existing user and sets `is_student`.
    pub fn create_student(&self, user_id: UserId) -> Result<Student> {
        let _guard = self.lock();
        let mut user: User = self.require(user_id)?;
        if self.first_where::<Student>(|s| s.user_id == user_id)?.is_some() {
            return Err(TutorHubError::Conflict(format!(
                "user {} already has a student profile",
                user_id
            )));
        }
        if user.is_tutor {
            return Err(TutorHubError::Conflict(format!(
                "user {} is a tutor and cannot have a student profile",
                user_id
            )));
        }
        let mut batch = WriteBatch::new();
        let student = self.stage_insert(&mut batch, Student { id: 0, user_id })?;
        user.is_student = true;
        self.stage_save(&mut batch, &user)?;
        self.commit(batch)?;
        Ok(student)
    }

    pub fn get_student(&self, id: StudentId) -> Result<Student> {
        self.require(id)
    }

    pub fn list_students(&self) -> Result<Vec<Student>> {
        self.all()
    }

    /// Student fields are projections of the owning user, so updates patch
    /// the user. Neither clearing `is_student` nor setting `is_tutor` is
    /// accepted here: delete the profile or create a tutor profile instead.
    pub fn update_student(&self, id: StudentId, patch: UserPatch) -> Result<Student> {
        let _guard = self.lock();
        let student: Student = self.require(id)?;
        if patch.is_student == Some(false) {
            return Err(TutorHubError::InvalidOperation(
                "is_student cannot be cleared on a student profile; delete it instead".into(),
            ));
        }
        if patch.is_tutor == Some(true) {
            return Err(TutorHubError::InvalidOperation(
                "a student profile cannot be made a tutor; create a tutor profile instead".into(),
            ));
        }
        self.update_user_locked(student.user_id, patch)?;
        Ok(student)
    }

    pub fn delete_student(&self, id: StudentId) -> Result<()> {
        let _guard = self.lock();
        let student: Student = self.require(id)?;
        let mut batch = WriteBatch::new();
        self.stage_remove::<Student>(&mut batch, id);
        if let Some(mut user) = self.load::<User>(student.user_id)? {
            user.is_student = false;
            self.stage_save(&mut batch, &user)?;
        }
        self.commit(batch)
    }

    // -------- Tutors --------

    /// Creates a tutor profile for an existing user. The user becomes a
    /// tutor and stops being a student; `profile_picture`, when given,
    /// replaces the user's picture in the same write.
    pub fn create_tutor(
        &self,
        user_id: UserId,
        profile: TutorProfile,
        profile_picture: Option<String>,
    ) -> Result<Tutor> {
        let _guard = self.lock();
        validate_profile(&profile)?;
        let mut user: User = self.require(user_id)?;
        if self.first_where::<Tutor>(|t| t.user_id == user_id)?.is_some() {
            return Err(TutorHubError::Conflict(format!(
                "user {} already has a tutor profile",
                user_id
            )));
        }
        if profile_picture.is_some() {
            user.profile_picture = profile_picture;
        }
        let mut batch = WriteBatch::new();
        self.stage_student_row(&mut batch, user_id, false)?;
        let tutor = self.stage_promotion(&mut batch, user, profile)?;
        self.commit(batch)?;
        info!(tutor_id = tutor.id, user_id = tutor.user_id, "created tutor profile");
        Ok(tutor)
    }

    /// Creates the account and the tutor profile in one step.
    pub fn create_tutor_with_user(&self, new: NewUser, profile: TutorProfile) -> Result<Tutor> {
        let _guard = self.lock();
        validate_profile(&profile)?;
        let user = self.prepare_user(NewUser {
            is_tutor: true,
            is_student: false,
            ..new
        })?;
        let mut batch = WriteBatch::new();
        let user = self.stage_insert(&mut batch, user)?;
        let tutor = self.stage_promotion(&mut batch, user, profile)?;
        self.commit(batch)?;
        info!(tutor_id = tutor.id, user_id = tutor.user_id, "created tutor profile");
        Ok(tutor)
    }

    fn stage_promotion(
        &self,
        batch: &mut WriteBatch,
        mut user: User,
        profile: TutorProfile,
    ) -> Result<Tutor> {
        let tutor = self.stage_insert(batch, blank_tutor(user.id, profile))?;
        user.is_tutor = true;
        user.is_student = false;
        self.stage_save(batch, &user)?;
        Ok(tutor)
    }

    pub fn get_tutor(&self, id: TutorId) -> Result<Tutor> {
        self.require(id)
    }

    /// Lists tutors, optionally filtered by a case-insensitive match on the
    /// user's email or the tutor's first or last name.
    pub fn list_tutors(&self, search: Option<&str>) -> Result<Vec<Tutor>> {
        let tutors = self.all::<Tutor>()?;
        let needle = match search.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.to_lowercase(),
            None => return Ok(tutors),
        };
        let mut matched = Vec::new();
        for tutor in tutors {
            let email = self
                .load::<User>(tutor.user_id)?
                .map(|u| u.email.to_lowercase())
                .unwrap_or_default();
            if email.contains(&needle)
                || tutor.first_name.to_lowercase().contains(&needle)
                || tutor.last_name.to_lowercase().contains(&needle)
            {
                matched.push(tutor);
            }
        }
        Ok(matched)
    }

    pub fn update_tutor(&self, id: TutorId, patch: TutorPatch) -> Result<Tutor> {
        let _guard = self.lock();
        let mut tutor: Tutor = self.require(id)?;
        if let Some(first_name) = patch.first_name {
            tutor.first_name = first_name;
        }
        if let Some(last_name) = patch.last_name {
            tutor.last_name = last_name;
        }
        if let Some(year) = patch.year {
            tutor.year = year;
        }
        if let Some(courses) = patch.courses {
            tutor.courses = courses;
        }
        if let Some(bio) = patch.bio {
            tutor.bio = bio;
        }
        validate_profile(&TutorProfile {
            first_name: tutor.first_name.clone(),
            last_name: tutor.last_name.clone(),
            year: tutor.year,
            courses: tutor.courses,
            bio: String::new(),
        })?;
        let mut batch = WriteBatch::new();
        if let Some(picture) = patch.profile_picture {
            let mut user: User = self.require(tutor.user_id)?;
            user.profile_picture = picture;
            self.stage_save(&mut batch, &user)?;
        }
        self.stage_save(&mut batch, &tutor)?;
        self.commit(batch)?;
        Ok(tutor)
    }

    pub fn delete_tutor(&self, id: TutorId) -> Result<()> {
        let _guard = self.lock();
        let tutor: Tutor = self.require(id)?;
        let mut batch = WriteBatch::new();
        self.stage_remove::<Tutor>(&mut batch, id);
        if let Some(mut user) = self.load::<User>(tutor.user_id)? {
            user.is_tutor = false;
            self.stage_save(&mut batch, &user)?;
        }
        self.commit(batch)
    }

    /// Folds a score into the tutor's running average.
    pub fn rate_tutor(&self, id: TutorId, score: Rating) -> Result<Tutor> {
        let _guard = self.lock();
        let mut tutor: Tutor = self.require(id)?;
        let average = tutor.apply_rating(score);
        self.save(&tutor)?;
        info!(
            tutor_id = id,
            score = score.value(),
            average,
            total = tutor.total_ratings,
            "recorded tutor rating"
        );
        Ok(tutor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tutorhub_core::Course;

    fn user(db: &Database, email: &str, is_student: bool) -> User {
        db.register_user(NewUser {
            email: email.into(),
            password_hash: "hash".into(),
            is_student,
            ..NewUser::default()
        })
        .unwrap()
    }

    fn profile() -> TutorProfile {
        TutorProfile {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            year: 4,
            courses: Course::WebTechnologies,
            bio: "compilers".into(),
        }
    }

    #[test]
    fn tutor_creation_flips_role_flags() {
        let db = Database::in_memory();
        let u = user(&db, "g@uni.edu", true);
        assert_eq!(db.list_students().unwrap().len(), 1);

        let tutor = db.create_tutor(u.id, profile(), None).unwrap();
        let u = db.get_user(u.id).unwrap();
        assert!(u.is_tutor);
        assert!(!u.is_student);
        assert!(db.list_students().unwrap().is_empty());
        assert_eq!(tutor.courses, Course::WebTechnologies);

        let again = db.create_tutor(u.id, profile(), None).unwrap_err();
        assert!(matches!(again, TutorHubError::Conflict(_)));
    }

    #[test]
    fn tutor_with_user_is_atomic_on_bad_profile() {
        let db = Database::in_memory();
        let bad = TutorProfile {
            first_name: "x".repeat(101),
            ..profile()
        };
        let new = NewUser {
            email: "new@uni.edu".into(),
            password_hash: "hash".into(),
            ..NewUser::default()
        };
        assert!(db.create_tutor_with_user(new.clone(), bad).is_err());
        assert!(db.find_user_by_email("new@uni.edu").unwrap().is_none());

        let tutor = db.create_tutor_with_user(new, profile()).unwrap();
        assert!(db.get_user(tutor.user_id).unwrap().is_tutor);
    }

    #[test]
    fn search_matches_email_and_names() {
        let db = Database::in_memory();
        let a = user(&db, "grace@navy.mil", false);
        db.create_tutor(a.id, profile(), None).unwrap();
        let b = user(&db, "alan@bletchley.uk", false);
        db.create_tutor(
            b.id,
            TutorProfile {
                first_name: "Alan".into(),
                last_name: "Turing".into(),
                ..profile()
            },
            None,
        )
        .unwrap();

        assert_eq!(db.list_tutors(Some("NAVY")).unwrap().len(), 1);
        assert_eq!(db.list_tutors(Some("turing")).unwrap().len(), 1);
        assert_eq!(db.list_tutors(Some("  ")).unwrap().len(), 2);
        assert!(db.list_tutors(Some("nobody")).unwrap().is_empty());
    }

    #[test]
    fn concurrent_ratings_are_not_lost() {
        let db = Arc::new(Database::in_memory());
        let u = user(&db, "r@uni.edu", false);
        let tutor = db.create_tutor(u.id, profile(), None).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                thread::spawn(move || {
                    let score = Rating::new(if i % 2 == 0 { 5 } else { 3 }).unwrap();
                    for _ in 0..25 {
                        db.rate_tutor(tutor.id, score).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let rated = db.get_tutor(tutor.id).unwrap();
        assert_eq!(rated.total_ratings, 200);
        assert!((rated.rating - 4.0).abs() < 1e-9);
    }

    #[test]
    fn deleting_profiles_clears_flags() {
        let db = Database::in_memory();
        let s = user(&db, "s@uni.edu", true);
        let student = db.list_students().unwrap().remove(0);
        db.delete_student(student.id).unwrap();
        assert!(!db.get_user(s.id).unwrap().is_student);

        let t = user(&db, "t@uni.edu", false);
        let tutor = db.create_tutor(t.id, profile(), None).unwrap();
        db.delete_tutor(tutor.id).unwrap();
        assert!(!db.get_user(t.id).unwrap().is_tutor);
        assert!(db.get_tutor(tutor.id).is_err());
    }

    #[test]
    fn student_update_patches_user() {
        let db = Database::in_memory();
        let s = user(&db, "old@uni.edu", true);
        let student = db.list_students().unwrap().remove(0);
        db.update_student(
            student.id,
            UserPatch { email: Some("new@uni.edu".into()), ..Default::default() },
        )
        .unwrap();
        assert_eq!(db.get_user(s.id).unwrap().email, "new@uni.edu");
        assert!(db
            .update_student(student.id, UserPatch { is_student: Some(false), ..Default::default() })
            .is_err());
        let err = db
            .update_student(student.id, UserPatch { is_tutor: Some(true), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, TutorHubError::InvalidOperation(_)));
        let s = db.get_user(s.id).unwrap();
        assert!(s.is_student);
        assert!(!s.is_tutor);
        assert_eq!(db.list_students().unwrap().len(), 1);
    }

    #[test]
    fn promotion_sets_picture_in_the_same_write() {
        let db = Database::in_memory();
        let u = user(&db, "pic@uni.edu", true);
        let tutor = db
            .create_tutor(u.id, profile(), Some("https://cdn.test/p.png".into()))
            .unwrap();
        let u = db.get_user(tutor.user_id).unwrap();
        assert_eq!(u.profile_picture.as_deref(), Some("https://cdn.test/p.png"));
        assert!(u.is_tutor);
        assert!(db.list_students().unwrap().is_empty());

        let other = user(&db, "nopic@uni.edu", false);
        db.create_tutor(other.id, profile(), None).unwrap();
        assert!(db.get_user(other.id).unwrap().profile_picture.is_none());
    }

    #[test]
    fn tutors_cannot_take_a_student_profile() {
        let db = Database::in_memory();
        let u = user(&db, "tt@uni.edu", false);
        db.create_tutor(u.id, profile(), None).unwrap();
        let err = db.create_student(u.id).unwrap_err();
        assert!(matches!(err, TutorHubError::Conflict(_)));
        assert!(db.list_students().unwrap().is_empty());
    }
}
