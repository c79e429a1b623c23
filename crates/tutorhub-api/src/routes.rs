use crate::handlers::{accounts, forum, health, students, tutors, users};
use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use http::HeaderValue;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

fn account_routes() -> Router<AppState> {
    Router::new()
        // Users
        .route("/users/", get(users::list_users).post(users::register))
        .route(
            "/users/{id}/",
            get(users::get_user)
                .put(users::update_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        // Students
        .route(
            "/students/",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/students/{id}/",
            get(students::get_student)
                .put(students::update_student)
                .patch(students::update_student)
                .delete(students::delete_student),
        )
        // Tutors
        .route("/tutors/", get(tutors::list_tutors).post(tutors::create_tutor))
        .route(
            "/tutors/{id}/",
            get(tutors::get_tutor)
                .put(tutors::update_tutor)
                .patch(tutors::update_tutor)
                .delete(tutors::delete_tutor),
        )
        .route("/tutors/{id}/rate/", post(tutors::rate_tutor))
        // Tokens and password reset
        .route("/login/", post(accounts::login))
        .route("/login/refresh/", post(accounts::refresh))
        .route("/password-reset/", post(accounts::request_password_reset))
        .route(
            "/password-reset/confirm/",
            post(accounts::confirm_password_reset),
        )
}

fn forum_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/questions/",
            get(forum::list_questions).post(forum::create_question),
        )
        .route("/answers/", get(forum::list_answers).post(forum::create_answer))
        .route("/answers/{id}/votes/", get(forum::vote_tally))
        .route(
            "/comments/",
            get(forum::list_comments).post(forum::create_comment),
        )
        .route("/votes/", get(forum::list_votes).post(forum::cast_vote))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.security.allowed_origins);

    Router::new()
        .route("/health", get(health::health))
        .nest(
            "/api",
            account_routes().nest("/forum", forum_routes()),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutboxMailer;
    use axum::body::Body;
    use http::{header, Method, Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;
    use tutorhub_core::Settings;
    use tutorhub_store::Database;

    fn router(origins: &[&str]) -> Router {
        let mut settings = Settings::default();
        settings.security.allowed_origins = origins.iter().map(|o| o.to_string()).collect();
        let state = AppState::with_parts(
            settings,
            Arc::new(Database::in_memory()),
            Arc::new(OutboxMailer::new()),
        );
        create_router(state)
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/users/")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn cors_allows_only_listed_origins() {
        let app = router(&["https://app.tutorhub.test"]);

        let allowed = app
            .clone()
            .oneshot(preflight("https://app.tutorhub.test"))
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://app.tutorhub.test"))
        );

        let denied = app.oneshot(preflight("https://evil.test")).await.unwrap();
        assert!(denied
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn empty_origin_list_allows_any() {
        let resp = router(&[])
            .oneshot(preflight("https://anywhere.test"))
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("*"))
        );
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let resp = router(&[])
            .oneshot(
                Request::builder()
                    .uri("/api/nope/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
