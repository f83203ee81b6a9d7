//! HTTP routes: the `/v0` API, the GitHub webhook, OAuth, and the frontend.

pub mod auth;
pub mod builds;
pub mod sites;
pub mod users;
pub mod webhook;

use std::path::Path;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn api_router() -> Router<AppState> {
    Router::new()
        // Current user
        .route("/me", get(users::me))
        // Sites
        .route("/site", get(sites::list_sites).post(sites::create_site))
        .route("/site/user", post(sites::add_user))
        .route(
            "/site/{id}",
            get(sites::get_site)
                .put(sites::update_site)
                .delete(sites::delete_site),
        )
        .route("/site/{site_id}/user/{user_id}", delete(sites::remove_user))
        .route("/site/{site_id}/user-action", get(sites::list_user_actions))
        .route("/site/{site_id}/published-branch", get(sites::published_branches))
        .route(
            "/site/{site_id}/published-branch/{branch}/file",
            get(sites::published_files),
        )
        // Builds
        .route("/site/{site_id}/build", get(builds::list_site_builds))
        .route("/build", post(builds::rebuild))
        .route("/build/{id}/status/{token}", post(builds::status_callback))
        .route("/build/{build_id}/log/{token}", post(builds::log_callback))
        .route("/build/{build_id}/log", get(builds::get_logs))
        // Organizations
        .route("/organization", get(users::list_organizations))
        .route("/organization/{id}", get(users::get_organization))
}

async fn robots(State(state): State<AppState>) -> impl IntoResponse {
    let body = if state.config.is_production() {
        "User-agent: *\nDisallow:\n"
    } else {
        "User-agent: *\nDisallow: /\n"
    };
    ([(CONTENT_TYPE, "text/plain")], body)
}

/// Build the application router.
pub fn app_router(state: AppState) -> Router {
    let public = Path::new(&state.config.public_dir);
    let index = public.join("index.html");

    Router::new()
        .nest("/v0", api_router())
        .route("/webhook/github", post(webhook::github_webhook))
        .route("/auth/github", get(auth::github_login))
        .route("/auth/github/callback", get(auth::github_callback))
        .route("/logout", get(auth::logout))
        .route("/robots.txt", get(robots))
        .route_service("/", ServeFile::new(&index))
        .route_service("/sites", ServeFile::new(&index))
        .route_service("/sites/{*rest}", ServeFile::new(&index))
        .fallback_service(ServeDir::new(public).fallback(ServeFile::new(&index)))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("max-age=0"),
        ))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::header::COOKIE;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::error::NOT_LOGGED_IN;
    use crate::models::site::fixtures::site;
    use crate::services::github_service::sign_payload;
    use crate::services::intake::fakes::{FakeNotifier, FakeStore};
    use crate::state::fixtures;

    const SHA: &str = "a172b66c31e19d456a448041a5b3c2a70c32d8b7";

    fn setup() -> (Arc<FakeStore>, AppState) {
        let store = Arc::new(FakeStore::with_site(site()));
        let state = fixtures::state(store.clone(), Arc::new(FakeNotifier::default()));
        (store, state)
    }

    fn push_body(commits: usize) -> Vec<u8> {
        let commits: Vec<_> = (0..commits).map(|_| serde_json::json!({ "id": SHA })).collect();
        serde_json::to_vec(&serde_json::json!({
            "ref": "refs/heads/main",
            "after": SHA,
            "commits": commits,
            "repository": { "name": "federalist-docs", "owner": { "login": "18F" } },
            "sender": { "login": "octocat" }
        }))
        .unwrap()
    }

    fn webhook(event: &str, body: Vec<u8>, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/github")
            .header("x-github-event", event)
            .header("x-hub-signature-256", signature)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn push_creates_a_build_and_returns_it() {
        let (store, state) = setup();
        let body = push_body(1);
        let sig = sign_payload("shhh", &body);

        let resp = app_router(state).oneshot(webhook("push", body, &sig)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["branch"], "main");
        assert_eq!(json["commitSha"], SHA);
        assert_eq!(json["site"]["owner"], "18f");
        assert!(json.get("token").is_none());
        assert_eq!(store.build_count(), 1);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_side_effects() {
        let (store, state) = setup();
        let body = push_body(1);
        let sig = sign_payload("not-the-secret", &body);

        let resp = app_router(state).oneshot(webhook("push", body, &sig)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.build_count(), 0);
        assert!(store.users.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_without_commits_is_acknowledged() {
        let (store, state) = setup();
        let body = push_body(0);
        let sig = sign_payload("shhh", &body);

        let resp = app_router(state).oneshot(webhook("push", body, &sig)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, serde_json::json!({}));
        assert_eq!(store.build_count(), 0);
    }

    #[tokio::test]
    async fn ping_needs_a_valid_signature() {
        let (_, state) = setup();
        let body = br#"{"zen":"Keep it logically awesome."}"#.to_vec();
        let sig = sign_payload("shhh", &body);
        let app = app_router(state);

        let resp = app.clone().oneshot(webhook("ping", body.clone(), &sig)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(webhook("ping", body, "sha256=00")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn api_requires_a_session() {
        let (_, state) = setup();
        let resp = app_router(state)
            .oneshot(Request::builder().uri("/v0/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(resp).await["message"], NOT_LOGGED_IN);
    }

    #[tokio::test]
    async fn mutating_requests_need_the_csrf_token() {
        let (_, state) = setup();
        let mut session = state.sessions.create().await;
        session.user_id = Some(1);
        state.sessions.update(&session).await;

        let resp = app_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/site")
                    .header(COOKIE, format!("federalist.sid={}", session.id))
                    .header("x-csrf-token", "wrong")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"owner":"18f","repository":"r"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(resp).await["message"], "Invalid CSRF token");
    }

    #[tokio::test]
    async fn log_callback_requires_output_and_source() {
        let (_, state) = setup();
        let resp = app_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v0/build/1/log/token")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"source":"ALL"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn robots_block_everything_outside_production() {
        let (_, state) = setup();
        let resp = app_router(state)
            .oneshot(Request::builder().uri("/robots.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[CACHE_CONTROL], "max-age=0");
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"User-agent: *\nDisallow: /\n");
    }

    #[tokio::test]
    async fn logout_clears_the_cookie() {
        let (_, state) = setup();
        let session = state.sessions.create().await;
        let sessions = state.sessions.clone();

        let resp = app_router(state)
            .oneshot(
                Request::builder()
                    .uri("/logout")
                    .header(COOKIE, format!("federalist.sid={}", session.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.status().is_redirection());
        let cookie = resp.headers()[axum::http::header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.contains("Max-Age=0"));
        assert!(sessions.get(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn login_redirects_to_github_with_state() {
        let (_, state) = setup();
        let resp = app_router(state)
            .oneshot(Request::builder().uri("/auth/github").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_redirection());
        let location = resp.headers()[axum::http::header::LOCATION].to_str().unwrap();
        assert!(location.contains("/login/oauth/authorize"));
        assert!(location.contains("state="));
        assert!(resp.headers().contains_key(axum::http::header::SET_COOKIE));
    }
}
