//! In-memory sessions behind the `federalist.sid` cookie.
//!
//! A session starts anonymous (it may only carry an OAuth `state`), becomes
//! authenticated once the GitHub callback succeeds, and expires after the
//! configured idle time. Every read slides the expiry forward.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::user::User;
use crate::services::{authorizer, user_service};
use crate::state::AppState;

pub const CSRF_HEADER: &str = "x-csrf-token";

type HmacSha256 = Hmac<Sha256>;

const VACUUM_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub csrf_token: String,
    pub user_id: Option<i64>,
    /// OAuth `state` handed to GitHub, checked on the callback.
    pub oauth_state: Option<String>,
    pub expires_at: DateTime<Utc>,
}

fn random_id() -> String {
    use base64::Engine;
    let bytes: [u8; 24] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::minutes(ttl_minutes),
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub async fn create(&self) -> Session {
        let session = Session {
            id: random_id(),
            csrf_token: random_id(),
            user_id: None,
            oauth_state: None,
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Live session by id, with its expiry pushed out.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        match sessions.get_mut(id) {
            Some(session) if session.expires_at > now => {
                session.expires_at = now + self.ttl;
                Some(session.clone())
            }
            Some(_) => {
                sessions.remove(id);
                None
            }
            None => None,
        }
    }

    pub async fn update(&self, session: &Session) {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get_mut(&session.id) {
            *existing = session.clone();
        }
    }

    pub async fn destroy(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    /// Move a session to a fresh id and CSRF token, dropping the old id.
    pub async fn rotate(&self, id: &str) -> Option<Session> {
        let mut sessions = self.sessions.write().await;
        let mut session = sessions.remove(id)?;
        session.id = random_id();
        session.csrf_token = random_id();
        session.expires_at = Utc::now() + self.ttl;
        sessions.insert(session.id.clone(), session.clone());
        Some(session)
    }

    /// Drop expired sessions. Returns how many were removed.
    pub async fn vacuum(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

pub fn spawn_vacuum_task(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(VACUUM_INTERVAL);
        loop {
            interval.tick().await;
            let removed = store.vacuum().await;
            if removed > 0 {
                tracing::debug!(removed, "Expired sessions vacuumed");
            }
        }
    })
}

/// Session id from the request's cookies.
pub fn session_id(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

pub fn set_cookie(config: &AppConfig, session: &Session, ttl: chrono::Duration) -> String {
    let secure = if config.is_production() { "; Secure" } else { "" };
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
        config.session.cookie_name,
        session.id,
        ttl.num_seconds()
    )
}

pub fn clear_cookie(config: &AppConfig) -> String {
    let secure = if config.is_production() { "; Secure" } else { "" };
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{secure}",
        config.session.cookie_name
    )
}

/// The request's live session, if it has one.
pub async fn current(state: &AppState, headers: &HeaderMap) -> Option<Session> {
    let id = session_id(headers, &state.config.session.cookie_name)?;
    state.sessions.get(&id).await
}

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// The signed-in user behind a request.
///
/// Rejects anonymous sessions, mutating requests without the session's CSRF
/// token, and users whose organization membership no longer holds once the
/// revalidation window has passed.
pub struct AuthUser {
    pub user: User,
    pub session: Session,
}

/// Compare tokens in constant time: both are keyed into an HMAC over the
/// same message and the tags are checked with `verify_slice`.
fn csrf_matches(expected: &str, provided: &str) -> bool {
    let tag = |token: &str| {
        HmacSha256::new_from_slice(token.as_bytes()).map(|mut mac| {
            mac.update(CSRF_HEADER.as_bytes());
            mac
        })
    };
    let (Ok(expected), Ok(provided)) = (tag(expected), tag(provided)) else {
        return false;
    };
    provided
        .verify_slice(&expected.finalize().into_bytes())
        .is_ok()
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = current(state, &parts.headers)
            .await
            .ok_or(ApiError::Unauthenticated)?;
        let user_id = session.user_id.ok_or(ApiError::Unauthenticated)?;

        if is_mutating(&parts.method) {
            let token = parts
                .headers
                .get(CSRF_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !csrf_matches(&session.csrf_token, token) {
                tracing::debug!(user_id, "CSRF token mismatch");
                return Err(ApiError::InvalidCsrf);
            }
        }

        let mut conn = state.conn().await?;
        let Some(user) = user_service::get_user(&mut conn, user_id).await? else {
            state.sessions.destroy(&session.id).await;
            return Err(ApiError::Unauthenticated);
        };

        let threshold = state.config.session.auth_revalidation_minutes;
        if user.is_past_auth_threshold(threshold, Utc::now()) {
            let approved = match user.github_access_token.as_deref() {
                Some(token) => authorizer::is_approved_member(
                    &state.github,
                    token,
                    &state.config.github.approved_organizations,
                )
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(user_id, "Membership revalidation failed: {e}");
                    false
                }),
                None => false,
            };
            if !approved {
                tracing::info!(user_id, username = %user.username, "Session revoked on revalidation");
                state.sessions.destroy(&session.id).await;
                return Err(ApiError::Unauthenticated);
            }
            user_service::touch_sign_in(&mut conn, user.id).await?;
        }

        Ok(AuthUser { user, session })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn sessions_expire_and_vacuum() {
        let store = SessionStore::new(0);
        let s = store.create().await;
        assert!(store.get(&s.id).await.is_none());

        let store = SessionStore::new(-1);
        store.create().await;
        store.create().await;
        assert_eq!(store.vacuum().await, 2);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn reads_slide_the_expiry() {
        let store = SessionStore::new(30);
        let s = store.create().await;
        let read = store.get(&s.id).await.unwrap();
        assert!(read.expires_at >= s.expires_at);
    }

    #[tokio::test]
    async fn rotation_moves_the_session() {
        let store = SessionStore::new(30);
        let mut s = store.create().await;
        s.user_id = Some(4);
        store.update(&s).await;

        let rotated = store.rotate(&s.id).await.unwrap();
        assert_ne!(rotated.id, s.id);
        assert_ne!(rotated.csrf_token, s.csrf_token);
        assert_eq!(rotated.user_id, Some(4));
        assert!(store.get(&s.id).await.is_none());
        assert!(store.get(&rotated.id).await.is_some());
    }

    #[tokio::test]
    async fn destroy_removes() {
        let store = SessionStore::new(30);
        let s = store.create().await;
        store.destroy(&s.id).await;
        assert!(store.get(&s.id).await.is_none());
    }

    #[test]
    fn csrf_tokens_must_match_exactly() {
        let token = random_id();
        assert!(csrf_matches(&token, &token.clone()));
        assert!(!csrf_matches(&token, ""));
        assert!(!csrf_matches(&token, &token[1..]));
        assert!(!csrf_matches(&token, &format!("{token}0")));
        assert!(!csrf_matches("aBcDeF", "abcdef"));
        assert!(!csrf_matches(&token, &random_id()));
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; federalist.sid=abc123; other=1"),
        );
        assert_eq!(session_id(&headers, "federalist.sid").as_deref(), Some("abc123"));
        assert_eq!(session_id(&headers, "missing"), None);
    }

    #[test]
    fn cookies_are_secure_only_in_production() {
        let mut config = crate::config::test_config();
        let session = Session {
            id: "abc".to_string(),
            csrf_token: "csrf".to_string(),
            user_id: None,
            oauth_state: None,
            expires_at: Utc::now(),
        };
        let cookie = set_cookie(&config, &session, chrono::Duration::minutes(1));
        assert_eq!(
            cookie,
            "federalist.sid=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );

        config.app_env = "production".to_string();
        assert!(set_cookie(&config, &session, chrono::Duration::minutes(1)).ends_with("; Secure"));
        assert!(clear_cookie(&config).contains("Max-Age=0"));
    }
}
