//! GitHub OAuth sign-in and sign-out.

use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::error::ApiError;
use crate::models::event::EventLabel;
use crate::services::{authorizer, event_service, user_service};
use crate::session;
use crate::state::AppState;

fn oauth_state() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub async fn github_login(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let mut session = match session::current(&state, &headers).await {
        Some(s) => s,
        None => state.sessions.create().await,
    };
    let nonce = oauth_state();
    session.oauth_state = Some(nonce.clone());
    state.sessions.update(&session).await;

    let url = state
        .github
        .authorize_url(&state.config.github.callback_url, &nonce);
    let cookie = session::set_cookie(&state.config, &session, state.sessions.ttl());
    ([(SET_COOKIE, cookie)], Redirect::to(&url)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

pub async fn github_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiError> {
    let session = session::current(&state, &headers)
        .await
        .ok_or(ApiError::Unauthorized)?;
    let (Some(code), Some(returned_state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return Err(ApiError::Unauthorized);
    };
    if session.oauth_state.as_deref() != Some(returned_state) {
        tracing::warn!("OAuth state mismatch");
        return Err(ApiError::Unauthorized);
    }

    let token = state
        .github
        .exchange_code(code, returned_state)
        .await
        .map_err(|e| {
            tracing::warn!("OAuth code exchange failed: {e}");
            ApiError::Unauthorized
        })?;
    let github_user = state.github.get_user(&token).await.map_err(|e| {
        tracing::warn!("GitHub user lookup failed: {e}");
        ApiError::Unauthorized
    })?;
    let approved = authorizer::is_approved_member(
        &state.github,
        &token,
        &state.config.github.approved_organizations,
    )
    .await
    .map_err(|e| {
        tracing::warn!("Organization lookup failed: {e}");
        ApiError::Unauthorized
    })?;
    if !approved {
        tracing::info!(login = %github_user.login, "Sign-in refused: not in an approved organization");
        return Err(ApiError::Unauthorized);
    }

    let mut conn = state.conn().await?;
    let user =
        user_service::find_or_create(&mut conn, &github_user.login, github_user.email.clone())
            .await?
            .ok_or_else(|| {
                tracing::info!(login = %github_user.login, "Sign-in refused: account deleted");
                ApiError::Unauthorized
            })?;
    let user = user_service::record_sign_in(&mut conn, user.id, &token, github_user.id).await?;

    let mut session = state
        .sessions
        .rotate(&session.id)
        .await
        .ok_or(ApiError::Unauthorized)?;
    session.user_id = Some(user.id);
    session.oauth_state = None;
    state.sessions.update(&session).await;

    event_service::audit(
        &mut conn,
        EventLabel::Authentication,
        Some(("User", user.id)),
        serde_json::json!({ "action": "login" }),
    )
    .await;
    tracing::info!(user_id = user.id, username = %user.username, "User signed in");

    let cookie = session::set_cookie(&state.config, &session, state.sessions.ttl());
    Ok(([(SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = session::current(&state, &headers).await {
        if let Some(user_id) = session.user_id {
            if let Ok(mut conn) = state.conn().await {
                event_service::audit(
                    &mut conn,
                    EventLabel::Authentication,
                    Some(("User", user_id)),
                    serde_json::json!({ "action": "logout" }),
                )
                .await;
            }
        }
        state.sessions.destroy(&session.id).await;
    }
    (
        [(SET_COOKIE, session::clear_cookie(&state.config))],
        Redirect::to("/"),
    )
        .into_response()
}
