//! GitHub webhook: push events feed the build intake, organization events
//! track membership of the users organization.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::models::event::EventLabel;
use crate::services::intake::{PushOutcome, WebhookError};
use crate::services::{event_service, user_service};
use crate::state::AppState;

use super::builds::BuildWithSite;

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::Internal(ref e) => {
                tracing::error!("Webhook handling failed: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        let message = match self {
            WebhookError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let body = serde_json::json!({ "message": message, "status": status.as_u16() });
        (status, Json(body)).into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let event_type = header(&headers, "x-github-event");
    let signature = header(&headers, "x-hub-signature-256");
    crate::metrics::webhook_received(if event_type.is_empty() { "unknown" } else { event_type });

    match event_type {
        "push" => match state.intake.receive_push(&body, signature).await? {
            PushOutcome::Created(build, site) | PushOutcome::Updated(build, site) => {
                let json = serde_json::to_value(BuildWithSite { build, site })
                    .map_err(anyhow::Error::from)?;
                Ok(Json(json))
            }
            PushOutcome::Ignored => Ok(Json(serde_json::json!({}))),
        },
        "organization" => {
            state.intake.verify(&body, signature)?;
            let event: OrganizationEvent = serde_json::from_slice(&body)
                .map_err(|e| WebhookError::Malformed(e.to_string()))?;
            handle_organization(&state, &event).await?;
            Ok(Json(serde_json::json!({})))
        }
        "ping" => {
            state.intake.verify(&body, signature)?;
            tracing::info!("Received GitHub ping webhook");
            Ok(Json(serde_json::json!({})))
        }
        other => {
            state.intake.verify(&body, signature)?;
            tracing::debug!(event = other, "Ignoring webhook event");
            Ok(Json(serde_json::json!({})))
        }
    }
}

#[derive(Debug, Deserialize)]
struct Login {
    login: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    user: Login,
}

#[derive(Debug, Deserialize)]
struct OrganizationEvent {
    action: String,
    organization: Login,
    #[serde(default)]
    membership: Option<Membership>,
    #[serde(default)]
    invitation: Option<Login>,
}

impl OrganizationEvent {
    fn member(&self) -> Option<&Login> {
        self.membership
            .as_ref()
            .map(|m| &m.user)
            .or(self.invitation.as_ref())
    }
}

async fn handle_organization(
    state: &AppState,
    event: &OrganizationEvent,
) -> Result<(), WebhookError> {
    let users_org = &state.config.users_audit.users_org;
    if !event.organization.login.eq_ignore_ascii_case(users_org) {
        return Ok(());
    }
    let Some(member) = event.member() else {
        return Ok(());
    };

    let mut conn = crate::db::get_conn(&state.pool).await?;
    match event.action.as_str() {
        "member_added" => {
            match user_service::find_or_create(&mut conn, &member.login, member.email.clone())
                .await?
            {
                Some(user) => {
                    tracing::info!(username = %user.username, "User added to users organization")
                }
                None => {
                    tracing::info!(login = %member.login, "Deleted user rejoined users organization")
                }
            }
        }
        "member_removed" | "member_invited" => {}
        _ => return Ok(()),
    }

    event_service::audit(
        &mut conn,
        EventLabel::FederalistUsersMembership,
        None,
        serde_json::json!({ "action": event.action, "login": member.login.to_lowercase() }),
    )
    .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_comes_from_membership_or_invitation() {
        let added: OrganizationEvent = serde_json::from_value(serde_json::json!({
            "action": "member_added",
            "organization": { "login": "federalist-users" },
            "membership": { "user": { "login": "Octocat" } }
        }))
        .unwrap();
        assert_eq!(added.member().unwrap().login, "Octocat");

        let invited: OrganizationEvent = serde_json::from_value(serde_json::json!({
            "action": "member_invited",
            "organization": { "login": "federalist-users" },
            "invitation": { "login": "newbie" }
        }))
        .unwrap();
        assert_eq!(invited.member().unwrap().login, "newbie");
    }

    #[tokio::test]
    async fn errors_are_json() {
        let resp = WebhookError::UnknownSite("18f/nope".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["message"], "Site 18f/nope is not registered");
        assert_eq!(json["status"], 400);
    }
}
