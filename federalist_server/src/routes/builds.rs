//! Build listing, rebuilds, and the callbacks build containers post to.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::build::{is_valid_sha, Build, BuildState};
use crate::models::build_log::BuildLog;
use crate::models::event::EventLabel;
use crate::models::site::Site;
use crate::services::authorizer;
use crate::services::{build_log_service, build_service, event_service, site_service};
use crate::session::AuthUser;
use crate::state::AppState;

pub const BUILD_NOT_FOUND: &str = "The requested build could not be found";
pub const BRANCH_NOT_FOUND: &str = "The requested branch could not be found";
pub const INVALID_SHA: &str = "The requested commit sha is invalid";

/// A build with its site embedded, the shape every build endpoint returns.
#[derive(Debug, Serialize)]
pub struct BuildWithSite {
    #[serde(flatten)]
    pub build: Build,
    pub site: Site,
}

pub async fn list_site_builds(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<i64>,
) -> Result<Json<Vec<BuildWithSite>>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;
    let builds = build_service::list_for_site(&mut conn, site.id).await?;
    Ok(Json(
        builds
            .into_iter()
            .map(|build| BuildWithSite {
                build,
                site: site.clone(),
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildRequest {
    pub site_id: i64,
    #[serde(default)]
    pub build_id: Option<i64>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
}

impl RebuildRequest {
    /// The requested commit, if any. Must be a full 40-character hex sha.
    fn requested_sha(&self) -> Result<Option<String>, ApiError> {
        match self.sha.as_deref().filter(|s| !s.is_empty()) {
            Some(sha) if is_valid_sha(sha) => Ok(Some(sha.to_string())),
            Some(_) => Err(ApiError::bad_request(INVALID_SHA)),
            None => Ok(None),
        }
    }
}

/// Work out which branch and commit a rebuild request refers to: an earlier
/// build, a branch that has been built before, or a branch GitHub confirms.
async fn resolve_rebuild(
    state: &AppState,
    conn: &mut diesel_async::AsyncPgConnection,
    auth: &AuthUser,
    site: &Site,
    req: &RebuildRequest,
) -> Result<(String, Option<String>), ApiError> {
    let requested_sha = req.requested_sha()?;
    if let Some(build_id) = req.build_id {
        let build = build_service::get_build(conn, build_id)
            .await?
            .filter(|b| b.site_id == site.id)
            .ok_or_else(|| ApiError::NotFound(BUILD_NOT_FOUND.to_string()))?;
        return Ok((build.branch, build.commit_sha));
    }

    let branch = req
        .branch
        .as_deref()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::NotFound(BRANCH_NOT_FOUND.to_string()))?;

    if let Some(previous) = build_service::get_latest(conn, site.id, branch).await? {
        return Ok((previous.branch, requested_sha.or(previous.commit_sha)));
    }

    let token = auth
        .user
        .github_access_token
        .as_deref()
        .ok_or(ApiError::Forbidden)?;
    let found = state
        .github
        .get_branch(token, &site.owner, &site.repository, branch)
        .await?
        .ok_or_else(|| ApiError::NotFound(BRANCH_NOT_FOUND.to_string()))?;
    Ok((found.name, Some(found.commit.sha)))
}

pub async fn rebuild(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RebuildRequest>,
) -> Result<Json<BuildWithSite>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, req.site_id).await?;
    let (branch, sha) = resolve_rebuild(&state, &mut conn, &auth, &site, &req).await?;

    let (build, _) = state.intake.submit(&site, auth.user.id, &branch, sha).await?;
    event_service::audit(
        &mut conn,
        EventLabel::BuildRequest,
        Some(("Build", build.id)),
        serde_json::json!({ "userId": auth.user.id, "branch": branch }),
    )
    .await;
    Ok(Json(BuildWithSite { build, site }))
}

fn decode_base64(value: &str) -> Result<String, ApiError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|_| ApiError::bad_request("Invalid base64 payload"))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn status_callback(
    State(state): State<AppState>,
    Path((build_id, token)): Path<(i64, String)>,
    Json(body): Json<StatusCallback>,
) -> Result<Json<Build>, ApiError> {
    let new_state: BuildState = body
        .status
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid build status: {}", body.status)))?;
    let message = body
        .message
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(decode_base64)
        .transpose()?;

    let mut conn = state.conn().await?;
    let build = build_service::get_by_token(&mut conn, build_id, &token)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let updated =
        build_service::update_job_status(&mut conn, &build, new_state, message.as_deref()).await?;

    if let Some(site) = site_service::get_site(&mut conn, updated.site_id).await? {
        state.intake.report_status(&updated, &site).await;
    }
    event_service::audit(
        &mut conn,
        EventLabel::BuildStatus,
        Some(("Build", updated.id)),
        serde_json::json!({ "status": updated.state }),
    )
    .await;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct LogCallback {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

pub async fn log_callback(
    State(state): State<AppState>,
    Path((build_id, token)): Path<(i64, String)>,
    Json(body): Json<LogCallback>,
) -> Result<Json<BuildLog>, ApiError> {
    let (Some(output), Some(source)) = (
        body.output.as_deref().filter(|o| !o.is_empty()),
        body.source.as_deref().filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::bad_request("output and source are required"));
    };
    let output = decode_base64(output)?;

    let mut conn = state.conn().await?;
    let build = build_service::get_by_token(&mut conn, build_id, &token)
        .await?
        .ok_or_else(ApiError::not_found)?;
    let log = build_log_service::append(&mut conn, build.id, source, &output).await?;
    Ok(Json(log))
}

#[derive(Debug, Deserialize)]
pub struct LogPageQuery {
    pub page: Option<i64>,
}

pub async fn get_logs(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(build_id): Path<i64>,
    Query(query): Query<LogPageQuery>,
) -> Result<Json<Vec<BuildLog>>, ApiError> {
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(ApiError::not_found());
    }
    let mut conn = state.conn().await?;
    let build = build_service::get_build(&mut conn, build_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if !site_service::is_member(&mut conn, build.site_id, auth.user.id).await? {
        return Err(ApiError::not_found());
    }
    let logs = build_log_service::page(&mut conn, build.id, page).await?;
    Ok(Json(logs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::fixtures::build;
    use crate::models::site::fixtures::site;

    #[test]
    fn callbacks_decode_base64() {
        assert_eq!(decode_base64("aGVsbG8gd29ybGQ=").unwrap(), "hello world");
        assert!(matches!(
            decode_base64("not base64!"),
            Err(ApiError::BadRequest(_))
        ));
    }

    fn rebuild(sha: Option<&str>) -> RebuildRequest {
        RebuildRequest {
            site_id: 1,
            build_id: None,
            branch: Some("main".to_string()),
            sha: sha.map(str::to_string),
        }
    }

    #[test]
    fn rebuild_sha_must_be_a_full_commit() {
        let sha = "a172b66c31e19d456a448041a5b3c2a70c32d8b7";
        assert_eq!(rebuild(Some(sha)).requested_sha().unwrap().as_deref(), Some(sha));
        assert_eq!(rebuild(None).requested_sha().unwrap(), None);
        assert_eq!(rebuild(Some("")).requested_sha().unwrap(), None);
        let too_long = "a".repeat(41);
        let not_hex = "z".repeat(40);
        for bad in ["not-a-sha-XYZ", "a172b66", too_long.as_str(), not_hex.as_str()] {
            assert!(matches!(
                rebuild(Some(bad)).requested_sha(),
                Err(ApiError::BadRequest(m)) if m == INVALID_SHA
            ));
        }
    }

    #[test]
    fn build_json_embeds_the_site() {
        let json = serde_json::to_value(BuildWithSite {
            build: build(3, 1, 7, "main"),
            site: site(),
        })
        .unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["branch"], "main");
        assert_eq!(json["site"]["repository"], "federalist-docs");
    }
}
