//! Site CRUD, membership, user actions and published output.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::event::EventLabel;
use crate::models::site::{Site, SiteChanges};
use crate::models::user_action::{ActionKind, UserAction};
use crate::services::authorizer::{self, RepoPermission};
use crate::services::object_store::{self, PublishedFilePage};
use crate::services::site_creator::{self, CreateSiteParams};
use crate::services::{
    event_service, proxy_data_sync, site_remover, site_service, user_action_service,
};
use crate::session::AuthUser;
use crate::state::AppState;

pub const SITE_NOT_FOUND: &str = "The site you are trying to add does not exist";
pub const ALREADY_A_MEMBER: &str = "You've already added this site to Federalist";
pub const LAST_USER: &str = "A site must have at least one user.";

pub async fn list_sites(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Site>>, ApiError> {
    let mut conn = state.conn().await?;
    Ok(Json(site_service::list_for_user(&mut conn, auth.user.id).await?))
}

pub async fn get_site(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<i64>,
) -> Result<Json<Site>, ApiError> {
    let mut conn = state.conn().await?;
    Ok(Json(authorizer::member_site(&mut conn, &auth.user, site_id).await?))
}

pub async fn create_site(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(params): Json<CreateSiteParams>,
) -> Result<Json<Site>, ApiError> {
    let site = site_creator::create_site(&state, &auth.user, params).await?;
    Ok(Json(site))
}

pub async fn update_site(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<i64>,
    Json(changes): Json<SiteChanges>,
) -> Result<Json<Site>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;
    site.with_changes(&changes).validate()?;

    let site = site_service::update_site(&mut conn, site.id, &changes).await?;
    let mut branches = vec![site.default_branch.clone()];
    branches.extend(site.demo_branch.clone().filter(|b| !b.is_empty()));
    for branch in &branches {
        state.intake.submit(&site, auth.user.id, branch, None).await?;
    }
    proxy_data_sync::sync_site(&mut conn, state.proxy(), &site).await;

    tracing::info!(site_id = site.id, "Site updated");
    Ok(Json(site))
}

pub async fn delete_site(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<i64>,
) -> Result<Json<Site>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;
    authorizer::require_repo_permission(
        &state.github,
        &auth.user,
        &site.owner,
        &site.repository,
        RepoPermission::Admin,
    )
    .await?;

    site_remover::remove_site_objects(state.objects.as_ref(), &site).await?;
    site_remover::remove_infrastructure(state.cf(), &site, &state.config).await?;
    proxy_data_sync::unsync_site(&mut conn, state.proxy(), &site).await;

    event_service::audit(
        &mut conn,
        EventLabel::SiteDestroy,
        Some(("Site", site.id)),
        serde_json::json!({ "userId": auth.user.id, "site": site.full_name() }),
    )
    .await;
    site_service::soft_delete(&mut conn, site.id).await?;
    Ok(Json(site))
}

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

pub async fn add_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<AddUserRequest>,
) -> Result<Json<Site>, ApiError> {
    let (Some(owner), Some(repository)) = (
        req.owner.as_deref().map(str::trim).filter(|o| !o.is_empty()),
        req.repository.as_deref().map(str::trim).filter(|r| !r.is_empty()),
    ) else {
        return Err(ApiError::bad_request("owner and repository are required"));
    };

    let mut conn = state.conn().await?;
    let site = site_service::find_by_repo(&mut conn, owner, repository)
        .await?
        .ok_or_else(|| ApiError::NotFound(SITE_NOT_FOUND.to_string()))?;
    authorizer::require_repo_permission(
        &state.github,
        &auth.user,
        &site.owner,
        &site.repository,
        RepoPermission::Push,
    )
    .await?;

    if !site_service::add_member(&mut conn, site.id, auth.user.id).await? {
        return Err(ApiError::bad_request(ALREADY_A_MEMBER));
    }
    user_action_service::record(&mut conn, ActionKind::Add, auth.user.id, auth.user.id, site.id)
        .await?;
    event_service::audit(
        &mut conn,
        EventLabel::SiteUser,
        Some(("Site", site.id)),
        serde_json::json!({ "action": "add", "userId": auth.user.id }),
    )
    .await;
    Ok(Json(site))
}

pub async fn remove_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((site_id, user_id)): Path<(i64, i64)>,
) -> Result<Json<Site>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;

    let members = site_service::members(&mut conn, site.id).await?;
    if !members.iter().any(|m| m.id == user_id) {
        return Err(ApiError::not_found());
    }
    if members.len() <= 1 {
        return Err(ApiError::bad_request(LAST_USER));
    }

    site_service::remove_member(&mut conn, site.id, user_id).await?;
    user_action_service::record(&mut conn, ActionKind::Remove, auth.user.id, user_id, site.id)
        .await?;
    event_service::audit(
        &mut conn,
        EventLabel::SiteUser,
        Some(("Site", site.id)),
        serde_json::json!({ "action": "remove", "userId": user_id, "by": auth.user.id }),
    )
    .await;
    Ok(Json(site))
}

pub async fn list_user_actions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<i64>,
) -> Result<Json<Vec<UserAction>>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;
    Ok(Json(user_action_service::list_for_site(&mut conn, site.id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedBranch {
    pub name: String,
    pub view_link: String,
}

pub async fn published_branches(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(site_id): Path<i64>,
) -> Result<Json<Vec<PublishedBranch>>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;
    let branches = object_store::published_branches(state.objects.as_ref(), &site).await?;
    Ok(Json(
        branches
            .into_iter()
            .map(|name| PublishedBranch {
                view_link: site.view_link_for_branch(&name),
                name,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileQuery {
    pub start_at_key: Option<String>,
}

pub async fn published_files(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((site_id, branch)): Path<(i64, String)>,
    Query(query): Query<FileQuery>,
) -> Result<Json<PublishedFilePage>, ApiError> {
    let mut conn = state.conn().await?;
    let site = authorizer::member_site(&mut conn, &auth.user, site_id).await?;
    let page = object_store::published_files(
        state.objects.as_ref(),
        &site,
        &branch,
        query.start_at_key.as_deref().filter(|k| !k.is_empty()),
    )
    .await?;
    Ok(Json(page))
}
