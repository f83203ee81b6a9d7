//! The signed-in user and their organizations.

use axum::extract::{Path, State};
use axum::response::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::organization::Organization;
use crate::models::site::Site;
use crate::models::user::User;
use crate::services::{organization_service, site_service};
use crate::session::AuthUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    #[serde(flatten)]
    pub user: User,
    pub sites: Vec<Site>,
    /// Token the frontend echoes in `x-csrf-token` on mutating requests.
    pub csrf_token: String,
}

pub async fn me(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Me>, ApiError> {
    let mut conn = state.conn().await?;
    let sites = site_service::list_for_user(&mut conn, auth.user.id).await?;
    Ok(Json(Me {
        user: auth.user,
        sites,
        csrf_token: auth.session.csrf_token,
    }))
}

pub async fn list_organizations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Organization>>, ApiError> {
    let mut conn = state.conn().await?;
    Ok(Json(
        organization_service::list_for_user(&mut conn, auth.user.id).await?,
    ))
}

pub async fn get_organization(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(organization_id): Path<i64>,
) -> Result<Json<Organization>, ApiError> {
    let mut conn = state.conn().await?;
    organization_service::get_for_user(&mut conn, organization_id, auth.user.id)
        .await?
        .map(Json)
        .ok_or_else(ApiError::not_found)
}
