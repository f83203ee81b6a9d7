//! Who may act on a site.

use diesel_async::AsyncPgConnection;

use crate::error::ApiError;
use crate::models::site::Site;
use crate::models::user::User;
use crate::services::github_service::{GitHubClient, GitHubError, Repository};
use crate::services::site_service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoPermission {
    Admin,
    Push,
}

impl RepoPermission {
    pub fn allows(&self, repo: &Repository) -> bool {
        match self {
            RepoPermission::Admin => repo.can_admin(),
            RepoPermission::Push => repo.can_push(),
        }
    }
}

/// Load a live site the user belongs to. Unknown sites are 404, sites the
/// user is not a member of are 403.
pub async fn member_site(
    conn: &mut AsyncPgConnection,
    user: &User,
    site_id: i64,
) -> Result<Site, ApiError> {
    let site = site_service::get_site(conn, site_id)
        .await?
        .ok_or_else(ApiError::not_found)?;
    if !site_service::is_member(conn, site.id, user.id).await? {
        return Err(ApiError::Forbidden);
    }
    Ok(site)
}

/// Require the given permission on the site's repository, checked with the
/// user's own token.
pub async fn require_repo_permission(
    github: &GitHubClient,
    user: &User,
    owner: &str,
    repository: &str,
    permission: RepoPermission,
) -> Result<Repository, ApiError> {
    let token = user
        .github_access_token
        .as_deref()
        .ok_or(ApiError::Forbidden)?;
    match github.get_repository(token, owner, repository).await? {
        Some(repo) if permission.allows(&repo) => Ok(repo),
        _ => Err(ApiError::Forbidden),
    }
}

/// Whether the token's owner belongs to one of the approved organizations.
pub async fn is_approved_member(
    github: &GitHubClient,
    token: &str,
    approved: &[i64],
) -> Result<bool, GitHubError> {
    let orgs = github.get_organizations(token).await?;
    Ok(orgs.iter().any(|org| approved.contains(&org.id)))
}
