//! Drop users from sites whose repositories they can no longer push to.
//! A site's last member stays so the site keeps a token to build with.

use std::collections::HashSet;

use crate::db::get_conn;
use crate::models::site::Site;
use crate::models::user_action::ActionKind;
use crate::services::github_service::Repository;
use crate::services::{site_service, user_action_service, user_service};
use crate::state::AppState;

/// Sites from `sites` that are missing from, or read-only in, `repos`.
pub fn sites_without_push<'a>(sites: &'a [Site], repos: &[Repository]) -> Vec<&'a Site> {
    let pushable: HashSet<String> = repos
        .iter()
        .filter(|r| r.can_push())
        .map(|r| r.full_name.to_lowercase())
        .collect();
    sites
        .iter()
        .filter(|s| !pushable.contains(&s.full_name().to_lowercase()))
        .collect()
}

pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let mut conn = get_conn(&state.pool).await?;
    let users = user_service::list_with_tokens(&mut conn).await?;

    let mut removed = 0;
    for user in &users {
        let Some(token) = user.github_access_token.as_deref() else {
            continue;
        };
        let repos = match state.github.get_repositories(token).await {
            Ok(repos) => repos,
            Err(e) => {
                tracing::warn!(user_id = user.id, "Could not list repositories: {e}");
                continue;
            }
        };

        let sites = site_service::list_for_user(&mut conn, user.id).await?;
        for site in sites_without_push(&sites, &repos) {
            if site_service::members(&mut conn, site.id).await?.len() <= 1 {
                tracing::warn!(user_id = user.id, site_id = site.id, "Keeping last site member");
                continue;
            }
            site_service::remove_member(&mut conn, site.id, user.id).await?;
            user_action_service::record(&mut conn, ActionKind::Remove, user.id, user.id, site.id)
                .await?;
            tracing::info!(user_id = user.id, site_id = site.id, "User removed from site");
            removed += 1;
        }
    }

    tracing::info!(users = users.len(), removed, "Site users audited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::site::fixtures::site;
    use crate::services::github_service::RepoPermissions;

    fn repo(full_name: &str, push: bool) -> Repository {
        Repository {
            full_name: full_name.to_string(),
            default_branch: None,
            permissions: Some(RepoPermissions {
                admin: false,
                push,
                pull: true,
            }),
        }
    }

    #[test]
    fn read_only_and_missing_repos_are_flagged() {
        let sites = [site()];
        assert!(sites_without_push(&sites, &[repo("18F/federalist-docs", true)]).is_empty());
        assert_eq!(
            sites_without_push(&sites, &[repo("18F/federalist-docs", false)]).len(),
            1
        );
        assert_eq!(sites_without_push(&sites, &[]).len(), 1);
    }
}
