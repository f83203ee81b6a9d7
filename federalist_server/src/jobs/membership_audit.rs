//! Prune the users organization's audited teams down to people who are still
//! in the parent organization or administer the users organization.

use std::collections::HashSet;

use crate::db::get_conn;
use crate::models::event::EventLabel;
use crate::services::github_service::GitHubUser;
use crate::services::{event_service, user_service};
use crate::state::AppState;

/// Team members to remove. An empty parent list removes nobody: it means the
/// lookup came back blank, not that the organization is empty.
pub fn members_to_remove(
    teams: &[Vec<GitHubUser>],
    parent_members: &[GitHubUser],
    admins: &[GitHubUser],
) -> Vec<String> {
    if parent_members.is_empty() {
        return Vec::new();
    }
    let keep: HashSet<String> = parent_members
        .iter()
        .chain(admins)
        .map(|m| m.login.to_lowercase())
        .collect();

    let mut remove = Vec::new();
    for member in teams.iter().flatten() {
        let login = member.login.to_lowercase();
        if !keep.contains(&login) && !remove.contains(&member.login) {
            remove.push(member.login.clone());
        }
    }
    remove
}

pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let audit = &state.config.users_audit;
    let Some(admin) = audit.admin_username.as_deref() else {
        tracing::debug!("No users admin configured, skipping membership audit");
        return Ok(());
    };
    let mut conn = get_conn(&state.pool).await?;
    let token = user_service::find_by_username(&mut conn, admin)
        .await?
        .and_then(|u| u.github_access_token)
        .ok_or_else(|| anyhow::anyhow!("users admin {admin} has no token"))?;

    let github = &state.github;
    let parent = github
        .get_organization_members(&token, &audit.parent_org, None)
        .await?;
    let admins = github
        .get_organization_members(&token, &audit.users_org, Some("admin"))
        .await?;
    let mut teams = Vec::with_capacity(audit.team_ids.len());
    for team_id in &audit.team_ids {
        teams.push(github.get_team_members(&token, *team_id).await?);
    }

    let remove = members_to_remove(&teams, &parent, &admins);
    for login in &remove {
        github
            .remove_organization_member(&token, &audit.users_org, login)
            .await?;
        tracing::info!(org = %audit.users_org, login = %login, "Removed organization member");
        event_service::audit(
            &mut conn,
            EventLabel::Admin,
            None,
            serde_json::json!({ "action": "remove_organization_member", "login": login }),
        )
        .await;
    }

    tracing::info!(removed = remove.len(), "Organization membership audited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gh(login: &str) -> GitHubUser {
        GitHubUser {
            login: login.to_string(),
            id: 1,
            email: None,
        }
    }

    #[test]
    fn keeps_parent_members_and_admins() {
        let teams = vec![vec![gh("alice"), gh("Bob"), gh("carol")], vec![gh("dave"), gh("carol")]];
        let parent = [gh("alice"), gh("bob")];
        let admins = [gh("dave")];
        assert_eq!(members_to_remove(&teams, &parent, &admins), ["carol"]);
    }

    #[test]
    fn empty_parent_list_removes_nobody() {
        let teams = vec![vec![gh("alice")]];
        assert!(members_to_remove(&teams, &[], &[]).is_empty());
    }
}
