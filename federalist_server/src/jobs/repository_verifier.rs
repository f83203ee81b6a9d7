//! Confirm every site's repository is still reachable with a member's token.

use crate::db::get_conn;
use crate::services::site_service;
use crate::state::AppState;

pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let mut conn = get_conn(&state.pool).await?;
    let sites = site_service::list_sites(&mut conn).await?;

    let mut verified = 0;
    for site in &sites {
        let members = site_service::members(&mut conn, site.id).await?;
        for token in members.iter().filter_map(|m| m.github_access_token.as_deref()) {
            match state
                .github
                .get_repository(token, &site.owner, &site.repository)
                .await
            {
                Ok(Some(_)) => {
                    site_service::mark_verified(&mut conn, site.id).await?;
                    verified += 1;
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(site_id = site.id, "Repository check failed: {e}");
                    continue;
                }
            }
        }
    }

    tracing::info!(sites = sites.len(), verified, "Repositories verified");
    Ok(())
}
