//! Nightly rebuilds for branches whose config asks for them.

use crate::db::get_conn;
use crate::models::site::Site;
use crate::services::site_service;
use crate::state::AppState;

fn is_nightly(config: Option<&serde_json::Value>) -> bool {
    config
        .and_then(|c| c.get("schedule"))
        .and_then(|s| s.as_str())
        == Some("nightly")
}

/// Default and demo branches configured with `"schedule": "nightly"`.
pub fn nightly_branches(site: &Site) -> Vec<String> {
    let mut branches = Vec::new();
    if is_nightly(site.config.as_ref()) {
        branches.push(site.default_branch.clone());
    }
    if let Some(demo) = site.demo_branch.as_ref().filter(|b| !b.is_empty()) {
        if is_nightly(site.demo_config.as_ref()) {
            branches.push(demo.clone());
        }
    }
    branches
}

pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let mut conn = get_conn(&state.pool).await?;
    let sites = site_service::list_sites(&mut conn).await?;

    let mut submitted = 0;
    for site in sites.iter().filter(|s| s.is_active()) {
        let branches = nightly_branches(site);
        if branches.is_empty() {
            continue;
        }
        let Some(member) = site_service::members(&mut conn, site.id).await?.into_iter().next()
        else {
            continue;
        };
        for branch in &branches {
            state.intake.submit(site, member.id, branch, None).await?;
            submitted += 1;
        }
    }

    tracing::info!(submitted, "Scheduled builds submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::site::fixtures::site;

    #[test]
    fn only_nightly_configs_are_scheduled() {
        let mut s = site();
        assert!(nightly_branches(&s).is_empty());

        s.config = Some(serde_json::json!({ "schedule": "nightly" }));
        s.demo_config = Some(serde_json::json!({ "schedule": "weekly" }));
        assert_eq!(nightly_branches(&s), ["main"]);

        s.demo_config = Some(serde_json::json!({ "schedule": "nightly" }));
        assert_eq!(nightly_branches(&s), ["main", "demo"]);

        s.demo_branch = None;
        assert_eq!(nightly_branches(&s), ["main"]);
    }
}
