//! Re-send queued builds whose message never reached the queue.

use chrono::Utc;

use crate::db::get_conn;
use crate::services::{build_service, site_service};
use crate::state::AppState;

/// How long a build may sit undispatched before it is sent again.
pub const STALE_AFTER_MINUTES: i64 = 5;

pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let mut conn = get_conn(&state.pool).await?;
    let cutoff = Utc::now() - chrono::Duration::minutes(STALE_AFTER_MINUTES);
    let stale = build_service::list_undispatched(&mut conn, cutoff).await?;
    if stale.is_empty() {
        return Ok(());
    }

    let mut sent = 0;
    for build in &stale {
        let Some(site) = site_service::get_site(&mut conn, build.site_id).await? else {
            continue;
        };
        if state.intake.redispatch(build, &site).await {
            sent += 1;
        }
    }
    tracing::info!(stale = stale.len(), sent, "Dispatch sweep complete");
    Ok(())
}
