//! Background housekeeping: nightly audits and scheduled builds, plus a
//! frequent sweep for builds whose queue message never went out.

pub mod dispatch_sweep;
pub mod membership_audit;
pub mod repository_verifier;
pub mod scheduled_builds;
pub mod site_user_auditor;

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Timelike, Utc};

use crate::db::get_conn;
use crate::services::site_service;
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Time from `now` until the next `hour:00` UTC.
pub fn until_next_run(now: DateTime<Utc>, hour: u32) -> chrono::Duration {
    let today = now
        .date_naive()
        .and_hms_opt(hour % 24, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    next - now
}

async fn timed<F>(name: &'static str, job: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    let started = Instant::now();
    match job.await {
        Ok(()) => tracing::info!(job = name, "Job finished"),
        Err(e) => tracing::error!(job = name, "Job failed: {e:#}"),
    }
    crate::metrics::job_duration(name, started.elapsed().as_millis() as u64);
}

/// Rewrite every live site into the proxy routing table.
pub async fn resync_proxy(state: &AppState) -> anyhow::Result<()> {
    let Some(proxy) = state.proxy() else {
        return Ok(());
    };
    let mut conn = get_conn(&state.pool).await?;
    let sites = site_service::list_sites(&mut conn).await?;
    proxy.save_sites(&sites).await?;
    tracing::info!(sites = sites.len(), "Proxy routing table resynced");
    Ok(())
}

pub async fn run_nightly(state: &AppState) {
    timed("repository_verifier", repository_verifier::run(state)).await;
    timed("site_user_auditor", site_user_auditor::run(state)).await;
    timed("membership_audit", membership_audit::run(state)).await;
    timed("scheduled_builds", scheduled_builds::run(state)).await;
    timed("proxy_resync", resync_proxy(state)).await;
}

pub fn spawn_nightly(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let wait = until_next_run(now, state.config.nightly_hour);
            tracing::info!(
                hour = state.config.nightly_hour,
                minutes = wait.num_minutes(),
                "Nightly jobs scheduled"
            );
            tokio::time::sleep(wait.to_std().unwrap_or(Duration::from_secs(60))).await;
            if Utc::now().hour() == state.config.nightly_hour % 24 {
                run_nightly(&state).await;
            }
        }
    })
}

pub fn spawn_dispatch_sweep(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            timed("dispatch_sweep", dispatch_sweep::run(&state)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 30, 0).unwrap();
        assert_eq!(until_next_run(now, 5), chrono::Duration::minutes(90));

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();
        assert_eq!(until_next_run(now, 5), chrono::Duration::hours(24));

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(until_next_run(now, 5), chrono::Duration::hours(6));
    }
}
