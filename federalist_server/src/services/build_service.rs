//! Build persistence: pending-build upsert, lookups, and status callbacks.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::models::build::{job_error_message, Build, BuildState, NewBuild};
use crate::schema::{builds, sites};

/// Builds shown per site listing.
pub const LIST_LIMIT: i64 = 100;

/// Insert a build for (site, branch), or refresh the one already waiting.
///
/// Runs in a transaction holding the site row lock, so concurrent pushes to
/// the same site serialize here. Returns the row and whether it was inserted.
pub async fn upsert_pending(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    user_id: i64,
    branch: &str,
    commit_sha: Option<String>,
) -> anyhow::Result<(Build, bool)> {
    let branch = branch.to_string();
    let (build, created) = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                sites::table
                    .find(site_id)
                    .select(sites::id)
                    .for_update()
                    .first::<i64>(conn)
                    .await?;

                let pending = builds::table
                    .filter(builds::site_id.eq(site_id))
                    .filter(builds::branch.eq(&branch))
                    .filter(builds::state.eq_any(BuildState::PENDING))
                    .select(Build::as_select())
                    .first::<Build>(conn)
                    .await
                    .optional()?;

                match pending {
                    Some(existing) => {
                        let build = diesel::update(builds::table.find(existing.id))
                            .set((
                                builds::commit_sha.eq(commit_sha),
                                builds::user_id.eq(user_id),
                                builds::updated_at.eq(Utc::now()),
                            ))
                            .returning(Build::as_returning())
                            .get_result(conn)
                            .await?;
                        Ok((build, false))
                    }
                    None => {
                        let build = diesel::insert_into(builds::table)
                            .values(NewBuild::new(site_id, user_id, &branch, commit_sha))
                            .returning(Build::as_returning())
                            .get_result(conn)
                            .await?;
                        Ok((build, true))
                    }
                }
            }
            .scope_boxed()
        })
        .await?;

    if created {
        crate::metrics::build_state_changed(BuildState::Queued.as_str());
        tracing::info!(
            build_id = build.id,
            site_id,
            branch = %build.branch,
            "Build created"
        );
    } else {
        crate::metrics::build_deduplicated();
        tracing::info!(
            build_id = build.id,
            site_id,
            branch = %build.branch,
            "Pending build refreshed"
        );
    }

    Ok((build, created))
}

/// Stamp `dispatched_at` once the queue accepted the build message.
///
/// The state is not touched: the row was `queued` from the start.
pub async fn mark_dispatched(conn: &mut AsyncPgConnection, build_id: i64) -> anyhow::Result<()> {
    diesel::update(
        builds::table
            .find(build_id)
            .filter(builds::dispatched_at.is_null()),
    )
    .set(builds::dispatched_at.eq(Utc::now()))
    .execute(conn)
    .await?;
    Ok(())
}

/// Latest builds for a site, newest first.
pub async fn list_for_site(conn: &mut AsyncPgConnection, site_id: i64) -> anyhow::Result<Vec<Build>> {
    let results = builds::table
        .filter(builds::site_id.eq(site_id))
        .order(builds::created_at.desc())
        .limit(LIST_LIMIT)
        .select(Build::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

/// Get a build by ID.
pub async fn get_build(conn: &mut AsyncPgConnection, build_id: i64) -> anyhow::Result<Option<Build>> {
    let result = builds::table
        .find(build_id)
        .select(Build::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Get a build by ID, only if `token` matches. Used by container callbacks.
pub async fn get_by_token(
    conn: &mut AsyncPgConnection,
    build_id: i64,
    token: &str,
) -> anyhow::Result<Option<Build>> {
    let result = builds::table
        .find(build_id)
        .filter(builds::token.eq(token))
        .select(Build::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Most recent build of `branch` for a site.
pub async fn get_latest(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    branch: &str,
) -> anyhow::Result<Option<Build>> {
    let result = builds::table
        .filter(builds::site_id.eq(site_id))
        .filter(builds::branch.eq(branch))
        .order(builds::id.desc())
        .select(Build::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Builds `queued` since before `cutoff` whose queue message never went out.
pub async fn list_undispatched(
    conn: &mut AsyncPgConnection,
    cutoff: DateTime<Utc>,
) -> anyhow::Result<Vec<Build>> {
    let results = builds::table
        .filter(builds::state.eq(BuildState::Queued.as_str()))
        .filter(builds::dispatched_at.is_null())
        .filter(builds::created_at.lt(cutoff))
        .order(builds::id.asc())
        .select(Build::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

/// Apply a status reported by the build container.
///
/// Errors get a sanitized message, terminal states get `completed_at`, and a
/// success stamps the site's `published_at`.
pub async fn update_job_status(
    conn: &mut AsyncPgConnection,
    build: &Build,
    state: BuildState,
    message: Option<&str>,
) -> anyhow::Result<Build> {
    let now = Utc::now();
    let error = (state == BuildState::Error).then(|| job_error_message(message));
    let completed_at = state.is_complete().then_some(now);

    let updated = diesel::update(builds::table.find(build.id))
        .set((
            builds::state.eq(state.as_str()),
            builds::error.eq(error.or_else(|| build.error.clone())),
            builds::completed_at.eq(completed_at.or(build.completed_at)),
            builds::updated_at.eq(now),
        ))
        .returning(Build::as_returning())
        .get_result(conn)
        .await?;

    if state == BuildState::Success {
        diesel::update(sites::table.find(build.site_id))
            .set(sites::published_at.eq(Some(now)))
            .execute(conn)
            .await?;
    }

    crate::metrics::build_state_changed(state.as_str());
    tracing::info!(build_id = build.id, state = %state, "Build status updated");

    Ok(updated)
}
