//! Build log storage and paging.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::build_log::{BuildLog, NewBuildLog, SOURCE_ALL};
use crate::schema::build_logs;

/// Combined-stream rows per page.
pub const PAGE_SIZE: i64 = 5000;
/// Per-step rows per page, for builds logged before streams were combined.
pub const LEGACY_PAGE_SIZE: i64 = 5;

pub async fn append(
    conn: &mut AsyncPgConnection,
    build_id: i64,
    source: &str,
    output: &str,
) -> anyhow::Result<BuildLog> {
    let log = diesel::insert_into(build_logs::table)
        .values(NewBuildLog {
            build_id,
            source: source.to_string(),
            output: Some(output.to_string()),
        })
        .returning(BuildLog::as_returning())
        .get_result(conn)
        .await?;
    Ok(log)
}

/// Offset for a 1-based page number.
pub fn page_offset(page: i64, size: i64) -> i64 {
    (page.max(1) - 1) * size
}

/// One page of a build's log, oldest first.
pub async fn page(
    conn: &mut AsyncPgConnection,
    build_id: i64,
    page: i64,
) -> anyhow::Result<Vec<BuildLog>> {
    let combined: i64 = build_logs::table
        .filter(build_logs::build_id.eq(build_id))
        .filter(build_logs::source.eq(SOURCE_ALL))
        .count()
        .get_result(conn)
        .await?;

    let query = build_logs::table
        .filter(build_logs::build_id.eq(build_id))
        .order(build_logs::id.asc())
        .select(BuildLog::as_select())
        .into_boxed();

    let results = if combined > 0 {
        query
            .filter(build_logs::source.eq(SOURCE_ALL))
            .limit(PAGE_SIZE)
            .offset(page_offset(page, PAGE_SIZE))
            .load(conn)
            .await?
    } else {
        query
            .limit(LEGACY_PAGE_SIZE)
            .offset(page_offset(page, LEGACY_PAGE_SIZE))
            .load(conn)
            .await?
    };
    Ok(results)
}
