//! build_log: output streamed back by a build container.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::build_logs;

/// Source value used by containers that send a single combined stream.
pub const SOURCE_ALL: &str = "ALL";

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = build_logs)]
#[serde(rename_all = "camelCase")]
pub struct BuildLog {
    pub id: i64,
    #[serde(rename = "build")]
    pub build_id: i64,
    pub source: String,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = build_logs)]
pub struct NewBuildLog {
    pub build_id: i64,
    pub source: String,
    pub output: Option<String>,
}
