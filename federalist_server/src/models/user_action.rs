//! user_action: who added or removed whom on a site.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;

use crate::schema::user_actions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Add,
    Remove,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Add => "add",
            ActionKind::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = user_actions)]
#[serde(rename_all = "camelCase")]
pub struct UserAction {
    pub id: i64,
    pub user_id: i64,
    pub target_id: i64,
    pub target_type: String,
    pub action: String,
    pub site_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_actions)]
pub struct NewUserAction {
    pub user_id: i64,
    pub target_id: i64,
    pub target_type: String,
    pub action: String,
    pub site_id: i64,
}

impl NewUserAction {
    pub fn on_user(kind: ActionKind, user_id: i64, target_id: i64, site_id: i64) -> Self {
        Self {
            user_id,
            target_id,
            target_type: "user".to_string(),
            action: kind.as_str().to_string(),
            site_id,
        }
    }
}
