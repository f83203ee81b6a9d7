//! Site membership changes, as shown on a site's user-action log.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::user_action::{ActionKind, NewUserAction, UserAction};
use crate::schema::user_actions;

pub async fn record(
    conn: &mut AsyncPgConnection,
    kind: ActionKind,
    user_id: i64,
    target_id: i64,
    site_id: i64,
) -> anyhow::Result<()> {
    diesel::insert_into(user_actions::table)
        .values(NewUserAction::on_user(kind, user_id, target_id, site_id))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn list_for_site(
    conn: &mut AsyncPgConnection,
    site_id: i64,
) -> anyhow::Result<Vec<UserAction>> {
    let results = user_actions::table
        .filter(user_actions::site_id.eq(site_id))
        .order(user_actions::created_at.desc())
        .select(UserAction::as_select())
        .load(conn)
        .await?;
    Ok(results)
}
