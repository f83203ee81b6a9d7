//! Organizations a user belongs to.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::organization::Organization;
use crate::schema::{organization_users, organizations};

pub async fn list_for_user(
    conn: &mut AsyncPgConnection,
    user_id: i64,
) -> anyhow::Result<Vec<Organization>> {
    let results = organizations::table
        .inner_join(organization_users::table)
        .filter(organization_users::user_id.eq(user_id))
        .order(organizations::name.asc())
        .select(Organization::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

/// An organization, only if `user_id` is one of its members.
pub async fn get_for_user(
    conn: &mut AsyncPgConnection,
    organization_id: i64,
    user_id: i64,
) -> anyhow::Result<Option<Organization>> {
    let result = organizations::table
        .inner_join(organization_users::table)
        .filter(organizations::id.eq(organization_id))
        .filter(organization_users::user_id.eq(user_id))
        .select(Organization::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}
