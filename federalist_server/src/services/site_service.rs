//! Site CRUD and membership.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::models::site::{NewSite, Site, SiteChanges};
use crate::models::user::User;
use crate::schema::{site_users, sites, users};

/// Find a live site by repository. Matching is case-insensitive.
pub async fn find_by_repo(
    conn: &mut AsyncPgConnection,
    owner: &str,
    repository: &str,
) -> anyhow::Result<Option<Site>> {
    let result = sites::table
        .filter(sites::owner.eq(owner.to_lowercase()))
        .filter(sites::repository.eq(repository.to_lowercase()))
        .filter(sites::deleted_at.is_null())
        .select(Site::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

pub async fn get_site(conn: &mut AsyncPgConnection, site_id: i64) -> anyhow::Result<Option<Site>> {
    let result = sites::table
        .find(site_id)
        .filter(sites::deleted_at.is_null())
        .select(Site::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// All live sites, oldest first.
pub async fn list_sites(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<Site>> {
    let results = sites::table
        .filter(sites::deleted_at.is_null())
        .order(sites::id.asc())
        .select(Site::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

pub async fn list_for_user(conn: &mut AsyncPgConnection, user_id: i64) -> anyhow::Result<Vec<Site>> {
    let results = sites::table
        .inner_join(site_users::table)
        .filter(site_users::user_id.eq(user_id))
        .filter(sites::deleted_at.is_null())
        .order(sites::id.asc())
        .select(Site::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

pub async fn is_member(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    user_id: i64,
) -> anyhow::Result<bool> {
    let count: i64 = site_users::table
        .filter(site_users::site_id.eq(site_id))
        .filter(site_users::user_id.eq(user_id))
        .count()
        .get_result(conn)
        .await?;
    Ok(count > 0)
}

/// Add a member. Returns `false` if they already were one.
pub async fn add_member(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    user_id: i64,
) -> anyhow::Result<bool> {
    let inserted = diesel::insert_into(site_users::table)
        .values((site_users::site_id.eq(site_id), site_users::user_id.eq(user_id)))
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(inserted > 0)
}

pub async fn remove_member(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    user_id: i64,
) -> anyhow::Result<()> {
    diesel::delete(
        site_users::table
            .filter(site_users::site_id.eq(site_id))
            .filter(site_users::user_id.eq(user_id)),
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Live members of a site, oldest account first.
pub async fn members(conn: &mut AsyncPgConnection, site_id: i64) -> anyhow::Result<Vec<User>> {
    let results = users::table
        .inner_join(site_users::table)
        .filter(site_users::site_id.eq(site_id))
        .filter(users::deleted_at.is_null())
        .order(users::id.asc())
        .select(User::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

/// Insert a site together with its first member.
pub async fn create_site(
    conn: &mut AsyncPgConnection,
    new_site: NewSite,
    user_id: i64,
) -> anyhow::Result<Site> {
    let site = conn
        .transaction::<_, anyhow::Error, _>(|conn| {
            async move {
                let site = diesel::insert_into(sites::table)
                    .values(&new_site)
                    .returning(Site::as_returning())
                    .get_result(conn)
                    .await?;
                diesel::insert_into(site_users::table)
                    .values((site_users::site_id.eq(site.id), site_users::user_id.eq(user_id)))
                    .execute(conn)
                    .await?;
                Ok(site)
            }
            .scope_boxed()
        })
        .await?;

    tracing::info!(site_id = site.id, repo = %site.full_name(), "Site created");
    Ok(site)
}

pub async fn update_site(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    changes: &SiteChanges,
) -> anyhow::Result<Site> {
    let site = diesel::update(sites::table.find(site_id))
        .set((changes, sites::updated_at.eq(Utc::now())))
        .returning(Site::as_returning())
        .get_result(conn)
        .await?;
    Ok(site)
}

pub async fn soft_delete(conn: &mut AsyncPgConnection, site_id: i64) -> anyhow::Result<()> {
    diesel::update(sites::table.find(site_id))
        .set(sites::deleted_at.eq(Some(Utc::now())))
        .execute(conn)
        .await?;
    tracing::info!(site_id, "Site deleted");
    Ok(())
}

pub async fn mark_verified(conn: &mut AsyncPgConnection, site_id: i64) -> anyhow::Result<()> {
    diesel::update(sites::table.find(site_id))
        .set(sites::repo_last_verified.eq(Some(Utc::now())))
        .execute(conn)
        .await?;
    Ok(())
}
