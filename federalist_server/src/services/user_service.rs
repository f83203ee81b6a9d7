//! User lookup and sign-in bookkeeping.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::user::{NewUser, User};
use crate::schema::{site_users, users};

pub async fn get_user(conn: &mut AsyncPgConnection, user_id: i64) -> anyhow::Result<Option<User>> {
    let result = users::table
        .find(user_id)
        .filter(users::deleted_at.is_null())
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

pub async fn find_by_username(
    conn: &mut AsyncPgConnection,
    username: &str,
) -> anyhow::Result<Option<User>> {
    let result = users::table
        .filter(users::username.eq(username.to_lowercase()))
        .filter(users::deleted_at.is_null())
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Find a user by GitHub login, creating the row on first sight.
///
/// `None` when the login belongs to a deleted account; it is not revived.
pub async fn find_or_create(
    conn: &mut AsyncPgConnection,
    username: &str,
    email: Option<String>,
) -> anyhow::Result<Option<User>> {
    let new_user = NewUser::new(username, email);
    diesel::insert_into(users::table)
        .values(&new_user)
        .on_conflict(users::username)
        .do_nothing()
        .execute(conn)
        .await?;

    let user = users::table
        .filter(users::username.eq(&new_user.username))
        .filter(users::deleted_at.is_null())
        .select(User::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(user)
}

/// Store the fresh OAuth token and stamp the sign-in time.
pub async fn record_sign_in(
    conn: &mut AsyncPgConnection,
    user_id: i64,
    access_token: &str,
    github_user_id: i64,
) -> anyhow::Result<User> {
    let now = Utc::now();
    let user = diesel::update(users::table.find(user_id))
        .set((
            users::github_access_token.eq(Some(access_token)),
            users::github_user_id.eq(Some(github_user_id.to_string())),
            users::signed_in_at.eq(Some(now)),
            users::updated_at.eq(now),
        ))
        .returning(User::as_returning())
        .get_result(conn)
        .await?;
    Ok(user)
}

/// Bump `signed_in_at` after a successful membership revalidation.
pub async fn touch_sign_in(conn: &mut AsyncPgConnection, user_id: i64) -> anyhow::Result<()> {
    diesel::update(users::table.find(user_id))
        .set(users::signed_in_at.eq(Some(Utc::now())))
        .execute(conn)
        .await?;
    Ok(())
}

/// Users that have signed in at least once and still hold a token.
pub async fn list_with_tokens(conn: &mut AsyncPgConnection) -> anyhow::Result<Vec<User>> {
    let results = users::table
        .filter(users::github_access_token.is_not_null())
        .filter(users::deleted_at.is_null())
        .order(users::id.asc())
        .select(User::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

/// Token to act on a site's repository: the given user's if they have one,
/// otherwise the first member's that does.
pub async fn token_for_site(
    conn: &mut AsyncPgConnection,
    site_id: i64,
    preferred_user_id: Option<i64>,
) -> anyhow::Result<Option<String>> {
    if let Some(user_id) = preferred_user_id {
        if let Some(token) = get_user(conn, user_id)
            .await?
            .and_then(|u| u.github_access_token)
        {
            return Ok(Some(token));
        }
    }

    let token = users::table
        .inner_join(site_users::table)
        .filter(site_users::site_id.eq(site_id))
        .filter(users::github_access_token.is_not_null())
        .filter(users::deleted_at.is_null())
        .order(users::id.asc())
        .select(users::github_access_token)
        .first::<Option<String>>(conn)
        .await
        .optional()?;
    Ok(token.flatten())
}
