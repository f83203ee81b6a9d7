//! user: a GitHub account that has signed in or pushed to a registered site.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::users;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub github_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub github_user_id: Option<String>,
    #[serde(skip_serializing)]
    pub signed_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the last sign-in is older than `minutes`, meaning organization
    /// membership must be checked again.
    pub fn is_past_auth_threshold(&self, minutes: i64, now: DateTime<Utc>) -> bool {
        match self.signed_in_at {
            Some(at) => now - at > chrono::Duration::minutes(minutes),
            None => true,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
}

impl NewUser {
    pub fn new(username: &str, email: Option<String>) -> Self {
        Self {
            username: username.to_lowercase(),
            email,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_attributes_are_not_serialized() {
        let json = serde_json::to_value(fixtures::user(7, "octocat")).unwrap();
        assert_eq!(json["username"], "octocat");
        assert!(json.get("githubAccessToken").is_none());
        assert!(json.get("githubUserId").is_none());
        assert!(json.get("signedInAt").is_none());
    }

    #[test]
    fn auth_threshold() {
        let now = Utc::now();
        let mut u = fixtures::user(1, "octocat");
        u.signed_in_at = Some(now - chrono::Duration::minutes(16));
        assert!(u.is_past_auth_threshold(15, now));
        u.signed_in_at = Some(now - chrono::Duration::minutes(14));
        assert!(!u.is_past_auth_threshold(15, now));
        u.signed_in_at = None;
        assert!(u.is_past_auth_threshold(15, now));
    }

    #[test]
    fn usernames_are_lowercased() {
        assert_eq!(NewUser::new("OctoCat", None).username, "octocat");
    }
}
