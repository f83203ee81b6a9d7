//! GitHub integration: webhook validation, REST client, OAuth code exchange.

use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use crate::config::GitHubConfig;

type HmacSha256 = Hmac<Sha256>;

/// Context every build status is posted under.
pub const STATUS_CONTEXT: &str = "federalist/build";

const USER_AGENT: &str = "federalist";
const PER_PAGE: u32 = 100;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
///
/// An unset secret rejects every delivery.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, rejecting delivery");
        return false;
    }

    let sig = match signature.strip_prefix("sha256=") {
        Some(s) => s,
        None => return false,
    };
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
pub(crate) fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub resource not found")]
    NotFound,

    #[error("GitHub API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RepoPermissions {
    pub admin: bool,
    pub push: bool,
    pub pull: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub permissions: Option<RepoPermissions>,
}

impl Repository {
    pub fn can_admin(&self) -> bool {
        self.permissions.as_ref().is_some_and(|p| p.admin)
    }

    pub fn can_push(&self) -> bool {
        self.permissions.as_ref().is_some_and(|p| p.push || p.admin)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchCommit {
    pub sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: BranchCommit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubOrganization {
    pub id: i64,
    pub login: String,
}

/// Body of a commit status update.
#[derive(Debug, Clone)]
pub struct StatusUpdate<'a> {
    pub state: &'a str,
    pub description: &'a str,
    pub target_url: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error_description: Option<String>,
}

/// Thin client over the GitHub REST API. Every call takes the acting user's token.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            oauth_url: config.oauth_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    fn request(&self, method: Method, token: &str, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_url))
            .header("Authorization", format!("Bearer {token}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn check(resp: Response) -> Result<Response, GitHubError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(GitHubError::NotFound);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(GitHubError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(rb: RequestBuilder) -> Result<T, GitHubError> {
        let resp = Self::check(rb.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn send_empty(rb: RequestBuilder) -> Result<(), GitHubError> {
        Self::check(rb.send().await?).await?;
        Ok(())
    }

    /// Walk `path` 100 items at a time until GitHub returns an empty page.
    async fn paginate<T: DeserializeOwned>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, GitHubError> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let rb = self
                .request(Method::GET, token, path)
                .query(query)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let batch: Vec<T> = Self::send_json(rb).await?;
            if batch.is_empty() {
                break;
            }
            all.extend(batch);
            page += 1;
        }
        Ok(all)
    }

    /// `None` when the repository does not exist or is invisible to the token.
    pub async fn get_repository(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<Option<Repository>, GitHubError> {
        let rb = self.request(Method::GET, token, &format!("/repos/{owner}/{repo}"));
        match Self::send_json(rb).await {
            Ok(r) => Ok(Some(r)),
            Err(GitHubError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_branch(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<Branch>, GitHubError> {
        let rb = self.request(
            Method::GET,
            token,
            &format!("/repos/{owner}/{repo}/branches/{branch}"),
        );
        match Self::send_json(rb).await {
            Ok(b) => Ok(Some(b)),
            Err(GitHubError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Register the push webhook. A hook that already exists counts as success.
    pub async fn create_webhook(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        endpoint: &str,
        secret: &str,
    ) -> Result<(), GitHubError> {
        let body = serde_json::json!({
            "name": "web",
            "active": true,
            "config": {
                "url": endpoint,
                "secret": secret,
                "content_type": "json",
            },
        });
        let rb = self
            .request(Method::POST, token, &format!("/repos/{owner}/{repo}/hooks"))
            .json(&body);
        match Self::send_empty(rb).await {
            Err(GitHubError::Api { status: 422, message })
                if message.contains("Hook already exists") =>
            {
                Ok(())
            }
            other => other,
        }
    }

    pub async fn get_user(&self, token: &str) -> Result<GitHubUser, GitHubError> {
        Self::send_json(self.request(Method::GET, token, "/user")).await
    }

    pub async fn get_organizations(
        &self,
        token: &str,
    ) -> Result<Vec<GitHubOrganization>, GitHubError> {
        Self::send_json(self.request(Method::GET, token, "/user/orgs")).await
    }

    pub async fn get_organization_members(
        &self,
        token: &str,
        org: &str,
        role: Option<&str>,
    ) -> Result<Vec<GitHubUser>, GitHubError> {
        let role = role.unwrap_or("all");
        self.paginate(token, &format!("/orgs/{org}/members"), &[("role", role)])
            .await
    }

    pub async fn get_team_members(
        &self,
        token: &str,
        team_id: i64,
    ) -> Result<Vec<GitHubUser>, GitHubError> {
        self.paginate(token, &format!("/teams/{team_id}/members"), &[])
            .await
    }

    pub async fn get_repositories(&self, token: &str) -> Result<Vec<Repository>, GitHubError> {
        self.paginate(token, "/user/repos", &[]).await
    }

    /// Drop `username` from `org`. A member who is already gone is not an error.
    pub async fn remove_organization_member(
        &self,
        token: &str,
        org: &str,
        username: &str,
    ) -> Result<(), GitHubError> {
        let rb = self.request(
            Method::DELETE,
            token,
            &format!("/orgs/{org}/memberships/{username}"),
        );
        match Self::send_empty(rb).await {
            Err(GitHubError::NotFound) => Ok(()),
            other => other,
        }
    }

    /// Post a commit status.
    pub async fn create_status(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        sha: &str,
        status: &StatusUpdate<'_>,
    ) -> Result<(), GitHubError> {
        let body = serde_json::json!({
            "state": status.state,
            "description": status.description,
            "target_url": status.target_url,
            "context": STATUS_CONTEXT,
        });
        let rb = self
            .request(
                Method::POST,
                token,
                &format!("/repos/{owner}/{repo}/statuses/{sha}"),
            )
            .json(&body);
        Self::send_empty(rb).await
    }

    pub fn authorize_url(&self, callback_url: &str, state: &str) -> String {
        let query = [
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", callback_url),
            ("scope", "user:email read:org repo"),
            ("state", state),
        ];
        let base = format!("{}/login/oauth/authorize", self.oauth_url);
        match reqwest::Url::parse_with_params(&base, &query) {
            Ok(url) => url.to_string(),
            Err(_) => base,
        }
    }

    /// Exchange an OAuth `code` for an access token.
    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<String, GitHubError> {
        let rb = self
            .http
            .post(format!("{}/login/oauth/access_token", self.oauth_url))
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "code": code,
                "state": state,
            }));
        let resp: TokenResponse = Self::send_json(rb).await?;
        match resp.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(GitHubError::Api {
                status: 401,
                message: resp
                    .error_description
                    .unwrap_or_else(|| "no access token returned".to_string()),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_client(base_url: &str) -> GitHubClient {
    let mut config = crate::config::test_config().github;
    config.api_url = base_url.to_string();
    config.oauth_url = base_url.to_string();
    GitHubClient::new(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn signature_round_trip() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let sig = sign_payload("shhh", body);
        assert!(validate_signature("shhh", body, &sig));
        assert!(!validate_signature("other", body, &sig));
        assert!(!validate_signature("shhh", b"tampered", &sig));
    }

    #[test]
    fn signature_requires_prefix_and_hex() {
        let body = b"{}";
        let sig = sign_payload("shhh", body);
        let bare = sig.trim_start_matches("sha256=");
        assert!(!validate_signature("shhh", body, bare));
        assert!(!validate_signature("shhh", body, "sha256=not-hex"));
        assert!(!validate_signature("shhh", body, ""));
    }

    #[test]
    fn unset_secret_rejects_everything() {
        let body = b"{}";
        let sig = sign_payload("", body);
        assert!(!validate_signature("", body, &sig));
    }

    #[test]
    fn repository_permissions() {
        let repo: Repository = serde_json::from_value(serde_json::json!({
            "full_name": "18f/site",
            "permissions": { "admin": false, "push": true, "pull": true }
        }))
        .unwrap();
        assert!(repo.can_push());
        assert!(!repo.can_admin());

        let repo: Repository =
            serde_json::from_value(serde_json::json!({ "full_name": "18f/site" })).unwrap();
        assert!(!repo.can_push());
    }

    #[tokio::test]
    async fn missing_repository_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/18f/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let repo = client.get_repository("tok", "18f", "gone").await.unwrap();
        assert!(repo.is_none());
    }

    #[tokio::test]
    async fn pagination_stops_at_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orgs/18F/members"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "login": "a", "id": 1 },
                { "login": "b", "id": 2 }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orgs/18F/members"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{ "login": "c", "id": 3 }])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/orgs/18F/members"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let members = client
            .get_organization_members("tok", "18F", None)
            .await
            .unwrap();
        let logins: Vec<_> = members.iter().map(|m| m.login.as_str()).collect();
        assert_eq!(logins, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn existing_webhook_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/18f/site/hooks"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "Validation Failed",
                "errors": [{ "message": "Hook already exists on this repository" }]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        client
            .create_webhook("tok", "18f", "site", "https://x/webhook/github", "shhh")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn removing_absent_member_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/orgs/federalist-users/memberships/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        client
            .remove_organization_member("tok", "federalist-users", "ghost")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn status_carries_context_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/18f/site/statuses/abc"))
            .and(header("Authorization", "Bearer tok"))
            .and(body_partial_json(serde_json::json!({
                "state": "pending",
                "context": "federalist/build"
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let status = StatusUpdate {
            state: "pending",
            description: "The build is queued",
            target_url: "https://federalist.example.gov/sites/1/builds/2/logs",
        };
        client
            .create_status("tok", "18f", "site", "abc", &status)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn code_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login/oauth/access_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "gho_123" })),
            )
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert_eq!(client.exchange_code("code", "state").await.unwrap(), "gho_123");
    }

    #[test]
    fn authorize_url_carries_state() {
        let client = test_client("https://github.com");
        let url = client.authorize_url("https://app/auth/github/callback", "xyz");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("state=xyz"));
        assert!(url.contains("client_id=client-id"));
    }
}
