//! site: a registered owner/repository pairing with deployment configuration.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::schema::sites;

static BRANCH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w._]+(?:[/-]*[\w._])*$").unwrap());
static SUBDOMAIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9-]{1,63}$").unwrap());

pub const ENGINES: [&str; 4] = ["hugo", "jekyll", "node.js", "static"];

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = sites)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: i64,
    pub owner: String,
    pub repository: String,
    pub engine: String,
    pub default_branch: String,
    pub demo_branch: Option<String>,
    pub domain: Option<String>,
    pub demo_domain: Option<String>,
    pub config: Option<serde_json::Value>,
    pub preview_config: Option<serde_json::Value>,
    pub demo_config: Option<serde_json::Value>,
    pub build_status: String,
    pub s3_service_name: String,
    pub aws_bucket_name: String,
    pub aws_bucket_region: String,
    pub subdomain: String,
    pub organization_id: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub repo_last_verified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sites)]
pub struct NewSite {
    pub owner: String,
    pub repository: String,
    pub engine: String,
    pub default_branch: String,
    pub build_status: String,
    pub s3_service_name: String,
    pub aws_bucket_name: String,
    pub aws_bucket_region: String,
    pub subdomain: String,
}

/// Fields a member may change through the API.
#[derive(Debug, Clone, Default, Deserialize, AsChangeset)]
#[diesel(table_name = sites)]
#[serde(rename_all = "camelCase")]
pub struct SiteChanges {
    pub engine: Option<String>,
    pub default_branch: Option<String>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub demo_branch: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub domain: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub demo_domain: Option<Option<String>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub config: Option<Option<serde_json::Value>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub preview_config: Option<Option<serde_json::Value>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub demo_config: Option<Option<serde_json::Value>>,
}

/// Absent field -> `None` (leave alone), `null` -> `Some(None)` (clear).
fn explicit_null<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Site-level validation failure, surfaced as a 403 like other model errors.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SiteValidationError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Default,
    Demo,
    Preview,
}

impl Site {
    pub fn is_active(&self) -> bool {
        self.build_status == "active"
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repository)
    }

    pub fn branch_kind(&self, branch: &str) -> BranchKind {
        if branch == self.default_branch {
            BranchKind::Default
        } else if self.demo_branch.as_deref() == Some(branch) {
            BranchKind::Demo
        } else {
            BranchKind::Preview
        }
    }

    /// Object-store prefix the given branch publishes to.
    pub fn path_for_branch(&self, branch: &str) -> String {
        match self.branch_kind(branch) {
            BranchKind::Default => format!("site/{}/{}", self.owner, self.repository),
            BranchKind::Demo => format!("demo/{}/{}", self.owner, self.repository),
            BranchKind::Preview => {
                format!("preview/{}/{}/{}", self.owner, self.repository, branch)
            }
        }
    }

    /// The three prefixes that together hold everything this site has published.
    pub fn published_prefixes(&self) -> [String; 3] {
        [
            format!("site/{}/{}", self.owner, self.repository),
            format!("demo/{}/{}", self.owner, self.repository),
            format!("preview/{}/{}", self.owner, self.repository),
        ]
    }

    fn bucket_host(&self) -> String {
        format!("https://{}.app.cloud.gov", self.aws_bucket_name)
    }

    pub fn site_url(&self) -> String {
        match &self.domain {
            Some(domain) if !domain.is_empty() => with_trailing_slash(domain),
            _ => format!(
                "{}/site/{}/{}/",
                self.bucket_host(),
                self.owner,
                self.repository
            ),
        }
    }

    pub fn demo_url(&self) -> String {
        match &self.demo_domain {
            Some(domain) if !domain.is_empty() => with_trailing_slash(domain),
            _ => format!(
                "{}/demo/{}/{}/",
                self.bucket_host(),
                self.owner,
                self.repository
            ),
        }
    }

    pub fn branch_preview_url(&self, branch: Option<&str>) -> String {
        let url = format!(
            "{}/preview/{}/{}/",
            self.bucket_host(),
            self.owner,
            self.repository
        );
        match branch {
            Some(b) => format!("{url}{b}/"),
            None => url,
        }
    }

    pub fn view_link_for_branch(&self, branch: &str) -> String {
        match self.branch_kind(branch) {
            BranchKind::Default => self.site_url(),
            BranchKind::Demo => self.demo_url(),
            BranchKind::Preview => self.branch_preview_url(Some(branch)),
        }
    }

    /// Config object that applies to builds of the given branch.
    pub fn config_for_branch(&self, branch: &str) -> Option<&serde_json::Value> {
        match self.branch_kind(branch) {
            BranchKind::Default => self.config.as_ref(),
            BranchKind::Demo => self.demo_config.as_ref(),
            BranchKind::Preview => self.preview_config.as_ref(),
        }
    }

    pub fn validate(&self) -> Result<(), SiteValidationError> {
        validate_fields(
            &self.engine,
            &self.default_branch,
            self.demo_branch.as_deref(),
            self.domain.as_deref(),
            self.demo_domain.as_deref(),
        )?;
        validate_subdomain(&self.subdomain)
    }

    /// Apply `changes` to a copy of this site so the result can be validated
    /// before it is written.
    pub fn with_changes(&self, changes: &SiteChanges) -> Site {
        let mut site = self.clone();
        if let Some(engine) = &changes.engine {
            site.engine = engine.clone();
        }
        if let Some(branch) = &changes.default_branch {
            site.default_branch = branch.clone();
        }
        if let Some(branch) = &changes.demo_branch {
            site.demo_branch = branch.clone();
        }
        if let Some(domain) = &changes.domain {
            site.domain = domain.clone();
        }
        if let Some(domain) = &changes.demo_domain {
            site.demo_domain = domain.clone();
        }
        if let Some(config) = &changes.config {
            site.config = config.clone();
        }
        if let Some(config) = &changes.preview_config {
            site.preview_config = config.clone();
        }
        if let Some(config) = &changes.demo_config {
            site.demo_config = config.clone();
        }
        site
    }
}

fn with_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

pub fn is_valid_branch(branch: &str) -> bool {
    BRANCH_REGEX.is_match(branch)
}

fn is_https_url(value: &str) -> bool {
    value
        .strip_prefix("https://")
        .map(|rest| {
            let host = rest.split('/').next().unwrap_or_default();
            host.contains('.') && !host.starts_with('.') && !host.ends_with('.')
        })
        .unwrap_or(false)
}

pub fn validate_fields(
    engine: &str,
    default_branch: &str,
    demo_branch: Option<&str>,
    domain: Option<&str>,
    demo_domain: Option<&str>,
) -> Result<(), SiteValidationError> {
    let mut messages = Vec::new();

    if !ENGINES.contains(&engine) {
        messages.push(format!("engine: Invalid engine: {engine}"));
    }
    for (field, value) in [("defaultBranch", Some(default_branch)), ("demoBranch", demo_branch)] {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            if !is_valid_branch(v) {
                messages.push(format!(
                    "{field}: Invalid branch name — branches can only contain alphanumeric characters, underscores, and hyphens."
                ));
            }
        }
    }
    for (field, value) in [("domain", domain), ("demoDomain", demo_domain)] {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            if !is_https_url(v) {
                messages.push(format!("{field}: URL must start with https://"));
            }
        }
    }
    if !messages.is_empty() {
        return Err(SiteValidationError(messages.join("\n")));
    }

    if demo_branch == Some(default_branch) {
        return Err(SiteValidationError(
            "Default branch and demo branch cannot be the same".to_string(),
        ));
    }
    if let Some(d) = domain.filter(|d| !d.is_empty()) {
        if demo_domain == Some(d) {
            return Err(SiteValidationError(
                "Domain and demo domain cannot be the same".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn validate_subdomain(subdomain: &str) -> Result<(), SiteValidationError> {
    if SUBDOMAIN_REGEX.is_match(subdomain) {
        Ok(())
    } else {
        Err(SiteValidationError(
            "subdomain: Subdomains may only contain up to 63 alphanumeric and hyphen characters."
                .to_string(),
        ))
    }
}

fn dasherize(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Proxy subdomain for a new site: `owner--repository`, at most 63 characters.
pub fn generate_subdomain(owner: &str, repository: &str) -> String {
    let mut subdomain = format!("{}--{}", dasherize(owner), dasherize(repository));
    subdomain.truncate(63);
    subdomain.trim_end_matches('-').to_string()
}

/// Broker service name for a site's dedicated bucket.
pub fn generate_s3_service_name(owner: &str, repository: &str) -> String {
    let format = |s: &str| s.to_lowercase().split(' ').collect::<Vec<_>>().join("-");
    let mut name = format!("o-{}-r-{}", format(owner), format(repository));
    name.truncate(46);
    name
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn site() -> Site {
        let now = Utc::now();
        Site {
            id: 1,
            owner: "18f".to_string(),
            repository: "federalist-docs".to_string(),
            engine: "jekyll".to_string(),
            default_branch: "main".to_string(),
            demo_branch: Some("demo".to_string()),
            domain: None,
            demo_domain: None,
            config: None,
            preview_config: None,
            demo_config: None,
            build_status: "active".to_string(),
            s3_service_name: "federalist-dev-s3".to_string(),
            aws_bucket_name: "cg-123456".to_string(),
            aws_bucket_region: "us-gov-west-1".to_string(),
            subdomain: "18f--federalist-docs".to_string(),
            organization_id: None,
            published_at: None,
            repo_last_verified: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
