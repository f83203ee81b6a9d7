//! Build intake: the one path every build request takes.
//!
//! Webhook pushes, API rebuilds, site edits and scheduled builds all land in
//! [`BuildIntake::submit`], which keeps at most one pending build per
//! (site, branch), dispatches new rows to the queue and reports the commit
//! status back to GitHub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::db::{get_conn, DbPool};
use crate::models::build::{is_valid_sha, Build, BuildState};
use crate::models::site::{is_valid_branch, Site};
use crate::models::user::User;
use crate::services::github_service::{self, GitHubClient, StatusUpdate};
use crate::services::queue::{BuildMessage, BuildQueue};
use crate::services::retry::retry;
use crate::services::{build_service, site_service, user_service};

const QUEUE_ATTEMPTS: u32 = 3;
const STATUS_ATTEMPTS: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Persistence the intake needs.
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn find_site_by_repo(&self, owner: &str, repository: &str)
        -> anyhow::Result<Option<Site>>;

    /// Find or create the user by login and make sure they belong to the site.
    /// `None` for a deleted account, which is left off the site.
    async fn find_or_create_member(
        &self,
        site_id: i64,
        username: &str,
    ) -> anyhow::Result<Option<User>>;

    /// Insert a pending build or refresh the existing one. `true` when inserted.
    async fn upsert_pending_build(
        &self,
        site_id: i64,
        user_id: i64,
        branch: &str,
        commit_sha: Option<String>,
    ) -> anyhow::Result<(Build, bool)>;
}

/// Downstream side effects of a build request. Failures are retried, then
/// logged; they never undo the stored build.
#[async_trait]
pub trait BuildNotifier: Send + Sync {
    /// Send the build to the queue. `true` once the queue accepted it.
    async fn dispatch(&self, build: &Build, site: &Site) -> bool;

    /// Post the build's state as a GitHub commit status.
    async fn report_status(&self, build: &Build, site: &Site);
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Site {0} is not registered")]
    UnknownSite(String),

    #[error("Site {0} is inactive")]
    InactiveSite(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    fn reason(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature => "signature",
            WebhookError::Malformed(_) => "malformed",
            WebhookError::UnknownSite(_) => "unknown_site",
            WebhookError::InactiveSite(_) => "inactive_site",
            WebhookError::Internal(_) => "internal",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushOwner {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushRepository {
    pub name: String,
    #[serde(default)]
    pub owner: PushOwner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushSender {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub id: Option<String>,
}

/// The fields of a GitHub `push` payload the intake reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    pub repository: PushRepository,
    pub sender: PushSender,
}

impl PushEvent {
    pub fn owner(&self) -> Option<&str> {
        let owner = &self.repository.owner;
        owner.login.as_deref().or(owner.name.as_deref())
    }

    /// Branch name for `refs/heads/<branch>`; `None` for tags and other refs.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    pub fn commit_sha(&self) -> Option<String> {
        self.after
            .as_deref()
            .or_else(|| self.commits.last().and_then(|c| c.id.as_deref()))
            .filter(|sha| is_valid_sha(sha))
            .map(str::to_string)
    }
}

#[derive(Debug)]
pub enum PushOutcome {
    /// Acknowledged without touching builds.
    Ignored,
    Created(Build, Site),
    Updated(Build, Site),
}

#[derive(Clone)]
pub struct BuildIntake {
    store: Arc<dyn BuildStore>,
    notifier: Arc<dyn BuildNotifier>,
    webhook_secret: String,
}

impl BuildIntake {
    pub fn new(
        store: Arc<dyn BuildStore>,
        notifier: Arc<dyn BuildNotifier>,
        webhook_secret: String,
    ) -> Self {
        Self {
            store,
            notifier,
            webhook_secret,
        }
    }

    /// Check a delivery's `X-Hub-Signature-256` against the shared secret.
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), WebhookError> {
        if github_service::validate_signature(&self.webhook_secret, body, signature) {
            Ok(())
        } else {
            crate::metrics::webhook_rejected("signature");
            tracing::warn!("Webhook signature validation failed");
            Err(WebhookError::InvalidSignature)
        }
    }

    /// Verify, parse and handle a raw `push` delivery.
    pub async fn receive_push(
        &self,
        body: &[u8],
        signature: &str,
    ) -> Result<PushOutcome, WebhookError> {
        self.verify(body, signature)?;
        let event: PushEvent = serde_json::from_slice(body).map_err(|e| {
            crate::metrics::webhook_rejected("malformed");
            WebhookError::Malformed(e.to_string())
        })?;
        self.handle_push(&event).await.inspect_err(|e| {
            crate::metrics::webhook_rejected(e.reason());
        })
    }

    /// Handle a verified push event.
    pub async fn handle_push(&self, event: &PushEvent) -> Result<PushOutcome, WebhookError> {
        let owner = event
            .owner()
            .ok_or_else(|| WebhookError::Malformed("repository owner missing".to_string()))?
            .to_lowercase();
        let repository = event.repository.name.to_lowercase();
        let full_name = format!("{owner}/{repository}");

        let site = self
            .store
            .find_site_by_repo(&owner, &repository)
            .await?
            .ok_or_else(|| WebhookError::UnknownSite(full_name.clone()))?;
        if !site.is_active() {
            return Err(WebhookError::InactiveSite(full_name));
        }

        let Some(user) = self
            .store
            .find_or_create_member(site.id, &event.sender.login)
            .await?
        else {
            tracing::info!(
                repo = %full_name,
                login = %event.sender.login,
                "Push from deleted user ignored"
            );
            return Ok(PushOutcome::Ignored);
        };

        if event.commits.is_empty() {
            tracing::debug!(repo = %full_name, "Push without commits ignored");
            return Ok(PushOutcome::Ignored);
        }

        let branch = match event.branch() {
            Some(b) if is_valid_branch(b) => b,
            _ => {
                tracing::debug!(repo = %full_name, git_ref = %event.git_ref, "Push ref ignored");
                return Ok(PushOutcome::Ignored);
            }
        };

        let (build, created) = self
            .submit(&site, user.id, branch, event.commit_sha())
            .await?;
        Ok(if created {
            PushOutcome::Created(build, site)
        } else {
            PushOutcome::Updated(build, site)
        })
    }

    /// Request a build of `branch`. Returns the stored build and whether it is new.
    pub async fn submit(
        &self,
        site: &Site,
        user_id: i64,
        branch: &str,
        commit_sha: Option<String>,
    ) -> anyhow::Result<(Build, bool)> {
        if let Some(sha) = commit_sha.as_deref().filter(|s| !is_valid_sha(s)) {
            anyhow::bail!("invalid commit sha {sha:?}");
        }
        let (mut build, created) = self
            .store
            .upsert_pending_build(site.id, user_id, branch, commit_sha)
            .await?;

        if created && self.notifier.dispatch(&build, site).await {
            build.dispatched_at = Some(Utc::now());
        }
        self.notifier.report_status(&build, site).await;

        Ok((build, created))
    }

    /// Send a stored build whose message never reached the queue.
    pub async fn redispatch(&self, build: &Build, site: &Site) -> bool {
        self.notifier.dispatch(build, site).await
    }

    pub async fn report_status(&self, build: &Build, site: &Site) {
        self.notifier.report_status(build, site).await;
    }
}

/// Postgres-backed [`BuildStore`].
pub struct PgBuildStore {
    pool: DbPool,
}

impl PgBuildStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn find_site_by_repo(
        &self,
        owner: &str,
        repository: &str,
    ) -> anyhow::Result<Option<Site>> {
        let mut conn = get_conn(&self.pool).await?;
        site_service::find_by_repo(&mut conn, owner, repository).await
    }

    async fn find_or_create_member(
        &self,
        site_id: i64,
        username: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut conn = get_conn(&self.pool).await?;
        let Some(user) = user_service::find_or_create(&mut conn, username, None).await? else {
            return Ok(None);
        };
        site_service::add_member(&mut conn, site_id, user.id).await?;
        Ok(Some(user))
    }

    async fn upsert_pending_build(
        &self,
        site_id: i64,
        user_id: i64,
        branch: &str,
        commit_sha: Option<String>,
    ) -> anyhow::Result<(Build, bool)> {
        let mut conn = get_conn(&self.pool).await?;
        build_service::upsert_pending(&mut conn, site_id, user_id, branch, commit_sha).await
    }
}

/// [`BuildNotifier`] that talks to the build queue and the GitHub status API.
pub struct BuildDispatcher {
    pool: DbPool,
    queue: Arc<dyn BuildQueue>,
    github: GitHubClient,
    config: Arc<AppConfig>,
}

impl BuildDispatcher {
    pub fn new(
        pool: DbPool,
        queue: Arc<dyn BuildQueue>,
        github: GitHubClient,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            pool,
            queue,
            github,
            config,
        }
    }

    async fn token_for(&self, build: &Build) -> anyhow::Result<Option<String>> {
        let mut conn = get_conn(&self.pool).await?;
        user_service::token_for_site(&mut conn, build.site_id, Some(build.user_id)).await
    }

    async fn try_dispatch(&self, build: &Build, site: &Site) -> anyhow::Result<()> {
        let token = self.token_for(build).await?.unwrap_or_default();
        let message = BuildMessage::new(build, site, &self.config, &token);
        let queue = &self.queue;
        let message = &message;
        retry(QUEUE_ATTEMPTS, RETRY_DELAY, "queue send", move || queue.send(message)).await?;

        let mut conn = get_conn(&self.pool).await?;
        build_service::mark_dispatched(&mut conn, build.id).await
    }

    async fn try_report(&self, build: &Build, site: &Site) -> anyhow::Result<()> {
        let Some(state) = build.state().github_state() else {
            return Ok(());
        };
        let Some(sha) = build.commit_sha.as_deref() else {
            return Ok(());
        };
        let Some(token) = self.token_for(build).await? else {
            tracing::debug!(build_id = build.id, "No token to report status with");
            return Ok(());
        };

        let target_url = match build.state() {
            BuildState::Success => site.view_link_for_branch(&build.branch),
            _ => self.config.build_logs_url(site.id, build.id),
        };
        let update = StatusUpdate {
            state,
            description: status_description(build.state()),
            target_url: &target_url,
        };

        let github = &self.github;
        let update = &update;
        let token = token.as_str();
        retry(STATUS_ATTEMPTS, RETRY_DELAY, "status report", move || {
            github.create_status(token, &site.owner, &site.repository, sha, update)
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BuildNotifier for BuildDispatcher {
    async fn dispatch(&self, build: &Build, site: &Site) -> bool {
        match self.try_dispatch(build, site).await {
            Ok(()) => {
                tracing::info!(build_id = build.id, "Build dispatched");
                true
            }
            Err(e) => {
                crate::metrics::notification_failed("queue");
                tracing::warn!(build_id = build.id, "Build dispatch failed: {e:#}");
                false
            }
        }
    }

    async fn report_status(&self, build: &Build, site: &Site) {
        if let Err(e) = self.try_report(build, site).await {
            crate::metrics::notification_failed("github_status");
            tracing::warn!(build_id = build.id, "GitHub status report failed: {e:#}");
        }
    }
}

pub fn status_description(state: BuildState) -> &'static str {
    match state {
        BuildState::Created | BuildState::Queued => "The build is queued.",
        BuildState::Processing => "The build is running.",
        BuildState::Success => "The build is complete!",
        BuildState::Error => "The build has encountered an error.",
        BuildState::Skipped => "The build was skipped.",
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;
    use crate::models::build::fixtures::build;
    use crate::models::user::fixtures::user;

    /// In-memory [`BuildStore`] with the same pending-build rules as Postgres.
    #[derive(Default)]
    pub struct FakeStore {
        pub sites: Mutex<Vec<Site>>,
        pub users: Mutex<Vec<User>>,
        pub members: Mutex<Vec<(i64, i64)>>,
        pub builds: Mutex<Vec<Build>>,
    }

    impl FakeStore {
        pub fn with_site(site: Site) -> Self {
            let store = Self::default();
            store.sites.lock().unwrap().push(site);
            store
        }

        pub fn build_count(&self) -> usize {
            self.builds.lock().unwrap().len()
        }

        pub fn set_state(&self, build_id: i64, state: BuildState) {
            for b in self.builds.lock().unwrap().iter_mut() {
                if b.id == build_id {
                    b.state = state.as_str().to_string();
                }
            }
        }
    }

    #[async_trait]
    impl BuildStore for FakeStore {
        async fn find_site_by_repo(
            &self,
            owner: &str,
            repository: &str,
        ) -> anyhow::Result<Option<Site>> {
            Ok(self
                .sites
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.owner == owner && s.repository == repository)
                .cloned())
        }

        async fn find_or_create_member(
            &self,
            site_id: i64,
            username: &str,
        ) -> anyhow::Result<Option<User>> {
            let username = username.to_lowercase();
            let mut users = self.users.lock().unwrap();
            let found = match users.iter().find(|u| u.username == username) {
                Some(u) if u.deleted_at.is_some() => return Ok(None),
                Some(u) => u.clone(),
                None => {
                    let u = user(users.len() as i64 + 1, &username);
                    users.push(u.clone());
                    u
                }
            };
            let mut members = self.members.lock().unwrap();
            if !members.contains(&(site_id, found.id)) {
                members.push((site_id, found.id));
            }
            Ok(Some(found))
        }

        async fn upsert_pending_build(
            &self,
            site_id: i64,
            user_id: i64,
            branch: &str,
            commit_sha: Option<String>,
        ) -> anyhow::Result<(Build, bool)> {
            let mut builds = self.builds.lock().unwrap();
            if let Some(existing) = builds
                .iter_mut()
                .find(|b| b.site_id == site_id && b.branch == branch && b.state().is_pending())
            {
                existing.commit_sha = commit_sha;
                existing.user_id = user_id;
                return Ok((existing.clone(), false));
            }
            let mut b = build(builds.len() as i64 + 1, site_id, user_id, branch);
            b.commit_sha = commit_sha;
            builds.push(b.clone());
            Ok((b, true))
        }
    }

    /// Records every notification instead of sending it.
    #[derive(Default)]
    pub struct FakeNotifier {
        pub dispatched: Mutex<Vec<i64>>,
        pub reported: Mutex<Vec<(i64, String)>>,
        pub fail_dispatch: bool,
    }

    #[async_trait]
    impl BuildNotifier for FakeNotifier {
        async fn dispatch(&self, build: &Build, _site: &Site) -> bool {
            if self.fail_dispatch {
                return false;
            }
            self.dispatched.lock().unwrap().push(build.id);
            true
        }

        async fn report_status(&self, build: &Build, _site: &Site) {
            self.reported
                .lock()
                .unwrap()
                .push((build.id, build.state.clone()));
        }
    }

    pub fn intake(store: Arc<FakeStore>, notifier: Arc<FakeNotifier>) -> BuildIntake {
        BuildIntake::new(store, notifier, "shhh".to_string())
    }
}
