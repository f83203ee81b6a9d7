//! Build queue: the message a build container consumes, and where it goes.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::AppConfig;
use crate::models::build::Build;
use crate::models::site::{BranchKind, Site};

const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Body of a queue message: the container name plus its environment.
#[derive(Debug, Clone, Serialize)]
pub struct BuildMessage {
    pub environment: Vec<EnvVar>,
    pub name: String,
}

impl BuildMessage {
    pub fn new(build: &Build, site: &Site, config: &AppConfig, github_token: &str) -> Self {
        let config_json = site
            .config_for_branch(&build.branch)
            .map(|c| c.to_string())
            .unwrap_or_default();

        let vars = [
            ("AWS_DEFAULT_REGION", site.aws_bucket_region.clone()),
            ("BUCKET", site.aws_bucket_name.clone()),
            ("BASEURL", base_url(site, &build.branch)),
            ("BRANCH", build.branch.clone()),
            ("CONFIG", config_json),
            ("REPOSITORY", site.repository.clone()),
            ("OWNER", site.owner.clone()),
            ("SITE_PREFIX", site.path_for_branch(&build.branch)),
            (TOKEN_VAR, github_token.to_string()),
            ("GENERATOR", site.engine.clone()),
            ("BUILD_ID", build.id.to_string()),
            ("STATUS_CALLBACK", config.status_callback(build.id, &build.token)),
            ("LOG_CALLBACK", config.log_callback(build.id, &build.token)),
        ];

        Self {
            environment: vars
                .into_iter()
                .map(|(name, value)| EnvVar {
                    name: name.to_string(),
                    value,
                })
                .collect(),
            name: config.build_container_name.clone(),
        }
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.environment
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
    }

    /// The message with the GitHub token masked, safe to log.
    pub fn redacted(&self) -> BuildMessage {
        let mut message = self.clone();
        for var in &mut message.environment {
            if var.name == TOKEN_VAR {
                var.value = "[redacted]".to_string();
            }
        }
        message
    }
}

/// Path the generator should assume the site is served under.
///
/// Empty when the branch is served from its own custom domain.
pub fn base_url(site: &Site, branch: &str) -> String {
    let has_domain = |d: &Option<String>| d.as_deref().is_some_and(|d| !d.is_empty());
    match site.branch_kind(branch) {
        BranchKind::Default if has_domain(&site.domain) => String::new(),
        BranchKind::Demo if has_domain(&site.demo_domain) => String::new(),
        _ => format!("/{}", site.path_for_branch(branch)),
    }
}

#[async_trait]
pub trait BuildQueue: Send + Sync {
    async fn send(&self, message: &BuildMessage) -> anyhow::Result<()>;
}

/// Sends build messages to an SQS queue.
pub struct SqsBuildQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsBuildQueue {
    pub fn new(sdk_config: &aws_config::SdkConfig, queue_url: String) -> Self {
        Self {
            client: aws_sdk_sqs::Client::new(sdk_config),
            queue_url,
        }
    }
}

#[async_trait]
impl BuildQueue for SqsBuildQueue {
    async fn send(&self, message: &BuildMessage) -> anyhow::Result<()> {
        let body = serde_json::to_string(message)?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("sqs send_message: {e}"))?;
        Ok(())
    }
}

/// Stand-in when no queue is configured: the message is only logged.
pub struct LoggingQueue;

#[async_trait]
impl BuildQueue for LoggingQueue {
    async fn send(&self, message: &BuildMessage) -> anyhow::Result<()> {
        let body = serde_json::to_string(&message.redacted())?;
        tracing::info!(message = %body, "Build message (no queue configured)");
        Ok(())
    }
}
