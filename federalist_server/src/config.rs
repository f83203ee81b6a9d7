//! Application configuration, loaded from environment variables.

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_list<T: std::str::FromStr>(key: &str) -> Vec<T> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Public base URL of this app, used for callbacks and status links.
    pub hostname: String,
    /// `production` enables secure cookies and opens robots.txt.
    pub app_env: String,
    /// Shared secret for webhook HMAC validation.
    pub webhook_secret: String,
    /// Endpoint registered on new repositories' webhooks.
    pub webhook_endpoint: String,
    pub github: GitHubConfig,
    pub session: SessionConfig,
    pub s3: S3Config,
    /// SQS queue URL for build messages. Messages are only logged when unset.
    pub sqs_queue_url: Option<String>,
    /// DynamoDB table backing the proxy's site routing. Sync is off when unset.
    pub proxy_site_table: Option<String>,
    pub cloud_foundry: Option<CloudFoundryConfig>,
    pub users_audit: UsersAuditConfig,
    /// Container name put on build messages.
    pub build_container_name: String,
    /// UTC hour at which nightly jobs run.
    pub nightly_hour: u32,
    /// Directory the single-page frontend is served from.
    pub public_dir: String,
}

#[derive(Clone, Debug)]
pub struct GitHubConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    /// Organization ids whose members may sign in.
    pub approved_organizations: Vec<i64>,
    pub api_url: String,
    pub oauth_url: String,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_minutes: i64,
    /// Minutes after which organization membership is checked again.
    pub auth_revalidation_minutes: i64,
}

#[derive(Clone, Debug)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub service_name: String,
}

#[derive(Clone, Debug)]
pub struct CloudFoundryConfig {
    pub api_host: String,
    pub oauth_token_url: String,
    pub username: String,
    pub password: String,
    pub space_guid: String,
    pub domain_guid: String,
    pub proxy_guid: String,
    pub s3_service_plan_id: String,
}

#[derive(Clone, Debug)]
pub struct UsersAuditConfig {
    /// Username whose token runs the organization membership audit.
    pub admin_username: Option<String>,
    pub users_org: String,
    pub parent_org: String,
    pub team_ids: Vec<i64>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let hostname = env_or("APP_HOSTNAME", "http://localhost:1337");
        let webhook_secret = env_or("FEDERALIST_WEBHOOK_SECRET", "");

        let github = GitHubConfig {
            client_id: env_or("GITHUB_CLIENT_ID", ""),
            client_secret: env_or("GITHUB_CLIENT_SECRET", ""),
            callback_url: env_or(
                "GITHUB_CLIENT_CALLBACK_URL",
                &format!("{hostname}/auth/github/callback"),
            ),
            approved_organizations: env_list("GITHUB_APPROVED_ORGANIZATIONS"),
            api_url: env_or("GITHUB_API_URL", "https://api.github.com"),
            oauth_url: env_or("GITHUB_OAUTH_URL", "https://github.com"),
        };

        let cloud_foundry = match (
            env_opt("CLOUD_FOUNDRY_API_HOST"),
            env_opt("CLOUD_FOUNDRY_OAUTH_TOKEN_URL"),
        ) {
            (Some(api_host), Some(oauth_token_url)) => Some(CloudFoundryConfig {
                api_host,
                oauth_token_url,
                username: env_or("DEPLOY_USER_USERNAME", ""),
                password: env_or("DEPLOY_USER_PASSWORD", ""),
                space_guid: env_or("CF_SPACE_GUID", ""),
                domain_guid: env_or("CF_DOMAIN_GUID", ""),
                proxy_guid: env_or("CF_PROXY_GUID", ""),
                s3_service_plan_id: env_or("S3_SERVICE_PLAN_ID", "myFederalistS3BrokerGuid"),
            }),
            _ => None,
        };

        let config = Self {
            webhook_endpoint: env_or("WEBHOOK_URL", &format!("{hostname}/webhook/github")),
            app_env: env_or("APP_ENV", "development"),
            webhook_secret,
            github,
            session: SessionConfig {
                cookie_name: env_or("SESSION_COOKIE_NAME", "federalist.sid"),
                ttl_minutes: env_parse("SESSION_TTL_MINUTES", 60 * 24),
                auth_revalidation_minutes: env_parse("AUTH_REVALIDATION_MINUTES", 15),
            },
            s3: S3Config {
                bucket: env_or("S3_BUCKET", "federalist-dev"),
                region: env_or("S3_REGION", "us-gov-west-1"),
                service_name: env_or("S3_SERVICE_NAME", "federalist-dev-s3"),
            },
            sqs_queue_url: env_opt("SQS_QUEUE_URL"),
            proxy_site_table: env_opt("PROXY_SITE_TABLE"),
            cloud_foundry,
            users_audit: UsersAuditConfig {
                admin_username: env_opt("FEDERALIST_USERS_ADMIN"),
                users_org: env_or("FEDERALIST_USERS_ORG", "federalist-users"),
                parent_org: env_or("FEDERALIST_PARENT_ORG", "18F"),
                team_ids: env_list("FEDERALIST_USERS_TEAMS"),
            },
            build_container_name: env_or("BUILD_CONTAINER_NAME", "federalist-garden-build"),
            nightly_hour: env_parse("NIGHTLY_JOBS_HOUR_UTC", 5),
            public_dir: env_or("PUBLIC_DIR", "public"),
            hostname,
        };

        if config.webhook_secret.is_empty() {
            tracing::warn!("FEDERALIST_WEBHOOK_SECRET not set -- all webhook deliveries will be rejected");
        }
        if config.github.client_id.is_empty() || config.github.client_secret.is_empty() {
            tracing::warn!("GITHUB_CLIENT_ID/GITHUB_CLIENT_SECRET not set -- sign-in disabled");
        }
        if config.sqs_queue_url.is_none() {
            tracing::warn!("SQS_QUEUE_URL not set -- build messages will only be logged");
        }
        if config.cloud_foundry.is_none() {
            tracing::warn!("Cloud Foundry not configured -- new sites use the shared bucket");
        }

        config
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    pub fn status_callback(&self, build_id: i64, token: &str) -> String {
        format!("{}/v0/build/{build_id}/status/{token}", self.hostname)
    }

    pub fn log_callback(&self, build_id: i64, token: &str) -> String {
        format!("{}/v0/build/{build_id}/log/{token}", self.hostname)
    }

    pub fn build_logs_url(&self, site_id: i64, build_id: i64) -> String {
        format!("{}/sites/{site_id}/builds/{build_id}/logs", self.hostname)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        hostname: "https://federalist.example.gov".to_string(),
        app_env: "test".to_string(),
        webhook_secret: "shhh".to_string(),
        webhook_endpoint: "https://federalist.example.gov/webhook/github".to_string(),
        github: GitHubConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            callback_url: "https://federalist.example.gov/auth/github/callback".to_string(),
            approved_organizations: vec![123],
            api_url: "https://api.github.com".to_string(),
            oauth_url: "https://github.com".to_string(),
        },
        session: SessionConfig {
            cookie_name: "federalist.sid".to_string(),
            ttl_minutes: 60,
            auth_revalidation_minutes: 15,
        },
        s3: S3Config {
            bucket: "federalist-test".to_string(),
            region: "us-gov-west-1".to_string(),
            service_name: "federalist-test-s3".to_string(),
        },
        sqs_queue_url: None,
        proxy_site_table: None,
        cloud_foundry: None,
        users_audit: UsersAuditConfig {
            admin_username: None,
            users_org: "federalist-users".to_string(),
            parent_org: "18F".to_string(),
            team_ids: Vec::new(),
        },
        build_container_name: "federalist-garden-build".to_string(),
        nightly_hour: 5,
        public_dir: "public".to_string(),
    }
}
