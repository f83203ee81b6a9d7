//! Shared state handed to every route handler and background job.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{get_conn, DbConn, DbPool};
use crate::error::ApiError;
use crate::services::cf_client::CfClient;
use crate::services::github_service::GitHubClient;
use crate::services::intake::BuildIntake;
use crate::services::object_store::ObjectStore;
use crate::services::proxy_data_sync::ProxyDataSync;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub github: GitHubClient,
    pub intake: BuildIntake,
    pub sessions: Arc<SessionStore>,
    pub objects: Arc<dyn ObjectStore>,
    /// Present when a proxy routing table is configured.
    pub proxy: Option<Arc<ProxyDataSync>>,
    /// Present when Cloud Foundry credentials are configured.
    pub cf: Option<Arc<CfClient>>,
}

impl AppState {
    pub async fn conn(&self) -> Result<DbConn, ApiError> {
        Ok(get_conn(&self.pool).await?)
    }

    pub fn proxy(&self) -> Option<&ProxyDataSync> {
        self.proxy.as_deref()
    }

    pub fn cf(&self) -> Option<&CfClient> {
        self.cf.as_deref()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::services::github_service::test_client;
    use crate::services::intake::fakes::{intake, FakeNotifier, FakeStore};
    use crate::services::object_store::fakes::FakeObjectStore;

    /// State whose pool never connects. Routes that reach the database fail
    /// with a 500, everything in front of it runs for real.
    pub fn state(store: Arc<FakeStore>, notifier: Arc<FakeNotifier>) -> AppState {
        let config = crate::config::test_config();
        AppState {
            pool: crate::db::build_pool("postgres://localhost:1/unreachable", 1).unwrap(),
            github: test_client("http://127.0.0.1:1"),
            intake: intake(store, notifier),
            sessions: Arc::new(SessionStore::new(config.session.ttl_minutes)),
            objects: Arc::new(FakeObjectStore::with_keys(Vec::new(), 100)),
            proxy: None,
            cf: None,
            config: Arc::new(config),
        }
    }
}
