//! Registering a GitHub repository as a new site.

use serde::Deserialize;

use crate::error::ApiError;
use crate::models::event::EventLabel;
use crate::models::site::{
    generate_s3_service_name, generate_subdomain, validate_fields, validate_subdomain, NewSite,
    Site,
};
use crate::models::user::User;
use crate::models::user_action::ActionKind;
use crate::services::github_service::GitHubOrganization;
use crate::services::{event_service, proxy_data_sync, site_service, user_action_service};
use crate::state::AppState;

pub const SITE_EXISTS: &str = "This site has already been added to Federalist.";
pub const NO_ADMIN_ACCESS: &str = "You do not have admin access to this repository";

const DEFAULT_ENGINE: &str = "static";
const DEFAULT_BRANCH: &str = "master";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSiteParams {
    pub owner: String,
    pub repository: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl CreateSiteParams {
    pub fn normalized(mut self) -> Self {
        self.owner = self.owner.trim().to_lowercase();
        self.repository = self.repository.trim().to_lowercase();
        self
    }

    fn engine(&self) -> &str {
        self.engine.as_deref().unwrap_or(DEFAULT_ENGINE)
    }

    fn default_branch(&self) -> &str {
        self.default_branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }
}

/// A user may register repositories they own or that belong to one of their
/// GitHub organizations.
pub fn owner_allowed(owner: &str, username: &str, orgs: &[GitHubOrganization]) -> bool {
    owner.eq_ignore_ascii_case(username) || orgs.iter().any(|o| o.login.eq_ignore_ascii_case(owner))
}

struct Storage {
    service_name: String,
    bucket: String,
    region: String,
}

async fn provision_storage(state: &AppState, params: &CreateSiteParams) -> Result<Storage, ApiError> {
    match state.cf() {
        Some(cf) => {
            let service_name = generate_s3_service_name(&params.owner, &params.repository);
            let creds = cf.create_site_bucket(&service_name).await?;
            Ok(Storage {
                service_name,
                bucket: creds.bucket,
                region: creds.region,
            })
        }
        None => Ok(Storage {
            service_name: state.config.s3.service_name.clone(),
            bucket: state.config.s3.bucket.clone(),
            region: state.config.s3.region.clone(),
        }),
    }
}

pub async fn create_site(
    state: &AppState,
    user: &User,
    params: CreateSiteParams,
) -> Result<Site, ApiError> {
    let params = params.normalized();
    if params.owner.is_empty() || params.repository.is_empty() {
        return Err(ApiError::bad_request("owner and repository are required"));
    }
    let mut conn = state.conn().await?;

    if site_service::find_by_repo(&mut conn, &params.owner, &params.repository)
        .await?
        .is_some()
    {
        return Err(ApiError::bad_request(SITE_EXISTS));
    }

    let subdomain = generate_subdomain(&params.owner, &params.repository);
    validate_fields(params.engine(), params.default_branch(), None, None, None)?;
    validate_subdomain(&subdomain)?;

    prepare_repository(state, user, &params).await?;

    let storage = provision_storage(state, &params).await?;
    let new_site = NewSite {
        owner: params.owner.clone(),
        repository: params.repository.clone(),
        engine: params.engine().to_string(),
        default_branch: params.default_branch().to_string(),
        build_status: "active".to_string(),
        s3_service_name: storage.service_name,
        aws_bucket_name: storage.bucket,
        aws_bucket_region: storage.region,
        subdomain,
    };
    let site = site_service::create_site(&mut conn, new_site, user.id).await?;

    state
        .intake
        .submit(&site, user.id, &site.default_branch, None)
        .await?;

    proxy_data_sync::sync_site(&mut conn, state.proxy(), &site).await;
    event_service::audit(
        &mut conn,
        EventLabel::SiteAdd,
        Some(("Site", site.id)),
        serde_json::json!({ "userId": user.id, "site": site.full_name() }),
    )
    .await;
    user_action_service::record(&mut conn, ActionKind::Add, user.id, user.id, site.id).await?;

    Ok(site)
}

/// Everything GitHub has to agree to before a site row exists: the repository
/// is there, the user administers it and may register its owner, and the
/// push webhook is installed.
async fn prepare_repository(
    state: &AppState,
    user: &User,
    params: &CreateSiteParams,
) -> Result<(), ApiError> {
    let token = user
        .github_access_token
        .as_deref()
        .ok_or(ApiError::Forbidden)?;
    let repo = state
        .github
        .get_repository(token, &params.owner, &params.repository)
        .await?
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "The repository {}/{} does not exist.",
                params.owner, params.repository
            ))
        })?;
    if !repo.can_admin() {
        return Err(ApiError::bad_request(NO_ADMIN_ACCESS));
    }

    if !params.owner.eq_ignore_ascii_case(&user.username) {
        let orgs = state.github.get_organizations(token).await?;
        if !owner_allowed(&params.owner, &user.username, &orgs) {
            return Err(ApiError::Forbidden);
        }
    }

    state
        .github
        .create_webhook(
            token,
            &params.owner,
            &params.repository,
            &state.config.webhook_endpoint,
            &state.config.webhook_secret,
        )
        .await?;
    Ok(())
}
