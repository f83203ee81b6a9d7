//! Business logic and side-effect adapters.

pub mod authorizer;
pub mod build_log_service;
pub mod build_service;
pub mod cf_client;
pub mod event_service;
pub mod github_service;
pub mod intake;
pub mod object_store;
pub mod organization_service;
pub mod proxy_data_sync;
pub mod queue;
pub mod retry;
pub mod site_creator;
pub mod site_remover;
pub mod site_service;
pub mod user_action_service;
pub mod user_service;
