//! Relational data model.

pub mod build;
pub mod build_log;
pub mod event;
pub mod organization;
pub mod site;
pub mod user;
pub mod user_action;
