//! event: audit and error trail.

use diesel::prelude::*;

use crate::schema::events;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Audit,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Audit => "audit",
            EventType::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLabel {
    Authentication,
    BuildStatus,
    BuildRequest,
    FederalistUsersMembership,
    SiteUser,
    SiteAdd,
    SiteDestroy,
    ProxyEdge,
    Admin,
}

impl EventLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLabel::Authentication => "authentication",
            EventLabel::BuildStatus => "build-status",
            EventLabel::BuildRequest => "build-request",
            EventLabel::FederalistUsersMembership => "federalist-users-membership",
            EventLabel::SiteUser => "site-user",
            EventLabel::SiteAdd => "site-add",
            EventLabel::SiteDestroy => "site-destroy",
            EventLabel::ProxyEdge => "proxy-edge",
            EventLabel::Admin => "admin",
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent {
    pub event_type: String,
    pub label: String,
    pub model: Option<String>,
    pub model_id: Option<i64>,
    pub body: serde_json::Value,
}
