//! Audit and error trail.
//!
//! Recording is best effort: a failed insert is logged, never returned.

use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::event::{EventLabel, EventType, NewEvent};
use crate::schema::events;

/// The row an event is about, e.g. `("Build", 12)`.
pub type EventModel = Option<(&'static str, i64)>;

async fn record(
    conn: &mut AsyncPgConnection,
    event_type: EventType,
    label: EventLabel,
    model: EventModel,
    body: serde_json::Value,
) {
    let event = NewEvent {
        event_type: event_type.as_str().to_string(),
        label: label.as_str().to_string(),
        model: model.map(|(name, _)| name.to_string()),
        model_id: model.map(|(_, id)| id),
        body,
    };
    if let Err(e) = diesel::insert_into(events::table)
        .values(&event)
        .execute(conn)
        .await
    {
        tracing::warn!(label = label.as_str(), "Failed to record event: {e}");
    }
}

pub async fn audit(
    conn: &mut AsyncPgConnection,
    label: EventLabel,
    model: EventModel,
    body: serde_json::Value,
) {
    record(conn, EventType::Audit, label, model, body).await;
}

pub async fn error(
    conn: &mut AsyncPgConnection,
    label: EventLabel,
    model: EventModel,
    body: serde_json::Value,
) {
    tracing::error!(label = label.as_str(), %body, "Error event");
    record(conn, EventType::Error, label, model, body).await;
}
