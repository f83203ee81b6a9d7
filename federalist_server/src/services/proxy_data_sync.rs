//! Proxy routing table: maps a site's subdomain to the bucket serving it.

use std::collections::HashMap;
use std::time::Duration;

use aws_sdk_dynamodb::types::{AttributeValue, PutRequest, WriteRequest};
use diesel_async::AsyncPgConnection;

use crate::models::event::EventLabel;
use crate::models::site::Site;
use crate::services::event_service;

/// DynamoDB caps a batch write at 25 items.
pub const BATCH_SIZE: usize = 25;

/// Sends of one batch, counting resends of throttled items.
const BATCH_ATTEMPTS: u32 = 4;
const BATCH_RETRY_DELAY: Duration = Duration::from_millis(500);

pub type Item = HashMap<String, AttributeValue>;

/// Basic auth credentials from the site's `basicAuth` config, when complete.
fn basic_auth(site: &Site) -> Option<(String, String)> {
    let auth = site.config.as_ref()?.get("basicAuth")?;
    let field = |name: &str| {
        auth.get(name)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Some((field("username")?, field("password")?))
}

/// `{id: subdomain, settings: {bucket_name, bucket_region, basicAuth?}}`
pub fn site_item(site: &Site) -> Item {
    let mut settings = HashMap::from([
        (
            "bucket_name".to_string(),
            AttributeValue::S(site.aws_bucket_name.clone()),
        ),
        (
            "bucket_region".to_string(),
            AttributeValue::S(site.aws_bucket_region.clone()),
        ),
    ]);
    if let Some((username, password)) = basic_auth(site) {
        settings.insert(
            "basicAuth".to_string(),
            AttributeValue::M(HashMap::from([
                ("username".to_string(), AttributeValue::S(username)),
                ("password".to_string(), AttributeValue::S(password)),
            ])),
        );
    }

    HashMap::from([
        ("id".to_string(), AttributeValue::S(site.subdomain.clone())),
        ("settings".to_string(), AttributeValue::M(settings)),
    ])
}

pub struct ProxyDataSync {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl ProxyDataSync {
    pub fn new(sdk_config: &aws_config::SdkConfig, table: String) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(sdk_config),
            table,
        }
    }

    pub async fn save_site(&self, site: &Site) -> anyhow::Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(site_item(site)))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("dynamodb put_item: {e}"))?;
        tracing::debug!(site_id = site.id, subdomain = %site.subdomain, "Proxy entry saved");
        Ok(())
    }

    pub async fn save_sites(&self, sites: &[Site]) -> anyhow::Result<()> {
        for chunk in sites.chunks(BATCH_SIZE) {
            let requests = chunk
                .iter()
                .map(|site| {
                    let put = PutRequest::builder().set_item(Some(site_item(site))).build()?;
                    Ok(WriteRequest::builder().put_request(put).build())
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            self.write_batch(requests).await?;
        }
        tracing::info!(count = sites.len(), "Proxy entries saved");
        Ok(())
    }

    /// Send one batch, resending whatever DynamoDB hands back unprocessed.
    async fn write_batch(&self, requests: Vec<WriteRequest>) -> anyhow::Result<()> {
        let mut pending = requests;
        for attempt in 1..=BATCH_ATTEMPTS {
            let out = self
                .client
                .batch_write_item()
                .request_items(&self.table, std::mem::take(&mut pending))
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("dynamodb batch_write_item: {e}"))?;
            pending = unprocessed_writes(&self.table, out.unprocessed_items());
            if pending.is_empty() {
                return Ok(());
            }
            tracing::debug!(attempt, unprocessed = pending.len(), "Proxy batch partially written");
            if attempt < BATCH_ATTEMPTS {
                tokio::time::sleep(BATCH_RETRY_DELAY * attempt).await;
            }
        }
        anyhow::bail!(
            "dynamodb batch_write_item: {} item(s) unprocessed after {BATCH_ATTEMPTS} attempts",
            pending.len()
        )
    }

    pub async fn remove_site(&self, site: &Site) -> anyhow::Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(site.subdomain.clone()))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("dynamodb delete_item: {e}"))?;
        tracing::debug!(site_id = site.id, subdomain = %site.subdomain, "Proxy entry removed");
        Ok(())
    }
}

/// Writes for `table` that a batch response returned unprocessed.
fn unprocessed_writes(
    table: &str,
    unprocessed: Option<&HashMap<String, Vec<WriteRequest>>>,
) -> Vec<WriteRequest> {
    unprocessed
        .and_then(|items| items.get(table))
        .cloned()
        .unwrap_or_default()
}

/// Save the site's proxy entry if a table is configured. A failure is
/// recorded as a `proxy-edge` error event and not returned.
pub async fn sync_site(conn: &mut AsyncPgConnection, proxy: Option<&ProxyDataSync>, site: &Site) {
    let Some(proxy) = proxy else {
        return;
    };
    if let Err(e) = proxy.save_site(site).await {
        event_service::error(
            conn,
            EventLabel::ProxyEdge,
            Some(("Site", site.id)),
            serde_json::json!({ "action": "save", "error": e.to_string() }),
        )
        .await;
    }
}

/// Remove the site's proxy entry, recording a failure like [`sync_site`].
pub async fn unsync_site(conn: &mut AsyncPgConnection, proxy: Option<&ProxyDataSync>, site: &Site) {
    let Some(proxy) = proxy else {
        return;
    };
    if let Err(e) = proxy.remove_site(site).await {
        event_service::error(
            conn,
            EventLabel::ProxyEdge,
            Some(("Site", site.id)),
            serde_json::json!({ "action": "remove", "error": e.to_string() }),
        )
        .await;
    }
}
