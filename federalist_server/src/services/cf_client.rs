//! Cloud Foundry API client for per-site S3 buckets and their proxy routes.

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::config::CloudFoundryConfig;

#[derive(Debug, Error)]
pub enum CfError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cloud Foundry API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Cloud Foundry request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl CfError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CfError::NotFound(_))
    }
}

#[derive(Debug, Deserialize)]
struct Metadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct Resource<E> {
    metadata: Metadata,
    entity: E,
}

#[derive(Debug, Deserialize)]
struct ResourceList<E> {
    resources: Vec<Resource<E>>,
}

#[derive(Debug, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct ServiceKeyEntity {
    credentials: BucketCredentials,
}

/// Where a provisioned bucket lives.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BucketCredentials {
    pub bucket: String,
    pub region: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct CfClient {
    http: reqwest::Client,
    config: CloudFoundryConfig,
}

impl CfClient {
    pub fn new(config: CloudFoundryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn token(&self) -> Result<String, CfError> {
        let resp = self
            .http
            .post(&self.config.oauth_token_url)
            .basic_auth("cf", Some(""))
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;
        let resp: TokenResponse = Self::read(resp, "oauth token").await?;
        Ok(resp.access_token)
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, CfError> {
        let token = self.token().await?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.config.api_host.trim_end_matches('/')))
            .bearer_auth(token))
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> Result<T, CfError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CfError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CfError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }

    async fn send<T: DeserializeOwned>(rb: RequestBuilder, what: &str) -> Result<T, CfError> {
        Self::read(rb.send().await?, what).await
    }

    async fn send_empty(rb: RequestBuilder, what: &str) -> Result<(), CfError> {
        let resp = rb.send().await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CfError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(CfError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }

    /// Look up a single resource guid by a `q=<field>:<value>` filter.
    async fn find_guid(&self, path: &str, field: &str, value: &str) -> Result<String, CfError> {
        let rb = self
            .request(Method::GET, path)
            .await?
            .query(&[("q", format!("{field}:{value}"))]);
        let list: ResourceList<Empty> = Self::send(rb, value).await?;
        list.resources
            .into_iter()
            .next()
            .map(|r| r.metadata.guid)
            .ok_or_else(|| CfError::NotFound(value.to_string()))
    }

    /// Create an S3 service instance with a key, and route `<bucket>` to the proxy.
    pub async fn create_site_bucket(&self, service_name: &str) -> Result<BucketCredentials, CfError> {
        let rb = self
            .request(Method::POST, "/v2/service_instances")
            .await?
            .query(&[("accepts_incomplete", "true")])
            .json(&serde_json::json!({
                "name": service_name,
                "service_plan_guid": self.config.s3_service_plan_id,
                "space_guid": self.config.space_guid,
            }));
        let instance: Resource<Empty> = Self::send(rb, service_name).await?;

        let rb = self
            .request(Method::POST, "/v2/service_keys")
            .await?
            .json(&serde_json::json!({
                "name": format!("{service_name}-key"),
                "service_instance_guid": instance.metadata.guid,
            }));
        let key: Resource<ServiceKeyEntity> = Self::send(rb, service_name).await?;
        let credentials = key.entity.credentials;

        let rb = self
            .request(Method::POST, "/v2/routes")
            .await?
            .json(&serde_json::json!({
                "domain_guid": self.config.domain_guid,
                "space_guid": self.config.space_guid,
                "host": credentials.bucket,
            }));
        let route: Resource<Empty> = Self::send(rb, &credentials.bucket).await?;

        let rb = self
            .request(
                Method::PUT,
                &format!(
                    "/v2/routes/{}/apps/{}",
                    route.metadata.guid, self.config.proxy_guid
                ),
            )
            .await?;
        Self::send_empty(rb, &credentials.bucket).await?;

        tracing::info!(service = service_name, bucket = %credentials.bucket, "Site bucket provisioned");
        Ok(credentials)
    }

    pub async fn delete_route(&self, host: &str) -> Result<(), CfError> {
        let guid = self.find_guid("/v2/routes", "host", host).await?;
        let rb = self
            .request(Method::DELETE, &format!("/v2/routes/{guid}"))
            .await?
            .query(&[("async", "true")]);
        Self::send_empty(rb, host).await
    }

    pub async fn delete_service_instance(&self, name: &str) -> Result<(), CfError> {
        let guid = self.find_guid("/v2/service_instances", "name", name).await?;
        let rb = self
            .request(Method::DELETE, &format!("/v2/service_instances/{guid}"))
            .await?
            .query(&[("accepts_incomplete", "true"), ("recursive", "true")]);
        Self::send_empty(rb, name).await
    }

    /// Tear down a site's bucket route and service instance. Pieces already
    /// gone are skipped.
    pub async fn remove_site_bucket(&self, service_name: &str, bucket: &str) -> Result<(), CfError> {
        match self.delete_route(bucket).await {
            Err(e) if e.is_not_found() => {
                tracing::info!(bucket, "Route already removed");
            }
            other => other?,
        }
        match self.delete_service_instance(service_name).await {
            Err(e) if e.is_not_found() => {
                tracing::info!(service = service_name, "Service instance already removed");
                Ok(())
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> CfClient {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": "t" })),
            )
            .mount(server)
            .await;
        CfClient::new(CloudFoundryConfig {
            api_host: server.uri(),
            oauth_token_url: format!("{}/oauth/token", server.uri()),
            username: "deploy".to_string(),
            password: "pw".to_string(),
            space_guid: "space".to_string(),
            domain_guid: "domain".to_string(),
            proxy_guid: "proxy".to_string(),
            s3_service_plan_id: "plan".to_string(),
        })
    }

    fn resource(guid: &str, entity: serde_json::Value) -> serde_json::Value {
        serde_json::json!({ "metadata": { "guid": guid }, "entity": entity })
    }

    #[tokio::test]
    async fn provisions_bucket_and_route() {
        let server = MockServer::start().await;
        let cf = client(&server).await;
        Mock::given(method("POST"))
            .and(path("/v2/service_instances"))
            .respond_with(ResponseTemplate::new(201).set_body_json(resource("si-1", serde_json::json!({}))))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/service_keys"))
            .respond_with(ResponseTemplate::new(201).set_body_json(resource(
                "key-1",
                serde_json::json!({ "credentials": { "bucket": "cg-abc", "region": "us-gov-west-1" } }),
            )))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/routes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(resource("route-1", serde_json::json!({}))))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v2/routes/route-1/apps/proxy"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let creds = cf.create_site_bucket("o-18f-r-site").await.unwrap();
        assert_eq!(
            creds,
            BucketCredentials {
                bucket: "cg-abc".to_string(),
                region: "us-gov-west-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn removal_tolerates_missing_pieces() {
        let server = MockServer::start().await;
        let cf = client(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/routes"))
            .and(query_param("q", "host:cg-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "resources": [] })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/service_instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "resources": [resource("si-1", serde_json::json!({}))]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v2/service_instances/si-1"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        cf.remove_site_bucket("o-18f-r-site", "cg-abc").await.unwrap();
    }

    #[tokio::test]
    async fn api_errors_are_surfaced() {
        let server = MockServer::start().await;
        let cf = client(&server).await;
        Mock::given(method("GET"))
            .and(path("/v2/routes"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = cf.delete_route("cg-abc").await.unwrap_err();
        assert!(matches!(err, CfError::Api { status: 500, .. }));
    }
}
