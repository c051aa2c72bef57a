//! HTTP client for a fleetconf node's config API

use crate::common::{Error, Result};
use crate::coordinator::fleet::AppliedReport;
use crate::coordinator::http::{OpResult, API_PREFIX};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct ConfigClient {
    base_url: String,
    http: reqwest::Client,
}

impl ConfigClient {
    pub fn new(node_url: &str) -> Self {
        Self {
            base_url: format!("{}{}", node_url.trim_end_matches('/'), API_PREFIX),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    pub async fn get_state(&self) -> Result<Value> {
        let response = self.http.get(self.url("get-state")).send().await?;
        read_json(response).await
    }

    /// Immediate update. The document's `stamp`, if any, is the CAS precondition.
    pub async fn set(&self, doc: &Value) -> Result<OpResult> {
        let response = self.http.post(self.url("set")).json(doc).send().await?;
        read_json(response).await
    }

    pub async fn set_rolling(&self, doc: &Value) -> Result<OpResult> {
        let response = self
            .http
            .post(self.url("set-rolling"))
            .json(doc)
            .send()
            .await?;
        read_json(response).await
    }

    pub async fn rollback(&self) -> Result<OpResult> {
        let response = self.http.post(self.url("rollback-rolling")).send().await?;
        read_json(response).await
    }

    pub async fn force_commit(&self) -> Result<OpResult> {
        let response = self
            .http
            .post(self.url("force-commit-rolling"))
            .send()
            .await?;
        read_json(response).await
    }

    /// Report that this node now runs the config with `fingerprint`
    pub async fn acknowledge(&self, fingerprint: &str) -> Result<OpResult> {
        let report = AppliedReport {
            fingerprint: Some(fingerprint.to_string()),
        };
        let response = self
            .http
            .post(self.url("applied"))
            .json(&report)
            .send()
            .await?;
        read_json(response).await
    }
}

/// Decode a success body, or turn the node's error reply into an error
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<OpResult>(&text)
        .map(|r| r.message)
        .unwrap_or(text);
    Err(Error::Http(format!("{}: {}", status, message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = ConfigClient::new("http://zk-a:8080/");
        assert_eq!(
            client.url("get-state"),
            "http://zk-a:8080/fleetconf/v1/config/get-state"
        );
    }
}
