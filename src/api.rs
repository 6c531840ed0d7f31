//! Backend API client for the plugin catalog and dashboard templates.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::dashboard::{DashboardReference, DashboardTemplate};
use crate::error::{Result, RuntimeError};
use crate::registry::{fetch_catalog_from, PluginCatalog};

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RuntimeError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Underlying HTTP client, shared with the bundle fetcher.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn fetch_catalog(&self) -> Result<PluginCatalog> {
        fetch_catalog_from(&self.client, &self.endpoint("/api/plugins")).await
    }

    /// Fetch the templates behind `references`, in the order the backend returns them.
    pub async fn fetch_dashboards(
        &self,
        references: &[DashboardReference],
    ) -> Result<Vec<DashboardTemplate>> {
        if references.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(self.endpoint("/api/dashboards"))
            .json(references)
            .send()
            .await
            .map_err(|e| RuntimeError::Network(format!("Failed to fetch dashboards: {e}")))?;
        let dashboards: Vec<DashboardTemplate> = decode(response, "dashboards").await?;
        tracing::debug!(
            requested = references.len(),
            received = dashboards.len(),
            "dashboards fetched"
        );
        Ok(dashboards)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = body.trim();
        return Err(RuntimeError::Network(if detail.is_empty() {
            format!("Fetching {what} returned HTTP {status}")
        } else {
            format!("Fetching {what} returned HTTP {status}: {detail}")
        }));
    }
    response
        .json()
        .await
        .map_err(|e| RuntimeError::Network(format!("Failed to parse {what} JSON: {e}")))
}
