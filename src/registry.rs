//! Plugin instance registry: the catalog of configured plugin instances,
//! fetched from the backend once per session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::api::ApiClient;
use crate::error::{Result, RuntimeError};

/// A configured, addressable backend integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInstance {
    #[serde(default)]
    pub id: String,
    pub satellite: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Value,
    /// Options only the UI module reads (e.g. links to external UIs).
    #[serde(default)]
    pub frontend_options: Value,
    #[serde(default)]
    pub updated_at: i64,
}

/// Payload of the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCatalog {
    /// Global UI bundle version, used to bust bundle caches.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub instances: Vec<PluginInstance>,
}

/// Fetch the plugin catalog from `url`.
pub(crate) async fn fetch_catalog_from(
    client: &reqwest::Client,
    url: &str,
) -> Result<PluginCatalog> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RuntimeError::Network(format!("Failed to fetch plugin catalog: {e}")))?;

    if !response.status().is_success() {
        return Err(RuntimeError::Network(format!(
            "Plugin catalog returned HTTP {}",
            response.status()
        )));
    }

    let catalog: PluginCatalog = response
        .json()
        .await
        .map_err(|e| RuntimeError::Network(format!("Failed to parse plugin catalog JSON: {e}")))?;

    tracing::info!(
        instances = catalog.instances.len(),
        version = %catalog.version,
        "plugin catalog loaded"
    );
    Ok(catalog)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginRegistry {
    version: String,
    instances: Vec<PluginInstance>,
}

impl From<PluginCatalog> for PluginRegistry {
    fn from(catalog: PluginCatalog) -> Self {
        Self {
            version: catalog.version,
            instances: catalog.instances,
        }
    }
}

impl PluginRegistry {
    pub fn new(version: &str, instances: Vec<PluginInstance>) -> Self {
        Self {
            version: version.to_string(),
            instances,
        }
    }

    /// Global UI bundle version.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn instances(&self) -> &[PluginInstance] {
        &self.instances
    }

    /// The instance matching all three parts exactly. `None` when nothing or
    /// more than one instance matches; the triple is expected to be unique.
    pub fn get_instance(
        &self,
        satellite: &str,
        plugin_type: &str,
        name: &str,
    ) -> Option<&PluginInstance> {
        let mut matches = self
            .instances
            .iter()
            .filter(|i| i.satellite == satellite && i.plugin_type == plugin_type && i.name == name);
        let first = matches.next()?;
        if matches.next().is_some() {
            tracing::warn!(
                satellite,
                plugin_type,
                name,
                "ambiguous plugin instance, treating as not found"
            );
            return None;
        }
        Some(first)
    }

    /// Instances filtered by satellite and type (exact, skipped when empty)
    /// and by a name substring (skipped when empty).
    pub fn get_instances(
        &self,
        satellite: &str,
        plugin_type: &str,
        name: &str,
    ) -> Vec<&PluginInstance> {
        self.instances
            .iter()
            .filter(|i| satellite.is_empty() || i.satellite == satellite)
            .filter(|i| plugin_type.is_empty() || i.plugin_type == plugin_type)
            .filter(|i| name.is_empty() || i.name.contains(name))
            .collect()
    }

    /// Known satellites, deduplicated and sorted.
    pub fn satellites(&self) -> Vec<String> {
        let mut satellites: Vec<String> =
            self.instances.iter().map(|i| i.satellite.clone()).collect();
        satellites.sort();
        satellites.dedup();
        satellites
    }

    /// Known plugin types, deduplicated and sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.instances.iter().map(|i| i.plugin_type.clone()).collect();
        types.sort();
        types.dedup();
        types
    }
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// Fetch-once holder for the session's registry. A failed fetch is not
/// remembered, so the next call retries.
#[derive(Default)]
pub struct RegistryHandle {
    cell: OnceCell<Arc<PluginRegistry>>,
}

impl RegistryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<PluginRegistry>> {
        self.cell.get().cloned()
    }

    pub async fn get_or_fetch(&self, api: &ApiClient) -> Result<Arc<PluginRegistry>> {
        self.cell
            .get_or_try_init(|| async {
                let catalog = api.fetch_catalog().await?;
                Ok(Arc::new(PluginRegistry::from(catalog)))
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn instance(satellite: &str, plugin_type: &str, name: &str) -> PluginInstance {
        PluginInstance {
            id: format!("/satellite/{satellite}/type/{plugin_type}/name/{name}"),
            satellite: satellite.to_string(),
            plugin_type: plugin_type.to_string(),
            name: name.to_string(),
            description: String::new(),
            options: Value::Null,
            frontend_options: Value::Null,
            updated_at: 0,
        }
    }

    pub(crate) fn sample_registry() -> PluginRegistry {
        PluginRegistry::new(
            "v0.12.0",
            vec![
                instance("dev-de1", "prometheus", "prometheus"),
                instance("dev-de1", "klogs", "klogs"),
                instance("stage-de1", "prometheus", "prometheus"),
                instance("stage-de1", "prometheus", "prometheus-long-term"),
                instance("prod-de1", "prometheus", "prometheus"),
                instance("prod-de1", "sql", "sql"),
            ],
        )
    }

    #[test]
    fn deserialise_catalog() {
        let json = r#"{
            "version": "v0.12.0",
            "instances": [{
                "id": "/satellite/dev-de1/type/prometheus/name/prometheus",
                "satellite": "dev-de1",
                "type": "prometheus",
                "name": "prometheus",
                "description": "Prometheus in dev",
                "options": {"address": "http://prometheus:9090"},
                "frontendOptions": {"address": "https://prometheus.example.com"},
                "updatedAt": 1700000000
            }]
        }"#;

        let catalog: PluginCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.version, "v0.12.0");
        assert_eq!(catalog.instances.len(), 1);
        assert_eq!(catalog.instances[0].plugin_type, "prometheus");
        assert_eq!(catalog.instances[0].updated_at, 1_700_000_000);
    }

    #[test]
    fn deserialise_minimal_instance() {
        let json = r#"{"instances":[{"satellite":"s","type":"t","name":"n"}]}"#;
        let catalog: PluginCatalog = serde_json::from_str(json).unwrap();
        assert_eq!(catalog.version, "");
        assert_eq!(catalog.instances[0].description, "");
        assert!(catalog.instances[0].options.is_null());
    }

    #[test]
    fn get_instance_matches_exact_triple() {
        let registry = sample_registry();
        let found = registry.get_instance("stage-de1", "prometheus", "prometheus").unwrap();
        assert_eq!(found.satellite, "stage-de1");
        assert!(registry.get_instance("stage-de1", "prometheus", "prom").is_none());
        assert!(registry.get_instance("", "prometheus", "prometheus").is_none());
    }

    #[test]
    fn get_instance_treats_duplicates_as_missing() {
        let mut instances = sample_registry().instances;
        instances.push(instance("dev-de1", "klogs", "klogs"));
        let registry = PluginRegistry::new("v1", instances);
        assert!(registry.get_instance("dev-de1", "klogs", "klogs").is_none());
        assert!(registry.get_instance("dev-de1", "prometheus", "prometheus").is_some());
    }

    #[test]
    fn get_instances_with_type_only() {
        let registry = sample_registry();
        let found = registry.get_instances("", "prometheus", "");
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|i| i.plugin_type == "prometheus"));
    }

    #[test]
    fn get_instances_filters_name_by_substring() {
        let registry = sample_registry();
        let found = registry.get_instances("stage-de1", "", "long");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "prometheus-long-term");
        assert_eq!(registry.get_instances("", "", "").len(), 6);
    }

    #[test]
    fn satellites_and_types_are_sorted_and_unique() {
        let registry = sample_registry();
        assert_eq!(registry.satellites(), vec!["dev-de1", "prod-de1", "stage-de1"]);
        assert_eq!(registry.types(), vec!["klogs", "prometheus", "sql"]);
    }

    #[tokio::test]
    async fn handle_fetches_once_and_retries_after_failure() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/api/plugins")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let api = ApiClient::new(&server.url(), 5).unwrap();
        let handle = RegistryHandle::new();
        let err = handle.get_or_fetch(&api).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(handle.get().is_none());
        failing.assert_async().await;
        failing.remove_async().await;

        let ok = server
            .mock("GET", "/api/plugins")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"version":"v2","instances":[{"satellite":"s","type":"sql","name":"sql"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let first = handle.get_or_fetch(&api).await.unwrap();
        let second = handle.get_or_fetch(&api).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.version(), "v2");
        ok.assert_async().await;
    }
}
