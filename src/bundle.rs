//! Fetching and linking module bundles over HTTP.
//!
//! A bundle URL serves a small JSON manifest naming the container it provides,
//! its exports and the bundle version. Linking looks the container up in the
//! table of compiled-in providers and registers it in the [`ContainerScope`],
//! which is what "executing the bundle" amounts to for a native host.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::container::{Container, ContainerScope};
use crate::error::{Result, RuntimeError};
use crate::script_cache::ScriptHost;

/// Maximum manifest size (1 MB).
const MAX_MANIFEST_BYTES: usize = 1024 * 1024;

/// Manifest served at a module's bundle URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    /// Container name the bundle registers; must equal the module name.
    pub container: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub exports: Vec<String>,
}

pub type ContainerProvider =
    Arc<dyn Fn(&BundleManifest) -> anyhow::Result<Arc<dyn Container>> + Send + Sync>;

/// Compiled-in container implementations keyed by container name.
#[derive(Default, Clone)]
pub struct ContainerProviders {
    providers: HashMap<String, ContainerProvider>,
}

impl ContainerProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, container: &str, provider: ContainerProvider) -> Self {
        self.providers.insert(container.to_string(), provider);
        self
    }

    pub fn get(&self, container: &str) -> Option<&ContainerProvider> {
        self.providers.get(container)
    }
}

// ---------------------------------------------------------------------------
// URL validation
// ---------------------------------------------------------------------------

/// Only http:// and https:// bundle URLs are fetched.
pub(crate) fn validate_url(url: &str) -> std::result::Result<url::Url, String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("Invalid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(format!("Scheme \"{scheme}\" is not allowed; use http or https")),
    }
}

// ---------------------------------------------------------------------------
// HttpScriptHost
// ---------------------------------------------------------------------------

pub struct HttpScriptHost {
    client: reqwest::Client,
    scope: Arc<ContainerScope>,
    providers: Arc<ContainerProviders>,
}

impl HttpScriptHost {
    pub fn new(
        client: reqwest::Client,
        scope: Arc<ContainerScope>,
        providers: ContainerProviders,
    ) -> Self {
        Self {
            client,
            scope,
            providers: Arc::new(providers),
        }
    }
}

impl ScriptHost for HttpScriptHost {
    fn inject(&self, name: &str, url: &str) -> BoxFuture<'static, Result<()>> {
        let client = self.client.clone();
        let scope = self.scope.clone();
        let providers = self.providers.clone();
        let name = name.to_string();
        let url = url.to_string();
        Box::pin(async move {
            let load_error = |message: String| RuntimeError::ModuleLoad {
                module: name.clone(),
                message,
            };

            validate_url(&url).map_err(load_error)?;
            let manifest = fetch_manifest(&client, &url).await.map_err(load_error)?;

            if manifest.container != name {
                return Err(load_error(format!(
                    "bundle registers container \"{}\", expected \"{name}\"",
                    manifest.container
                )));
            }
            let provider = providers.get(&manifest.container).ok_or_else(|| {
                load_error("no linkable implementation for this container".to_string())
            })?;
            let container =
                (**provider)(&manifest).map_err(|e| load_error(format!("link failed: {e}")))?;

            scope.register(&name, container);
            tracing::debug!(
                module = %name,
                version = %manifest.version,
                exports = ?manifest.exports,
                "bundle linked"
            );
            Ok(())
        })
    }
}

async fn fetch_manifest(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<BundleManifest, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Failed to fetch bundle: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("Bundle returned HTTP {}", response.status()));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| format!("Failed to read bundle: {e}"))?;

    if body.len() > MAX_MANIFEST_BYTES {
        return Err(format!(
            "Bundle manifest exceeds maximum size ({} bytes > {} bytes)",
            body.len(),
            MAX_MANIFEST_BYTES
        ));
    }

    serde_json::from_slice(&body).map_err(|e| format!("Invalid bundle manifest: {e}"))
}
