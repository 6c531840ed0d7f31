use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::ApiClient;
use crate::bundle::{ContainerProviders, HttpScriptHost};
use crate::config::RuntimeConfig;
use crate::container::ContainerScope;
use crate::dashboard::{DashboardReference, DashboardTemplate};
use crate::error::Result;
use crate::module_loader::ModuleLoader;
use crate::registry::{PluginRegistry, RegistryHandle};
use crate::renderer::DashboardRenderer;
use crate::script_cache::ScriptCache;
use crate::variables::VariableProducer;

/// TTL for fetched dashboard templates (network): 30 seconds
pub(crate) const DASHBOARD_CACHE_TTL: Duration = Duration::from_secs(30);

/// Process-wide wiring: one script cache, one container scope and one plugin
/// registry per runtime.
pub struct Runtime {
    /// Effective configuration, overrides applied
    pub(crate) config: RuntimeConfig,
    pub(crate) api: ApiClient,
    pub(crate) scope: Arc<ContainerScope>,
    pub(crate) cache: Arc<ScriptCache>,
    pub(crate) loader: Arc<ModuleLoader>,
    pub(crate) registry: RegistryHandle,
    /// TTL cache for dashboard templates, keyed by reference
    pub(crate) dashboard_cache: DashMap<String, (DashboardTemplate, Instant)>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig, providers: ContainerProviders) -> Result<Self> {
        let api = ApiClient::new(&config.api_url, config.request_timeout_secs)?;
        let scope = Arc::new(ContainerScope::new(config.shared_scope.clone()));
        let host = HttpScriptHost::new(api.client().clone(), scope.clone(), providers);
        let cache = Arc::new(ScriptCache::new(Arc::new(host)));
        let loader = Arc::new(ModuleLoader::new(cache.clone(), config.bundle_base()));

        tracing::info!(
            api = %config.api_url,
            bundles = %config.bundle_base(),
            "runtime initialised"
        );
        Ok(Self {
            config,
            api,
            scope,
            cache,
            loader,
            registry: RegistryHandle::new(),
            dashboard_cache: DashMap::new(),
        })
    }

    /// Load configuration from `path` (or the default location), install
    /// logging and build the runtime.
    pub fn bootstrap(path: Option<&Path>, providers: ContainerProviders) -> Result<Self> {
        let config = RuntimeConfig::load(path);
        crate::logging::init(config.debug_logging);
        Self::new(config, providers)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn script_cache(&self) -> &Arc<ScriptCache> {
        &self.cache
    }

    pub fn module_loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn container_scope(&self) -> &Arc<ContainerScope> {
        &self.scope
    }

    /// The plugin registry, fetched on first use.
    pub async fn registry(&self) -> Result<Arc<PluginRegistry>> {
        self.registry.get_or_fetch(&self.api).await
    }

    /// Look up a cached value if it exists and hasn't expired.
    pub(crate) fn get_cached<T: Clone>(
        map: &DashMap<String, (T, Instant)>,
        key: &str,
        ttl: Duration,
    ) -> Option<T> {
        map.get(key).and_then(|entry| {
            let (value, stored_at) = entry.value();
            if stored_at.elapsed() < ttl {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    /// Store a value in a TTL cache.
    pub(crate) fn set_cached<T>(
        map: &DashMap<String, (T, Instant)>,
        key: String,
        value: T,
    ) {
        map.insert(key, (value, Instant::now()));
    }

    /// Templates for `references`, in request order. Only references missing
    /// from the cache are fetched; ones the backend does not return are skipped.
    pub async fn dashboards(
        &self,
        references: &[DashboardReference],
    ) -> Result<Vec<DashboardTemplate>> {
        let cache = &self.dashboard_cache;
        let missing: Vec<DashboardReference> = references
            .iter()
            .filter(|r| Self::get_cached(cache, &r.key(), DASHBOARD_CACHE_TTL).is_none())
            .cloned()
            .collect();

        if !missing.is_empty() {
            for template in self.api.fetch_dashboards(&missing).await? {
                Self::set_cached(&self.dashboard_cache, template.key(), template);
            }
        }

        let mut templates = Vec::with_capacity(references.len());
        for reference in references {
            match Self::get_cached(&self.dashboard_cache, &reference.key(), DASHBOARD_CACHE_TTL) {
                Some(mut template) => {
                    if !reference.title.is_empty() {
                        template.title = reference.title.clone();
                    }
                    templates.push(template);
                }
                None => tracing::warn!(
                    dashboard = %reference.key(),
                    "dashboard not returned by backend"
                ),
            }
        }
        Ok(templates)
    }

    /// Drop cached dashboard templates.
    pub fn clear_caches(&self) {
        self.dashboard_cache.clear();
    }

    /// A renderer bound to this runtime's registry and module loader.
    pub async fn renderer(&self, producer: Arc<dyn VariableProducer>) -> Result<DashboardRenderer> {
        let registry = self.registry().await?;
        Ok(DashboardRenderer::new(
            registry,
            producer,
            self.loader.clone(),
            self.scope.clone(),
        ))
    }
}
