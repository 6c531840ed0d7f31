//! Named module containers and the shared scope they are initialized with.
//!
//! A loaded bundle registers one container under its module name. Before any
//! export is pulled from a container it is initialized exactly once with the
//! host's shared scope; afterwards `get(export)` hands out component factories.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::error::{Result, RuntimeError};

/// Packages the host shares with containers (package name -> version).
pub type SharedScope = HashMap<String, String>;

/// A rendered unit produced by a module export.
pub trait Component: Send + Sync {
    fn render(&self, props: &Value) -> anyhow::Result<Value>;
}

pub type ComponentFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn Component>> + Send + Sync>;

/// The two-call protocol every bundle exposes: init once, then get by path.
pub trait Container: Send + Sync {
    fn init<'a>(&'a self, shared: &'a SharedScope) -> BoxFuture<'a, anyhow::Result<()>>;
    fn get(&self, export: &str) -> anyhow::Result<ComponentFactory>;
}

// ---------------------------------------------------------------------------
// StaticContainer
// ---------------------------------------------------------------------------

/// Container backed by compiled-in factories keyed by export path.
#[derive(Default, Clone)]
pub struct StaticContainer {
    exports: HashMap<String, ComponentFactory>,
    required: SharedScope,
}

impl StaticContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_export(mut self, path: &str, factory: ComponentFactory) -> Self {
        self.exports.insert(path.to_string(), factory);
        self
    }

    /// Require `package` to be present in the shared scope at init time.
    pub fn requires(mut self, package: &str, version: &str) -> Self {
        self.required.insert(package.to_string(), version.to_string());
        self
    }

    pub fn exports(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl Container for StaticContainer {
    fn init<'a>(&'a self, shared: &'a SharedScope) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            for (package, version) in &self.required {
                match shared.get(package) {
                    Some(v) if v == version => {}
                    Some(v) => anyhow::bail!("shared package {package} is {v}, need {version}"),
                    None => anyhow::bail!("shared package {package} is not provided"),
                }
            }
            Ok(())
        })
    }

    fn get(&self, export: &str) -> anyhow::Result<ComponentFactory> {
        self.exports
            .get(export)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("export \"{export}\" not found"))
    }
}

// ---------------------------------------------------------------------------
// ContainerScope
// ---------------------------------------------------------------------------

struct ContainerSlot {
    container: Arc<dyn Container>,
    initialized: OnceCell<()>,
}

/// Registry of containers keyed by module name.
pub struct ContainerScope {
    shared: SharedScope,
    containers: DashMap<String, Arc<ContainerSlot>>,
}

impl ContainerScope {
    pub fn new(shared: SharedScope) -> Self {
        Self {
            shared,
            containers: DashMap::new(),
        }
    }

    /// Register `container` under `name`. The first registration wins;
    /// returns false if `name` was already taken.
    pub fn register(&self, name: &str, container: Arc<dyn Container>) -> bool {
        let mut inserted = false;
        self.containers.entry(name.to_string()).or_insert_with(|| {
            inserted = true;
            Arc::new(ContainerSlot {
                container,
                initialized: OnceCell::new(),
            })
        });
        if !inserted {
            tracing::warn!(module = name, "container already registered, keeping the first");
        }
        inserted
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.contains_key(name)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.containers
            .get(name)
            .is_some_and(|slot| slot.initialized.initialized())
    }

    /// Initialize the container for `name` (once) and fetch `export` from it.
    pub async fn resolve(&self, name: &str, export: &str) -> Result<ComponentFactory> {
        let render_error = |message: String| RuntimeError::Render {
            module: name.to_string(),
            message,
        };

        let slot = self
            .containers
            .get(name)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| render_error("container is not registered".to_string()))?;

        slot.initialized
            .get_or_try_init(|| async {
                tracing::debug!(module = name, "initializing container");
                slot.container.init(&self.shared).await
            })
            .await
            .map_err(|e| render_error(format!("container init failed: {e}")))?;

        slot.container
            .get(export)
            .map_err(|e| render_error(e.to_string()))
    }
}
