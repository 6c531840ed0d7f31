//! Module readiness on top of the script cache.

use std::sync::Arc;

use serde::Serialize;

use crate::bundle::validate_url;
use crate::error::{Result, RuntimeError};
use crate::script_cache::{ModuleLoadState, ScriptCache, ScriptTicket};

/// Entry file every module bundle serves.
pub const REMOTE_ENTRY: &str = "remoteEntry.js";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModuleStatus {
    pub ready: bool,
    pub failed: bool,
}

impl From<&ModuleLoadState> for ModuleStatus {
    fn from(state: &ModuleLoadState) -> Self {
        match state {
            ModuleLoadState::Ready => Self {
                ready: true,
                failed: false,
            },
            ModuleLoadState::Failed(_) => Self {
                ready: false,
                failed: true,
            },
            ModuleLoadState::Idle | ModuleLoadState::Loading => Self::default(),
        }
    }
}

/// Rejects empty names and anything that could leave the `plugins/` path.
fn validate_module_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RuntimeError::Configuration("module name is empty".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '?', '#']) {
        return Err(RuntimeError::Configuration(format!(
            "module name \"{name}\" is not a valid path segment"
        )));
    }
    Ok(())
}

/// `{base}/plugins/{name}/remoteEntry.js?version={version}`.
///
/// The version only busts HTTP caches; it is not part of the module identity.
pub fn module_url(base: &str, name: &str, version: &str) -> Result<String> {
    validate_module_name(name)?;
    let mut base = validate_url(base).map_err(RuntimeError::Configuration)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base
        .join(&format!("plugins/{name}/{REMOTE_ENTRY}"))
        .map_err(|e| RuntimeError::Configuration(format!("Invalid module URL: {e}")))?;
    if !version.is_empty() {
        url.query_pairs_mut().append_pair("version", version);
    }
    Ok(url.to_string())
}

pub struct ModuleLoader {
    cache: Arc<ScriptCache>,
    base_url: String,
}

impl ModuleLoader {
    pub fn new(cache: Arc<ScriptCache>, base_url: &str) -> Self {
        Self {
            cache,
            base_url: base_url.to_string(),
        }
    }

    pub fn url_for(&self, name: &str, version: &str) -> Result<String> {
        module_url(&self.base_url, name, version)
    }

    /// Start or join the load for `name`.
    pub fn request(&self, name: &str, version: &str) -> Result<ScriptTicket> {
        let url = self.url_for(name, version)?;
        Ok(self.cache.acquire(name, &url))
    }

    /// Non-blocking readiness snapshot; triggers the load on first use.
    pub fn module_status(&self, name: &str, version: &str) -> Result<ModuleStatus> {
        let ticket = self.request(name, version)?;
        Ok(ModuleStatus::from(&ticket.state()))
    }

    /// Resolve once the module is ready, or with the load error.
    pub async fn wait_ready(&self, name: &str, version: &str) -> Result<()> {
        let mut ticket = self.request(name, version)?;
        ticket.settled().await
    }

    pub fn state(&self, name: &str) -> ModuleLoadState {
        self.cache.state(name)
    }
}
