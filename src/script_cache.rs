//! Process-wide memoization of module bundle loads.
//!
//! The first `acquire` for a name stores a watch channel in the map and spawns
//! the load; every later caller, concurrent or not, subscribes to the same
//! channel. An attempted name keeps its outcome for the life of the cache.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;

use crate::error::{panic_message, Result, RuntimeError};

/// Fetches and executes one bundle. A successful load must leave the bundle's
/// container registered under `name`.
pub trait ScriptHost: Send + Sync {
    fn inject(&self, name: &str, url: &str) -> BoxFuture<'static, Result<()>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLoadState {
    Idle,
    Loading,
    Ready,
    Failed(RuntimeError),
}

impl ModuleLoadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// A consumer's handle on a (possibly shared) load. Dropping it does not
/// cancel the load.
#[derive(Debug, Clone)]
pub struct ScriptTicket {
    name: String,
    rx: watch::Receiver<ModuleLoadState>,
}

impl ScriptTicket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ModuleLoadState {
        self.rx.borrow().clone()
    }

    /// Wait until the load reaches `Ready` or `Failed`.
    pub async fn settled(&mut self) -> Result<()> {
        let state = match self.rx.wait_for(ModuleLoadState::is_terminal).await {
            Ok(state) => state.clone(),
            // Sender gone without a terminal state: the load task died.
            Err(_) => {
                return Err(RuntimeError::ModuleLoad {
                    module: self.name.clone(),
                    message: "loader task ended before the module settled".to_string(),
                });
            }
        };
        match state {
            ModuleLoadState::Failed(err) => Err(err),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub struct ScriptCache {
    host: Arc<dyn ScriptHost>,
    entries: DashMap<String, watch::Receiver<ModuleLoadState>>,
}

impl ScriptCache {
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self {
            host,
            entries: DashMap::new(),
        }
    }

    /// Join the load for `name`, starting it from `url` if this is the first
    /// request. Must be called inside a tokio runtime.
    pub fn acquire(&self, name: &str, url: &str) -> ScriptTicket {
        let (tx, rx) = match self.entries.entry(name.to_string()) {
            Entry::Occupied(entry) => {
                return ScriptTicket {
                    name: name.to_string(),
                    rx: entry.get().clone(),
                };
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(ModuleLoadState::Loading);
                entry.insert(rx.clone());
                (tx, rx)
            }
        };

        tracing::debug!(module = name, url, "injecting module bundle");
        let load = self.host.inject(name, url);
        let module = name.to_string();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(load).catch_unwind().await;
            let state = match outcome {
                Ok(Ok(())) => {
                    tracing::info!(module = %module, "module bundle ready");
                    ModuleLoadState::Ready
                }
                Ok(Err(err)) => {
                    tracing::warn!(module = %module, "module bundle failed: {err}");
                    ModuleLoadState::Failed(err)
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    tracing::error!(module = %module, "module bundle loader {message}");
                    ModuleLoadState::Failed(RuntimeError::ModuleLoad {
                        module: module.clone(),
                        message: format!("loader {message}"),
                    })
                }
            };
            // The map keeps a receiver alive, so this only fails if the cache is gone.
            let _ = tx.send(state);
        });

        ScriptTicket {
            name: name.to_string(),
            rx,
        }
    }

    /// Current state for `name`; `Idle` if it was never acquired.
    pub fn state(&self, name: &str) -> ModuleLoadState {
        self.entries
            .get(name)
            .map(|rx| rx.borrow().clone())
            .unwrap_or(ModuleLoadState::Idle)
    }

    /// Names acquired so far, sorted.
    pub fn injected(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
