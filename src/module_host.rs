//! Mounting a module export behind an error boundary.
//!
//! A [`ModuleHost`] is one mounted consumer. It waits for the module bundle,
//! pulls the requested export out of the module's container, instantiates it
//! and renders it with the supplied props. Every failure on that path ends up
//! as [`HostView::Error`]; panics inside the module are caught.
//!
//! Rendering is memoized on the module name, the export, the props revision
//! and the props themselves, so a parent that re-renders for unrelated reasons
//! does not remount the module.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::container::ContainerScope;
use crate::error::{panic_message, RuntimeError};
use crate::module_loader::ModuleLoader;

/// Export rendered for dashboard panels.
pub const PANEL_EXPORT: &str = "./Panel";

// ---------------------------------------------------------------------------
// Props
// ---------------------------------------------------------------------------

/// Props paired with a revision that changes only on semantic change.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedProps {
    value: Value,
    revision: u64,
}

impl VersionedProps {
    pub fn new(value: Value) -> Self {
        Self { value, revision: 0 }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replace the props unconditionally, bumping the revision.
    pub fn set(&mut self, value: Value) {
        self.value = value;
        self.revision += 1;
    }

    /// Replace the props only if they differ. Returns whether the revision moved.
    pub fn update(&mut self, value: Value) -> bool {
        if self.value == value {
            return false;
        }
        self.set(value);
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostRequest {
    pub name: String,
    pub module_export: String,
    pub props: VersionedProps,
}

impl HostRequest {
    pub fn new(name: &str, module_export: &str, props: Value) -> Self {
        Self {
            name: name.to_string(),
            module_export: module_export.to_string(),
            props: VersionedProps::new(props),
        }
    }

    fn key(&self) -> HostKey {
        HostKey {
            name: self.name.clone(),
            module_export: self.module_export.clone(),
            revision: self.props.revision(),
            props: self.props.value().clone(),
        }
    }
}

/// Revisions restart at 0 for every freshly built [`VersionedProps`], so the
/// props are part of the key too.
#[derive(Debug, Clone, PartialEq)]
struct HostKey {
    name: String,
    module_export: String,
    revision: u64,
    props: Value,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub title: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&RuntimeError> for HostError {
    fn from(err: &RuntimeError) -> Self {
        Self {
            title: err.title().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostView {
    Loading,
    Rendered(Value),
    Error(HostError),
}

impl HostView {
    pub fn error(err: &RuntimeError) -> Self {
        Self::Error(HostError::from(err))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

pub struct ModuleHost {
    id: uuid::Uuid,
    loader: Arc<ModuleLoader>,
    scope: Arc<ContainerScope>,
    version: String,
    memo: Mutex<Option<(HostKey, HostView)>>,
}

impl ModuleHost {
    pub fn new(loader: Arc<ModuleLoader>, scope: Arc<ContainerScope>, version: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            loader,
            scope,
            version: version.to_string(),
            memo: Mutex::new(None),
        }
    }

    /// Last rendered view, or `Loading` before the first render completes.
    pub fn snapshot(&self) -> HostView {
        self.memo
            .lock()
            .as_ref()
            .map(|(_, view)| view.clone())
            .unwrap_or(HostView::Loading)
    }

    /// Drop the memoized view so the next render starts over. Does not reload
    /// a module whose bundle already settled.
    pub fn remount(&self) {
        tracing::debug!(host = %self.id, "remount");
        self.memo.lock().take();
    }

    pub async fn render(&self, request: &HostRequest) -> HostView {
        let key = request.key();
        let cached = {
            let memo = self.memo.lock();
            memo.as_ref()
                .filter(|(memo_key, _)| *memo_key == key)
                .map(|(_, view)| view.clone())
        };
        if let Some(view) = cached {
            return view;
        }

        let view = self.render_uncached(request).await;
        *self.memo.lock() = Some((key, view.clone()));
        view
    }

    async fn render_uncached(&self, request: &HostRequest) -> HostView {
        if request.name.is_empty() || request.module_export.is_empty() {
            let err = RuntimeError::Configuration(
                "module name and module export are required".to_string(),
            );
            return HostView::error(&err);
        }

        if let Err(err) = self.loader.wait_ready(&request.name, &self.version).await {
            return HostView::error(&err);
        }

        let factory = match self.scope.resolve(&request.name, &request.module_export).await {
            Ok(factory) => factory,
            Err(err) => return HostView::error(&err),
        };

        let props = request.props.value();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let component = (*factory)()?;
            component.render(props)
        }));

        let message = match outcome {
            Ok(Ok(rendered)) => {
                tracing::debug!(host = %self.id, module = %request.name, "rendered");
                return HostView::Rendered(rendered);
            }
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(&*panic),
        };
        tracing::warn!(host = %self.id, module = %request.name, "module render failed: {message}");
        HostView::error(&RuntimeError::Render {
            module: request.name.clone(),
            message,
        })
    }
}
