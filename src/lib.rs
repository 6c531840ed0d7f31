//! Plugin runtime for satellite dashboards.
//!
//! Discovers plugin instances, loads plugin UI bundles on demand through a
//! process-wide script cache, and renders dashboard templates whose panels are
//! resolved against variables and the active time range.

pub mod api;
pub mod bundle;
pub mod config;
pub mod container;
pub mod dashboard;
pub mod error;
pub mod interpolate;
pub mod jsonpath;
pub mod logging;
pub mod module_host;
pub mod module_loader;
pub mod registry;
pub mod renderer;
pub mod script_cache;
pub mod state;
pub mod time_range;
pub mod variables;

pub use error::{Result, RuntimeError};
pub use module_host::{HostError, HostRequest, HostView, ModuleHost, VersionedProps};
pub use registry::{PluginInstance, PluginRegistry};
pub use renderer::{DashboardRenderer, RenderedDashboard};
pub use state::Runtime;
pub use time_range::TimeRange;
pub use variables::{VariableProducer, VariableValue};
