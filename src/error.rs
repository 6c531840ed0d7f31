//! Error taxonomy shared by every stage of the plugin runtime.
//!
//! Transient failures (network, bundle load, module render, variable
//! producers) are retryable; configuration and interpolation errors are
//! static and only go away when the dashboard definition changes.

use std::fmt;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Catalog, dashboard or bundle fetch failed at the transport or HTTP level.
    Network(String),
    /// A module bundle could not be loaded or linked.
    ModuleLoad { module: String, message: String },
    /// Required identifying fields are missing, malformed or unknown.
    Configuration(String),
    /// Interpolated template output could not be parsed into panel definitions.
    Interpolation(String),
    /// A loaded module failed while resolving its export or rendering.
    Render { module: String, message: String },
    /// A plugin-backed variable producer failed.
    Variable { name: String, message: String },
}

impl RuntimeError {
    /// Whether a user-triggered re-attempt can succeed without changing the
    /// dashboard definition.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::ModuleLoad { .. }
            | Self::Render { .. }
            | Self::Variable { .. } => true,
            Self::Configuration(_) | Self::Interpolation(_) => false,
        }
    }

    /// Short title used by error views.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Network(_) => "Request failed",
            Self::ModuleLoad { .. } => "Failed to load plugin module",
            Self::Configuration(_) => "Invalid configuration",
            Self::Interpolation(_) => "Invalid dashboard definition",
            Self::Render { .. } => "Plugin module failed",
            Self::Variable { .. } => "Failed to resolve variables",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "{msg}"),
            Self::ModuleLoad { module, message } => {
                write!(f, "Module \"{module}\" failed to load: {message}")
            }
            Self::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            Self::Interpolation(msg) => write!(f, "Interpolation error: {msg}"),
            Self::Render { module, message } => {
                write!(f, "Module \"{module}\" failed: {message}")
            }
            Self::Variable { name, message } => {
                write!(f, "Variable \"{name}\" could not be resolved: {message}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<RuntimeError> for String {
    fn from(e: RuntimeError) -> String {
        e.to_string()
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(format!("HTTP request failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(RuntimeError::Network("down".into()).is_retryable());
        assert!(
            RuntimeError::ModuleLoad {
                module: "prometheus".into(),
                message: "404".into()
            }
            .is_retryable()
        );
        assert!(
            RuntimeError::Variable {
                name: "cluster".into(),
                message: "timeout".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn static_errors_are_not_retryable() {
        assert!(!RuntimeError::Configuration("missing name".into()).is_retryable());
        assert!(!RuntimeError::Interpolation("bad json".into()).is_retryable());
    }

    #[test]
    fn display_includes_module_name() {
        let err = RuntimeError::Render {
            module: "klogs".into(),
            message: "export ./Panel not found".into(),
        };
        let text: String = err.into();
        assert!(text.contains("klogs"));
        assert!(text.contains("./Panel"));
    }
}
