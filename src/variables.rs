//! Dashboard variables: declarations, resolved values and the resolver.
//!
//! Variables resolve strictly in declaration order. Each producer sees the
//! values of every variable declared before it, both through the interpolated
//! producer options and through [`VariableRequest::resolved`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::interpolate::{interpolate_value_with, VariableScope};
use crate::registry::{PluginInstance, PluginRegistry};
use crate::time_range::TimeRange;

/// Plugin type and name of the built-in static producer.
pub const STATIC_TYPE: &str = "core";
pub const STATIC_NAME: &str = "static";

/// Upper bound on memoized resolution passes per resolver.
const MAX_CACHED_PASSES: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablePlugin {
    #[serde(default)]
    pub satellite: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

/// A variable as declared by a dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub hide: bool,
    pub plugin: VariablePlugin,
}

impl Variable {
    pub fn is_static(&self) -> bool {
        self.plugin.plugin_type == STATIC_TYPE && self.plugin.name == STATIC_NAME
    }
}

/// A variable with its selectable values and the active one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    #[serde(flatten)]
    pub variable: Variable,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub value: String,
}

impl VariableValue {
    /// A static variable with a single candidate, selected.
    pub fn fixed(name: &str, value: &str) -> Self {
        Self {
            variable: Variable {
                name: name.to_string(),
                label: String::new(),
                hide: false,
                plugin: VariablePlugin {
                    satellite: String::new(),
                    plugin_type: STATIC_TYPE.to_string(),
                    name: STATIC_NAME.to_string(),
                    options: Value::Array(vec![Value::String(value.to_string())]),
                },
            },
            values: vec![value.to_string()],
            value: value.to_string(),
        }
    }

    /// Unresolved working copy of a declaration.
    pub fn pending(variable: &Variable) -> Self {
        Self {
            variable: variable.clone(),
            values: Vec::new(),
            value: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// Everything a plugin-backed producer gets to compute one variable.
#[derive(Debug, Clone, Copy)]
pub struct VariableRequest<'a> {
    pub instance: &'a PluginInstance,
    /// Producer options with earlier variables and the time window substituted.
    pub options: &'a Value,
    /// The variable being resolved, carrying the requested selection.
    pub variable: &'a VariableValue,
    /// Variables already resolved in this pass, in declaration order.
    pub resolved: &'a [VariableValue],
    pub time: &'a TimeRange,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducedValues {
    #[serde(default)]
    pub values: Vec<String>,
    /// Preferred selection; empty leaves the choice to the resolver.
    #[serde(default)]
    pub value: String,
}

/// Resolves variables backed by a plugin instance (e.g. label values from a
/// metrics backend).
pub trait VariableProducer: Send + Sync {
    fn resolve<'a>(
        &'a self,
        request: VariableRequest<'a>,
    ) -> BoxFuture<'a, anyhow::Result<ProducedValues>>;
}

/// The producer's preference wins. A requested selection survives only while
/// it is still a candidate; otherwise the first candidate is taken.
fn select(preferred: &str, requested: &str, values: &[String]) -> String {
    if !preferred.is_empty() {
        return preferred.to_string();
    }
    if values.iter().any(|v| v == requested) {
        return requested.to_string();
    }
    values.first().cloned().unwrap_or_default()
}

fn static_values(name: &str, options: &Value) -> Result<Vec<String>> {
    match options {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        other => Err(RuntimeError::Configuration(format!(
            "static variable \"{name}\" needs a list of values, got {other}"
        ))),
    }
}

/// Resolve `variables` in order. Any failure fails the whole pass.
pub async fn resolve_variables(
    registry: &PluginRegistry,
    producer: &dyn VariableProducer,
    variables: &[VariableValue],
    time: &TimeRange,
    default_satellite: &str,
) -> Result<Vec<VariableValue>> {
    let mut resolved: Vec<VariableValue> = Vec::with_capacity(variables.len());

    for requested in variables {
        let variable = &requested.variable;
        let scope = VariableScope::new(&resolved, time);
        let options = interpolate_value_with(&variable.plugin.options, &scope);

        let (values, preferred) = if variable.is_static() {
            (static_values(&variable.name, &options)?, String::new())
        } else {
            let satellite = if variable.plugin.satellite.is_empty() {
                default_satellite
            } else {
                variable.plugin.satellite.as_str()
            };
            let instance = registry
                .get_instance(satellite, &variable.plugin.plugin_type, &variable.plugin.name)
                .ok_or_else(|| {
                    RuntimeError::Configuration(format!(
                        "variable \"{}\" uses unknown plugin instance {satellite}/{}/{}",
                        variable.name, variable.plugin.plugin_type, variable.plugin.name
                    ))
                })?;

            let request = VariableRequest {
                instance,
                options: &options,
                variable: requested,
                resolved: &resolved,
                time,
            };
            let produced = producer
                .resolve(request)
                .await
                .map_err(|e| RuntimeError::Variable {
                    name: variable.name.clone(),
                    message: format!("{e:#}"),
                })?;
            (produced.values, produced.value)
        };

        let value = select(&preferred, &requested.value, &values);
        tracing::debug!(
            variable = %variable.name,
            candidates = values.len(),
            value = %value,
            "variable resolved"
        );
        resolved.push(VariableValue {
            variable: variable.clone(),
            values,
            value,
        });
    }

    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Resolver with memoization
// ---------------------------------------------------------------------------

struct CachedPass {
    dashboard: String,
    seq: u64,
    values: Vec<VariableValue>,
}

/// Memoizes successful resolution passes by dashboard, requested variables
/// and time window. Failures are never cached.
pub struct VariableResolver {
    producer: Arc<dyn VariableProducer>,
    passes: DashMap<String, CachedPass>,
    seq: AtomicU64,
}

impl VariableResolver {
    pub fn new(producer: Arc<dyn VariableProducer>) -> Self {
        Self {
            producer,
            passes: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Declarations and selections only; candidate lists are output.
    fn key(dashboard: &str, variables: &[VariableValue], time: &TimeRange) -> String {
        let selections: Vec<(&Variable, &str)> = variables
            .iter()
            .map(|v| (&v.variable, v.value.as_str()))
            .collect();
        let selections = serde_json::to_string(&selections).unwrap_or_default();
        format!("{dashboard}\n{selections}\n{}-{}", time.time_start, time.time_end)
    }

    pub async fn resolve(
        &self,
        dashboard: &str,
        registry: &PluginRegistry,
        variables: &[VariableValue],
        time: &TimeRange,
        default_satellite: &str,
    ) -> Result<Vec<VariableValue>> {
        let key = Self::key(dashboard, variables, time);
        if let Some(pass) = self.passes.get(&key) {
            tracing::trace!(dashboard, "variables served from cache");
            return Ok(pass.values.clone());
        }

        let producer = self.producer.as_ref();
        let values =
            resolve_variables(registry, producer, variables, time, default_satellite).await?;

        // Feeding the result back in selects the same values, so the pass is
        // stored under that key too.
        let settled = Self::key(dashboard, &values, time);
        if settled != key {
            self.store(settled, dashboard, &values);
        }
        self.store(key, dashboard, &values);
        Ok(values)
    }

    fn store(&self, key: String, dashboard: &str, values: &[VariableValue]) {
        if !self.passes.contains_key(&key) && self.passes.len() >= MAX_CACHED_PASSES {
            self.evict_oldest();
        }
        self.passes.insert(
            key,
            CachedPass {
                dashboard: dashboard.to_string(),
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                values: values.to_vec(),
            },
        );
    }

    /// Forget every pass of `dashboard`; the next render resolves again.
    pub fn invalidate(&self, dashboard: &str) {
        self.passes.retain(|_, pass| pass.dashboard != dashboard);
        tracing::debug!(dashboard, "variable cache invalidated");
    }

    pub fn cached_passes(&self) -> usize {
        self.passes.len()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .passes
            .iter()
            .min_by_key(|entry| entry.value().seq)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.passes.remove(&key);
        }
    }
}
