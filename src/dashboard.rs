//! Dashboard templates and their resolution into concrete panels.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RuntimeError};
use crate::interpolate::{interpolate, interpolate_value, interpolate_value_json_path};
use crate::time_range::TimeRange;
use crate::variables::{Variable, VariableValue};

/// Identifies a dashboard resource on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardReference {
    #[serde(default)]
    pub satellite: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    /// Display title override.
    #[serde(default)]
    pub title: String,
}

impl DashboardReference {
    /// Same identity as [`DashboardTemplate::key`].
    pub fn key(&self) -> String {
        format!("{}/{}/{}/{}", self.satellite, self.cluster, self.namespace, self.name)
    }
}

/// A dashboard whose rows are still the raw, uninterpolated tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTemplate {
    #[serde(default)]
    pub satellite: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub rows: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelPlugin {
    #[serde(default)]
    pub satellite: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default)]
    pub w: i64,
    #[serde(default)]
    pub h: i64,
    pub plugin: PanelPlugin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_height: bool,
    #[serde(default)]
    pub panels: Vec<Panel>,
}

/// A panel with every placeholder substituted and its satellite settled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPanel {
    pub title: String,
    pub description: String,
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
    pub satellite: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub name: String,
    pub options: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRow {
    pub title: String,
    pub description: String,
    pub auto_height: bool,
    pub panels: Vec<ResolvedPanel>,
}

impl DashboardTemplate {
    /// Stable identity used for per-dashboard caches.
    pub fn key(&self) -> String {
        format!("{}/{}/{}/{}", self.satellite, self.cluster, self.namespace, self.name)
    }

    /// Working copies of the declared variables with nothing resolved yet.
    pub fn initial_variables(&self) -> Vec<VariableValue> {
        self.variables.iter().map(VariableValue::pending).collect()
    }

    /// Substitute variables into the row tree and parse it.
    pub fn resolve_rows(
        &self,
        variables: &[VariableValue],
        time: &TimeRange,
    ) -> Result<Vec<ResolvedRow>> {
        let rows = interpolate_value(&self.rows, variables, time);
        let rows: Vec<Row> = parse_rows(rows)?;
        Ok(self.settle(rows))
    }

    /// Like [`resolve_rows`](Self::resolve_rows) but rewrites the serialized
    /// tree. A value that breaks the JSON text surfaces as an interpolation
    /// error.
    pub fn resolve_rows_text(
        &self,
        variables: &[VariableValue],
        time: &TimeRange,
    ) -> Result<Vec<ResolvedRow>> {
        if self.rows.is_null() {
            return Ok(Vec::new());
        }
        let text = serde_json::to_string(&self.rows)
            .map_err(|e| RuntimeError::Interpolation(format!("Failed to serialize rows: {e}")))?;
        let text = interpolate(&text, variables, time);
        let rows: Vec<Row> = serde_json::from_str(&text).map_err(|e| {
            RuntimeError::Interpolation(format!("Interpolated rows are not valid: {e}"))
        })?;
        Ok(self.settle(rows))
    }

    /// Substitute `<% path %>` placeholders anywhere in the template from
    /// `document` (typically the resource that owns the dashboard).
    pub fn bind_document(&self, document: &Value) -> Result<DashboardTemplate> {
        let raw = serde_json::to_value(self).map_err(|e| {
            RuntimeError::Interpolation(format!("Failed to serialize dashboard: {e}"))
        })?;
        from_interpolated(interpolate_value_json_path(&raw, document))
    }

    fn settle(&self, rows: Vec<Row>) -> Vec<ResolvedRow> {
        rows.into_iter()
            .map(|row| ResolvedRow {
                title: row.title,
                description: row.description,
                auto_height: row.auto_height,
                panels: row
                    .panels
                    .into_iter()
                    .map(|panel| ResolvedPanel {
                        title: panel.title,
                        description: panel.description,
                        x: panel.x,
                        y: panel.y,
                        w: panel.w,
                        h: panel.h,
                        satellite: if panel.plugin.satellite.is_empty() {
                            self.satellite.clone()
                        } else {
                            panel.plugin.satellite
                        },
                        plugin_type: panel.plugin.plugin_type,
                        name: panel.plugin.name,
                        options: panel.plugin.options,
                    })
                    .collect(),
            })
            .collect()
    }
}

fn parse_rows(rows: Value) -> Result<Vec<Row>> {
    if rows.is_null() {
        return Ok(Vec::new());
    }
    from_interpolated(rows)
}

fn from_interpolated<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        RuntimeError::Interpolation(format!("Interpolated dashboard is not valid: {e}"))
    })
}
