//! Placeholder substitution for dashboard templates.
//!
//! Two modes share one split/restore algorithm:
//!
//! * variables: `{% name %}` is replaced by the current value of the dashboard
//!   variable `name`, or by the active time window for `__timeStart` and
//!   `__timeEnd`;
//! * paths: `<% path %>` is replaced by the result of a JSONPath query against
//!   a source document.
//!
//! Unknown placeholders are written back between the original delimiters, and
//! an opening delimiter without a matching close is kept verbatim.
//!
//! The `*_value` variants walk a parsed [`Value`] and rewrite every string
//! leaf and object key in place of the serialize/rewrite/reparse round trip.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::jsonpath;
use crate::time_range::TimeRange;
use crate::variables::VariableValue;

pub const VARIABLE_DELIMITERS: (&str, &str) = ("{%", "%}");
pub const PATH_DELIMITERS: (&str, &str) = ("<%", "%>");

pub const TIME_START: &str = "__timeStart";
pub const TIME_END: &str = "__timeEnd";

/// Split `input` on `open`, then each piece on `close`, and replace every
/// complete placeholder with `substitute(trimmed_placeholder)`.
pub fn rewrite(
    input: &str,
    open: &str,
    close: &str,
    mut substitute: impl FnMut(&str) -> Option<String>,
) -> String {
    let mut parts = input.split(open);
    let mut out = String::with_capacity(input.len());
    if let Some(head) = parts.next() {
        out.push_str(head);
    }
    for part in parts {
        let Some((inner, rest)) = part.split_once(close) else {
            out.push_str(open);
            out.push_str(part);
            continue;
        };
        let placeholder = inner.trim();
        match substitute(placeholder) {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str(open);
                out.push(' ');
                out.push_str(placeholder);
                out.push(' ');
                out.push_str(close);
            }
        }
        out.push_str(rest);
    }
    out
}

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// Name to value lookup built from resolved variables and the time window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableScope {
    values: HashMap<String, String>,
}

impl VariableScope {
    pub fn new(variables: &[VariableValue], time: &TimeRange) -> Self {
        let mut values: HashMap<String, String> = variables
            .iter()
            .map(|v| (v.variable.name.clone(), v.value.clone()))
            .collect();
        values.insert(TIME_START.to_string(), time.time_start.to_string());
        values.insert(TIME_END.to_string(), time.time_end.to_string());
        Self { values }
    }

    /// Value for a trimmed placeholder. One leading `.` is ignored, so
    /// `{% .cluster %}` and `{% cluster %}` are the same variable.
    pub fn lookup(&self, placeholder: &str) -> Option<String> {
        let name = placeholder.strip_prefix('.').unwrap_or(placeholder);
        self.values.get(name).cloned()
    }
}

pub fn interpolate(text: &str, variables: &[VariableValue], time: &TimeRange) -> String {
    let scope = VariableScope::new(variables, time);
    interpolate_with(text, &scope)
}

pub fn interpolate_with(text: &str, scope: &VariableScope) -> String {
    let (open, close) = VARIABLE_DELIMITERS;
    rewrite(text, open, close, |placeholder| scope.lookup(placeholder))
}

pub fn interpolate_value(value: &Value, variables: &[VariableValue], time: &TimeRange) -> Value {
    let scope = VariableScope::new(variables, time);
    interpolate_value_with(value, &scope)
}

pub fn interpolate_value_with(value: &Value, scope: &VariableScope) -> Value {
    map_strings(value, &mut |s| interpolate_with(s, scope))
}

// ---------------------------------------------------------------------------
// JSONPath
// ---------------------------------------------------------------------------

/// Text for a path placeholder: a single match is unwrapped (strings without
/// quotes), several matches become a JSON array. No match or an invalid path
/// yields `None`.
fn path_text(document: &Value, path: &str) -> Option<String> {
    let matches = match jsonpath::query(document, path) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::debug!(path, "invalid JSONPath placeholder: {e}");
            return None;
        }
    };
    match matches.as_slice() {
        [] => None,
        [Value::String(s)] => Some(s.clone()),
        [single] => Some(single.to_string()),
        many => Some(Value::Array(many.iter().map(|v| (*v).clone()).collect()).to_string()),
    }
}

pub fn interpolate_json_path(text: &str, document: &Value) -> String {
    let (open, close) = PATH_DELIMITERS;
    rewrite(text, open, close, |path| path_text(document, path))
}

pub fn interpolate_value_json_path(value: &Value, document: &Value) -> Value {
    map_strings(value, &mut |s| interpolate_json_path(s, document))
}

/// Rebuild `value` with `f` applied to every string leaf and object key.
fn map_strings(value: &Value, f: &mut impl FnMut(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| map_strings(item, f)).collect())
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let key = f(key);
                let item = map_strings(item, f);
                out.insert(key, item);
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_range::TimeMode;
    use serde_json::json;

    fn window() -> TimeRange {
        TimeRange {
            time: TimeMode::Custom,
            time_start: 100,
            time_end: 200,
        }
    }

    fn cluster() -> Vec<VariableValue> {
        vec![VariableValue::fixed("cluster", "prod")]
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let inputs = [
            "",
            "plain text",
            r#"{"query":"sum(rate(x[5m]))"}"#,
            "100% done {not a placeholder}",
            "<%= erb %",
        ];
        for input in inputs {
            assert_eq!(interpolate(input, &cluster(), &window()), input);
        }
    }

    #[test]
    fn substitutes_variables_and_time_window() {
        let text = r#"{"c":"{% cluster %}","s":"{% __timeStart %}"}"#;
        let out = interpolate(text, &cluster(), &window());
        assert_eq!(out, r#"{"c":"prod","s":"100"}"#);
        assert_eq!(interpolate("{%__timeEnd%}", &[], &window()), "200");
    }

    #[test]
    fn leading_dot_is_ignored() {
        assert_eq!(interpolate("{% .cluster %}", &cluster(), &window()), "prod");
    }

    #[test]
    fn unknown_placeholder_round_trips() {
        let out = interpolate("{% unknown %}", &cluster(), &window());
        assert_eq!(out, "{% unknown %}");
        assert_eq!(interpolate("a{%unknown%}b", &[], &window()), "a{% unknown %}b");
        assert_eq!(interpolate("{% .unknown %}", &[], &window()), "{% .unknown %}");
        // Stable on its own output.
        assert_eq!(interpolate(&out, &cluster(), &window()), out);
    }

    #[test]
    fn unclosed_open_delimiter_is_kept() {
        let input = "50 {% of {% cluster %} and {% more";
        assert_eq!(interpolate(input, &cluster(), &window()), "50 {% of prod and {% more");
        assert_eq!(interpolate("x {% cluster %} {% y", &cluster(), &window()), "x prod {% y");
    }

    #[test]
    fn duplicate_names_last_wins() {
        let vars = vec![VariableValue::fixed("ns", "a"), VariableValue::fixed("ns", "b")];
        assert_eq!(interpolate("{% ns %}", &vars, &window()), "b");
    }

    #[test]
    fn json_path_substitution() {
        let doc = json!({
            "metadata": {"name": "foo", "labels": {"a": "1", "b": "2"}},
            "spec": {"replicas": 3}
        });
        assert_eq!(interpolate_json_path("id-<% metadata.name %>-end", &doc), "id-foo-end");
        assert_eq!(interpolate_json_path("<% $.spec.replicas %>", &doc), "3");
        assert_eq!(interpolate_json_path("<% $.metadata.labels.* %>", &doc), r#"["1","2"]"#);
        assert_eq!(interpolate_json_path("<% $.status %>", &doc), "<% $.status %>");
        assert_eq!(interpolate_json_path("<%$[oops]%>", &doc), "<% $[oops] %>");
    }

    #[test]
    fn value_visitor_rewrites_leaves_and_keys() {
        let rows = json!([{
            "title": "{% cluster %} overview",
            "panels": [{
                "plugin": {
                    "options": {
                        "{% cluster %}": true,
                        "queries": ["up{cluster=\"{% cluster %}\"}", 42, null],
                        "range": {"start": "{% __timeStart %}"}
                    }
                }
            }]
        }]);
        let out = interpolate_value(&rows, &cluster(), &window());
        assert_eq!(
            out,
            json!([{
                "title": "prod overview",
                "panels": [{
                    "plugin": {
                        "options": {
                            "prod": true,
                            "queries": ["up{cluster=\"prod\"}", 42, null],
                            "range": {"start": "100"}
                        }
                    }
                }]
            }])
        );
    }

    #[test]
    fn value_visitor_is_safe_against_quotes_in_values() {
        let vars = vec![VariableValue::fixed("q", r#"say "hi""#)];
        let out = interpolate_value(&json!({"text": "{% q %}"}), &vars, &window());
        assert_eq!(out, json!({"text": "say \"hi\""}));
    }

    #[test]
    fn value_visitor_json_path() {
        let doc = json!({"metadata": {"namespace": "kobs"}});
        let template = json!({"ns": "<% metadata.namespace %>", "n": 1});
        let out = interpolate_value_json_path(&template, &doc);
        assert_eq!(out, json!({"ns": "kobs", "n": 1}));
    }
}
