//! A small JSONPath evaluator for `<% path %>` placeholders.
//!
//! Supported: optional `$` root, `.name`, `['name']` / `["name"]`, `[n]`
//! (negative counts from the end), `*` and `[*]`, `..name` and `..*`.
//! A path may also start with a bare name (`metadata.name`).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    /// Recursive descent; `None` selects every descendant.
    Descendant(Option<String>),
}

/// Evaluate `path` against `doc`, returning matches in document order.
pub fn query<'a>(doc: &'a Value, path: &str) -> Result<Vec<&'a Value>, String> {
    let segments = parse(path)?;
    let mut current = vec![doc];
    for segment in &segments {
        let mut next = Vec::new();
        for value in current {
            apply(segment, value, &mut next);
        }
        current = next;
    }
    Ok(current)
}

fn apply<'a>(segment: &Segment, value: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        Segment::Child(name) => {
            if let Some(child) = value.as_object().and_then(|o| o.get(name)) {
                out.push(child);
            }
        }
        Segment::Index(index) => {
            if let Some(items) = value.as_array() {
                let len = items.len() as i64;
                let i = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&i) {
                    out.push(&items[i as usize]);
                }
            }
        }
        Segment::Wildcard => children(value, out),
        Segment::Descendant(name) => descend(value, name.as_deref(), out),
    }
}

fn children<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => out.extend(map.values()),
        Value::Array(items) => out.extend(items.iter()),
        _ => {}
    }
}

fn descend<'a>(value: &'a Value, name: Option<&str>, out: &mut Vec<&'a Value>) {
    match name {
        Some(name) => {
            if let Some(child) = value.as_object().and_then(|o| o.get(name)) {
                out.push(child);
            }
        }
        None => children(value, out),
    }
    let nested: Box<dyn Iterator<Item = &'a Value>> = match value {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => return,
    };
    for child in nested {
        descend(child, name, out);
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse(path: &str) -> Result<Vec<Segment>, String> {
    let path = path.trim();
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    let chars: Vec<char> = path.chars().collect();
    let mut pos = 0;
    let mut segments = Vec::new();

    if chars[0] == '$' {
        pos = 1;
    } else if chars[0] != '.' && chars[0] != '[' {
        // Bare leading name.
        let (name, end) = read_name(&chars, pos);
        segments.push(name_segment(name));
        pos = end;
    }

    while pos < chars.len() {
        match chars[pos] {
            '.' if chars.get(pos + 1) == Some(&'.') => {
                pos += 2;
                if chars.get(pos) == Some(&'[') {
                    let (segment, end) = read_bracket(&chars, pos)?;
                    segments.push(match segment {
                        Segment::Child(name) => Segment::Descendant(Some(name)),
                        Segment::Wildcard => Segment::Descendant(None),
                        Segment::Index(_) | Segment::Descendant(_) => {
                            return Err(format!("index after '..' at {pos}"));
                        }
                    });
                    pos = end;
                } else {
                    let (name, end) = read_name(&chars, pos);
                    if name.is_empty() {
                        return Err(format!("expected a name after '..' at {pos}"));
                    }
                    segments.push(if name == "*" {
                        Segment::Descendant(None)
                    } else {
                        Segment::Descendant(Some(name))
                    });
                    pos = end;
                }
            }
            '.' => {
                let (name, end) = read_name(&chars, pos + 1);
                if name.is_empty() {
                    return Err(format!("expected a name after '.' at {pos}"));
                }
                segments.push(name_segment(name));
                pos = end;
            }
            '[' => {
                let (segment, end) = read_bracket(&chars, pos)?;
                segments.push(segment);
                pos = end;
            }
            c => return Err(format!("unexpected '{c}' at {pos}")),
        }
    }
    Ok(segments)
}

fn name_segment(name: String) -> Segment {
    if name == "*" {
        Segment::Wildcard
    } else {
        Segment::Child(name)
    }
}

/// Read a dotted name up to the next `.` or `[`.
fn read_name(chars: &[char], start: usize) -> (String, usize) {
    let mut end = start;
    while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
        end += 1;
    }
    (chars[start..end].iter().collect::<String>().trim().to_string(), end)
}

/// Read `[...]` starting at the opening bracket.
fn read_bracket(chars: &[char], start: usize) -> Result<(Segment, usize), String> {
    let mut pos = start + 1;
    let quote = match chars.get(pos) {
        Some(&q @ ('\'' | '"')) => Some(q),
        _ => None,
    };

    if let Some(quote) = quote {
        pos += 1;
        let name_start = pos;
        while pos < chars.len() && chars[pos] != quote {
            pos += 1;
        }
        if pos >= chars.len() {
            return Err(format!("unterminated quoted name at {start}"));
        }
        let name: String = chars[name_start..pos].iter().collect();
        if chars.get(pos + 1) != Some(&']') {
            return Err(format!("expected ']' after quoted name at {start}"));
        }
        return Ok((Segment::Child(name), pos + 2));
    }

    let inner_start = pos;
    while pos < chars.len() && chars[pos] != ']' {
        pos += 1;
    }
    if pos >= chars.len() {
        return Err(format!("unterminated '[' at {start}"));
    }
    let inner: String = chars[inner_start..pos].iter().collect();
    let inner = inner.trim();
    let segment = if inner == "*" {
        Segment::Wildcard
    } else {
        let index = inner
            .parse::<i64>()
            .map_err(|_| format!("invalid index \"{inner}\" at {start}"))?;
        Segment::Index(index)
    };
    Ok((segment, pos + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "metadata": {"name": "foo", "labels": {"app": "web", "team": "obs"}},
            "spec": {
                "containers": [
                    {"name": "app", "image": "web:1"},
                    {"name": "sidecar", "image": "proxy:2"}
                ]
            }
        })
    }

    #[test]
    fn dotted_paths_with_and_without_root() {
        let doc = doc();
        assert_eq!(query(&doc, "$.metadata.name").unwrap(), vec![&json!("foo")]);
        assert_eq!(query(&doc, "metadata.name").unwrap(), vec![&json!("foo")]);
        assert_eq!(query(&doc, ".metadata.name").unwrap(), vec![&json!("foo")]);
        assert_eq!(query(&doc, "$").unwrap(), vec![&doc]);
    }

    #[test]
    fn bracket_names_and_indices() {
        let doc = doc();
        assert_eq!(query(&doc, "$['metadata'][\"name\"]").unwrap(), vec![&json!("foo")]);
        assert_eq!(query(&doc, "$.spec.containers[1].name").unwrap(), vec![&json!("sidecar")]);
        assert_eq!(query(&doc, "$.spec.containers[-1].image").unwrap(), vec![&json!("proxy:2")]);
        assert!(query(&doc, "$.spec.containers[5]").unwrap().is_empty());
    }

    #[test]
    fn wildcards() {
        let doc = doc();
        let names = query(&doc, "$.spec.containers[*].name").unwrap();
        assert_eq!(names, vec![&json!("app"), &json!("sidecar")]);
        assert_eq!(query(&doc, "$.metadata.labels.*").unwrap().len(), 2);
    }

    #[test]
    fn recursive_descent() {
        let doc = doc();
        let names = query(&doc, "$..name").unwrap();
        assert_eq!(names, vec![&json!("foo"), &json!("app"), &json!("sidecar")]);
        let images = query(&doc, "$..['image']").unwrap();
        assert_eq!(images.len(), 2);
        assert!(query(&doc, "$..*").unwrap().len() > 5);
    }

    #[test]
    fn missing_paths_match_nothing() {
        let doc = doc();
        assert!(query(&doc, "$.status.phase").unwrap().is_empty());
        assert!(query(&doc, "$.metadata.name.first").unwrap().is_empty());
    }

    #[test]
    fn invalid_paths_are_errors() {
        let doc = doc();
        assert!(query(&doc, "").is_err());
        assert!(query(&doc, "$.").is_err());
        assert!(query(&doc, "$[abc]").is_err());
        assert!(query(&doc, "$['unterminated").is_err());
        assert!(query(&doc, "$.spec[0").is_err());
    }
}
