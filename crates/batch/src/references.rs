//! Back-references between batch operations
//!
//! A string such as `"$0.id@example.com"` is parsed once, when the batch is
//! planned, into a typed [`InputValue`]. At execution time each
//! [`Reference`] is looked up in the settled result of the operation at its
//! position. A reference that cannot be resolved is left as its literal token
//! text so the remote API rejects the value.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)\.([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)")
        .expect("REFERENCE_REGEX is a valid regex pattern")
});

/// `$<index>.<dotted.path>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub index: usize,
    pub path: Vec<String>,
}

impl Reference {
    pub fn new(index: usize, path: &str) -> Self {
        Self {
            index,
            path: path.split('.').map(str::to_string).collect(),
        }
    }

    /// True for `$n.id`, which resolves to the resource id
    pub fn is_id(&self) -> bool {
        self.path.len() == 1 && self.path[0] == "id"
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{}", self.index, self.path.join("."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// Operation input with references resolved into typed nodes
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Literal(Value),
    /// A string that is exactly one reference
    Ref(Reference),
    /// A string mixing text and references
    Template(Vec<Segment>),
    Array(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

fn parse_str(text: &str) -> InputValue {
    let mut segments = Vec::new();
    let mut last = 0;

    for captures in REFERENCE_REGEX.captures_iter(text) {
        let (Some(whole), Some(index), Some(path)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };
        let Ok(index) = index.as_str().parse::<usize>() else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text(text[last..whole.start()].to_string()));
        }
        segments.push(Segment::Ref(Reference::new(index, path.as_str())));
        last = whole.end();
    }

    if segments.is_empty() {
        return InputValue::Literal(Value::String(text.to_string()));
    }
    if last < text.len() {
        segments.push(Segment::Text(text[last..].to_string()));
    }
    match segments.as_slice() {
        [Segment::Ref(reference)] => InputValue::Ref(reference.clone()),
        _ => InputValue::Template(segments),
    }
}

/// String form used when substituting a resolved value
fn string_form(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).ok(),
    }
}

/// Walk `path` into a result object. A leading `attributes` segment is
/// accepted so both `$0.first_name` and `$0.attributes.first_name` work.
pub fn lookup_path<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    let path = match path {
        [first, rest @ ..] if first == "attributes" && data.get("attributes").is_none() => rest,
        _ => path,
    };
    path.iter().try_fold(data, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Source of resolved reference values
pub trait ReferenceSource {
    /// The string to substitute for `reference`, or `None` if unresolvable
    fn resolve(&self, reference: &Reference) -> Option<String>;
}

impl InputValue {
    /// Parse reference tokens out of every string in `value`
    pub fn parse(value: &Value) -> Self {
        match value {
            Value::String(text) => parse_str(text),
            Value::Array(items) => Self::Array(items.iter().map(Self::parse).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), Self::parse(value)))
                    .collect(),
            ),
            other => Self::Literal(other.clone()),
        }
    }

    /// Build a reference directly, without going through token text
    pub fn reference(index: usize, path: &str) -> Self {
        Self::Ref(Reference::new(index, path))
    }

    pub fn references(&self) -> BTreeSet<Reference> {
        let mut found = BTreeSet::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references(&self, found: &mut BTreeSet<Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Ref(reference) => {
                found.insert(reference.clone());
            }
            Self::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(reference) = segment {
                        found.insert(reference.clone());
                    }
                }
            }
            Self::Array(items) => items.iter().for_each(|i| i.collect_references(found)),
            Self::Object(fields) => fields.iter().for_each(|(_, v)| v.collect_references(found)),
        }
    }

    /// Produce the concrete payload, substituting every reference
    pub fn resolve(&self, source: &dyn ReferenceSource) -> Value {
        let substitute = |reference: &Reference| {
            source
                .resolve(reference)
                .unwrap_or_else(|| reference.to_string())
        };

        match self {
            Self::Literal(value) => value.clone(),
            Self::Ref(reference) => Value::String(substitute(reference)),
            Self::Template(segments) => Value::String(
                segments
                    .iter()
                    .map(|segment| match segment {
                        Segment::Text(text) => text.clone(),
                        Segment::Ref(reference) => substitute(reference),
                    })
                    .collect(),
            ),
            Self::Array(items) => Value::Array(items.iter().map(|i| i.resolve(source)).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.resolve(source)))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::parse(&value)
    }
}

/// Resolve against a settled operation result: `id` gives the resource id,
/// any other path walks the flattened result data.
pub fn resolve_in_result(
    reference: &Reference,
    id: Option<&str>,
    data: Option<&Value>,
) -> Option<String> {
    if reference.is_id() {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            return Some(id.to_string());
        }
    }
    data.and_then(|data| lookup_path(data, &reference.path))
        .and_then(string_form)
}
