//! JSON:API 1.0 envelope types
//!
//! Request bodies for mutating verbs are wrapped as
//! `{"data": {"type": ..., "attributes": {...}, "relationships": {...}}}`,
//! where the type comes from the endpoint's last resource segment.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// Attribute keys computed by the server and never sent back
pub const READ_ONLY_ATTRIBUTES: &[&str] =
    &["id", "type", "created_at", "updated_at", "links", "meta"];

/// Navigation links on a document or resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
}

/// A single JSON:API resource object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub relationships: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// String attribute, ignoring nulls and non-strings
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Attributes the client is allowed to send back
    pub fn writable_attributes(&self) -> Map<String, Value> {
        writable(self.attributes.clone())
    }

    /// PATCH body that round-trips this resource without server-computed fields
    pub fn to_update_body(&self) -> Value {
        json!({
            "data": {
                "type": self.resource_type,
                "id": self.id,
                "attributes": self.writable_attributes(),
            }
        })
    }

    /// The resource as a plain JSON object (`id`, `type` and attributes merged),
    /// which is the shape batch references walk into.
    pub fn to_flat_json(&self) -> Value {
        let mut flat = self.attributes.clone();
        flat.insert("id".into(), Value::String(self.id.clone()));
        flat.insert("type".into(), Value::String(self.resource_type.clone()));
        if !self.relationships.is_empty() {
            flat.insert(
                "relationships".into(),
                Value::Object(self.relationships.clone()),
            );
        }
        Value::Object(flat)
    }
}

/// Primary data of a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<Resource>),
    One(Box<Resource>),
    #[default]
    Null,
}

/// A successful JSON:API response document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub data: PrimaryData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<Resource>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
}

impl Document {
    /// Parse a response body, treating `null` as an empty document
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Document::deserialize(value)
    }

    /// Single resource, or the first of a collection
    pub fn into_resource(self) -> Option<Resource> {
        match self.data {
            PrimaryData::One(resource) => Some(*resource),
            PrimaryData::Many(resources) => resources.into_iter().next(),
            PrimaryData::Null => None,
        }
    }

    pub fn into_resources(self) -> Vec<Resource> {
        match self.data {
            PrimaryData::One(resource) => vec![*resource],
            PrimaryData::Many(resources) => resources,
            PrimaryData::Null => Vec::new(),
        }
    }

    pub fn next_link(&self) -> Option<&str> {
        self.links.as_ref().and_then(|l| l.next.as_deref())
    }

    pub fn total_count(&self) -> Option<u64> {
        self.meta.get("total_count").and_then(Value::as_u64)
    }
}

/// One entry of a JSON:API `errors` array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonApiErrorObject {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "opt_string_or_number"
    )]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// A failed JSON:API response document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorDocument {
    #[serde(default)]
    pub errors: Vec<JsonApiErrorObject>,
}

/// Extract the `errors` array from an error body, if it has one
pub fn parse_errors(body: &Value) -> Vec<JsonApiErrorObject> {
    ErrorDocument::deserialize(body)
        .map(|doc| doc.errors)
        .unwrap_or_default()
}

fn is_id_segment(segment: &str) -> bool {
    segment.chars().all(|c| c.is_ascii_digit())
        || segment.starts_with('$')
        || segment.starts_with('{')
        || segment.starts_with(':')
}

/// Singularize one lowercase English word the way the API names its types
fn singularize(word: &str) -> String {
    match word {
        "people" => return "person".into(),
        "data" => return "datum".into(),
        "children" => return "child".into(),
        "series" | "news" => return word.into(),
        _ => {}
    }

    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "shes", "ches", "xes", "zes", "uses"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

fn pascal_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Derive the resource type tag from an endpoint path.
///
/// `/people` → `Person`, `/people/1/phone_numbers/2` → `PhoneNumber`.
pub fn resource_type_for_endpoint(endpoint: &str) -> String {
    let path = endpoint.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .split('/')
        .filter(|s| !s.is_empty())
        .rev()
        .find(|s| !is_id_segment(s))
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut words: Vec<&str> = segment.split('_').collect();
    let last = words.pop().unwrap_or_default();
    let singular = singularize(last);
    words.push(&singular);

    pascal_case(&words.join("_"))
}

fn writable(mut attributes: Map<String, Value>) -> Map<String, Value> {
    for key in READ_ONLY_ATTRIBUTES {
        attributes.remove(*key);
    }
    attributes
}

/// Wrap a request body in the JSON:API envelope for `endpoint`.
///
/// Bodies that already carry a top-level `data` key and non-object bodies
/// pass through unchanged. A `relationships` key moves to the relationships
/// section; read-only keys are dropped.
pub fn wrap_body(endpoint: &str, body: Value) -> Value {
    let mut object = match body {
        Value::Object(object) if !object.contains_key("data") => object,
        other => return other,
    };

    let relationships = object.remove("relationships");
    let mut data = Map::new();
    data.insert(
        "type".into(),
        Value::String(resource_type_for_endpoint(endpoint)),
    );
    data.insert("attributes".into(), Value::Object(writable(object)));

    if let Some(Value::Object(relationships)) = relationships {
        if !relationships.is_empty() {
            data.insert("relationships".into(), Value::Object(relationships));
        }
    }

    json!({ "data": Value::Object(data) })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}
