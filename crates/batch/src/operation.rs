//! Batch operation types

use pco_sdk_core::{PcoError, Resource, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::references::InputValue;

/// One caller-supplied operation
#[derive(Debug, Clone)]
pub struct BatchOperation {
    /// Unique within the batch
    pub id: String,
    /// `create_person`, `people.addEmail`, or a bare verb paired with an endpoint
    pub operation_type: String,
    pub endpoint: Option<String>,
    pub data: InputValue,
    /// Operation ids, or positions written as `$index_<n>` or `<n>`
    pub dependencies: Vec<String>,
}

#[derive(Deserialize)]
struct RawOperation {
    id: String,
    #[serde(rename = "type")]
    operation_type: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl BatchOperation {
    pub fn new(id: impl Into<String>, operation_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation_type: operation_type.into(),
            endpoint: None,
            data: InputValue::Literal(Value::Object(Default::default())),
            dependencies: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the input payload; `$<n>.<path>` tokens become references
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = InputValue::parse(&data);
        self
    }

    pub fn with_input(mut self, input: InputValue) -> Self {
        self.data = input;
        self
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Parse `{id, type, endpoint?, data?, dependencies?}`
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: RawOperation = serde_json::from_value(value.clone())?;
        Ok(Self {
            id: raw.id,
            operation_type: raw.operation_type,
            endpoint: raw.endpoint,
            data: InputValue::parse(&raw.data),
            dependencies: raw.dependencies,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Person,
    Email,
    PhoneNumber,
}

impl ResourceKind {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "person" | "people" => Some(Self::Person),
            "email" | "emails" => Some(Self::Email),
            "phone_number" | "phone_numbers" | "phone" | "phones" => Some(Self::PhoneNumber),
            _ => None,
        }
    }

    fn collection(self) -> &'static str {
        match self {
            Self::Person => "people",
            Self::Email => "emails",
            Self::PhoneNumber => "phone_numbers",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Email => "email",
            Self::PhoneNumber => "phone_number",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Create,
    Update,
    Delete,
}

impl Verb {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "create" | "add" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" | "remove" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Typed operation, the key of the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKind {
    pub resource: ResourceKind,
    pub verb: Verb,
}

impl OperationKind {
    pub const fn new(resource: ResourceKind, verb: Verb) -> Self {
        Self { resource, verb }
    }

    pub fn is_create(&self) -> bool {
        self.verb == Verb::Create
    }

    /// The operation that reverses a create
    pub fn inverse(&self) -> Option<Self> {
        self.is_create().then(|| Self::new(self.resource, Verb::Delete))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.verb.as_str(), self.resource.as_str())
    }
}

/// Ids carried by a REST endpoint such as `/people/$0.id/emails/7`
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointTarget {
    pub resource: ResourceKind,
    pub person: Option<InputValue>,
    pub child: Option<InputValue>,
}

impl EndpointTarget {
    /// Match one of the known path shapes
    pub fn parse(endpoint: &str) -> Option<Self> {
        let path = endpoint.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let id = |segment: &str| InputValue::parse(&Value::String(segment.to_string()));

        match segments.as_slice() {
            ["people"] => Some(Self {
                resource: ResourceKind::Person,
                person: None,
                child: None,
            }),
            ["people", person] => Some(Self {
                resource: ResourceKind::Person,
                person: Some(id(person)),
                child: None,
            }),
            ["people", person, collection, rest @ ..] if rest.len() <= 1 => {
                let resource = [ResourceKind::Email, ResourceKind::PhoneNumber]
                    .into_iter()
                    .find(|r| r.collection() == *collection)?;
                Some(Self {
                    resource,
                    person: Some(id(person)),
                    child: rest.first().map(|child| id(child)),
                })
            }
            _ => None,
        }
    }

    /// Whether this path shape fits `verb`
    fn accepts(&self, verb: Verb) -> bool {
        let target = match self.resource {
            ResourceKind::Person => &self.person,
            ResourceKind::Email | ResourceKind::PhoneNumber => &self.child,
        };
        match verb {
            Verb::Create => target.is_none(),
            Verb::Update | Verb::Delete => target.is_some(),
        }
    }
}

/// `addPhoneNumber` → `add_phone_number`
fn snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for (i, c) in raw.trim().chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 && !out.ends_with(['_', '.']) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c == '-' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

/// Resolve an operation's `type` and optional endpoint into a typed kind.
///
/// `module.method` identifiers address the `people` module; a bare verb
/// needs an endpoint to name the resource.
pub fn parse_kind(
    operation_type: &str,
    endpoint: Option<&str>,
) -> Result<(OperationKind, Option<EndpointTarget>)> {
    let unsupported = || {
        PcoError::UnsupportedEndpoint(match endpoint {
            Some(endpoint) => format!("{operation_type} {endpoint}"),
            None => operation_type.to_string(),
        })
    };

    let normalized = snake_case(operation_type);
    let (module, method) = match normalized.split_once('.') {
        Some((module, method)) => (Some(module), method),
        None => (None, normalized.as_str()),
    };
    if module.is_some_and(|m| m != "people") {
        return Err(unsupported());
    }

    let (verb_word, resource_word) = method.split_once('_').unwrap_or((method, ""));
    let verb = Verb::from_word(verb_word).ok_or_else(unsupported)?;
    let named = match resource_word {
        "" => None,
        word => Some(ResourceKind::from_word(word).ok_or_else(unsupported)?),
    };

    let target = match endpoint {
        Some(endpoint) => Some(EndpointTarget::parse(endpoint).ok_or_else(unsupported)?),
        None => None,
    };

    let resource = match (named, &target, module) {
        (Some(named), Some(target), _) if named != target.resource => return Err(unsupported()),
        (Some(named), _, _) => named,
        (None, Some(target), _) => target.resource,
        (None, None, Some(_)) => ResourceKind::Person,
        (None, None, None) => return Err(unsupported()),
    };

    if target.as_ref().is_some_and(|t| !t.accepts(verb)) {
        return Err(unsupported());
    }

    Ok((OperationKind::new(resource, verb), target))
}

pub type OperationCallback = Arc<dyn Fn(&BatchResult) + Send + Sync>;
pub type BatchCallback = Arc<dyn Fn(&BatchSummary) + Send + Sync>;

/// Execution options for a batch
#[derive(Clone)]
pub struct BatchOptions {
    /// Keep running siblings after a failure
    pub continue_on_error: bool,
    pub max_concurrency: usize,
    /// Best-effort reversal of completed creates when the batch aborts
    pub enable_rollback: bool,
    pub on_operation_complete: Option<OperationCallback>,
    pub on_batch_complete: Option<BatchCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            max_concurrency: 5,
            enable_rollback: false,
            on_operation_complete: None,
            on_batch_complete: None,
        }
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("continue_on_error", &self.continue_on_error)
            .field("max_concurrency", &self.max_concurrency)
            .field("enable_rollback", &self.enable_rollback)
            .finish_non_exhaustive()
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn enable_rollback(mut self, enable_rollback: bool) -> Self {
        self.enable_rollback = enable_rollback;
        self
    }

    pub fn on_operation_complete(
        mut self,
        callback: impl Fn(&BatchResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_operation_complete = Some(Arc::new(callback));
        self
    }

    pub fn on_batch_complete(
        mut self,
        callback: impl Fn(&BatchSummary) + Send + Sync + 'static,
    ) -> Self {
        self.on_batch_complete = Some(Arc::new(callback));
        self
    }
}

/// Outcome of one operation
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub index: usize,
    pub operation: BatchOperation,
    pub kind: OperationKind,
    pub success: bool,
    /// Resource returned by the call; `None` for deletes
    pub resource: Option<Resource>,
    /// The payload after reference substitution
    pub resolved_input: Value,
    pub error: Option<Arc<PcoError>>,
}

impl BatchResult {
    /// Flattened result data (`id`, `type` and attributes)
    pub fn data(&self) -> Option<Value> {
        self.resource.as_ref().map(Resource::to_flat_json)
    }
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// `successful / total`, 0 for an empty batch
    pub success_rate: f64,
    pub duration_ms: u64,
    /// Ordered by position
    pub results: Vec<BatchResult>,
}

impl BatchSummary {
    pub fn from_results(mut results: Vec<BatchResult>, duration_ms: u64) -> Self {
        results.sort_by_key(|r| r.index);
        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            total,
            successful,
            failed: total - successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            duration_ms,
            results,
        }
    }

    pub fn result(&self, operation_id: &str) -> Option<&BatchResult> {
        self.results.iter().find(|r| r.operation.id == operation_id)
    }
}
