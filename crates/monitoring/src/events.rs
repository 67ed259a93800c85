//! Synchronous lifecycle event bus
//!
//! Listeners run inline on the emitting task, in registration order. A
//! listener that panics is logged and skipped; delivery to the rest
//! continues. Async consumers can additionally `subscribe()` to a
//! broadcast channel carrying every emitted event.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

const BROADCAST_CAPACITY: usize = 256;

/// Kinds of events reported by the SDK
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RequestStart,
    RequestComplete,
    RequestError,
    AuthRefreshSuccess,
    AuthRefreshFailure,
    RateLimitHit,
    RateLimitWait,
    CacheHit,
    CacheMiss,
    CacheInvalidate,
    BatchOperationComplete,
    BatchComplete,
    MatchFound,
    MatchNotFound,
    /// Caller-defined instrumentation
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RequestStart => "request:start",
            Self::RequestComplete => "request:complete",
            Self::RequestError => "request:error",
            Self::AuthRefreshSuccess => "auth:refresh_success",
            Self::AuthRefreshFailure => "auth:refresh_failure",
            Self::RateLimitHit => "rate:limit_hit",
            Self::RateLimitWait => "rate:wait",
            Self::CacheHit => "cache:hit",
            Self::CacheMiss => "cache:miss",
            Self::CacheInvalidate => "cache:invalidate",
            Self::BatchOperationComplete => "batch:operation_complete",
            Self::BatchComplete => "batch:complete",
            Self::MatchFound => "match:found",
            Self::MatchNotFound => "match:not_found",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single emitted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            request_id: None,
            payload: Value::Null,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Handle returned by [`EventEmitter::on`], used to unsubscribe
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Pub-sub bus keyed by [`EventType`]
#[derive(Clone)]
pub struct EventEmitter {
    listeners: Arc<RwLock<HashMap<EventType, Vec<(ListenerId, Listener)>>>>,
    next_id: Arc<AtomicU64>,
    sender: broadcast::Sender<Event>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            sender,
        }
    }

    /// Register a listener for one event type
    pub fn on<F>(&self, event_type: EventType, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, event_type: &EventType, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(registered) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(listener_id, _)| *listener_id != id);
        let removed = registered.len() != before;
        if registered.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    /// Deliver an event to every listener of its type
    pub fn emit(&self, event: Event) {
        // Snapshot so listeners may call on/off without deadlocking.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .get(&event.event_type)
            .map(|registered| registered.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = %event.event_type, "Event listener panicked");
            }
        }

        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event);
        }
    }

    /// Receive every emitted event on an async channel
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self, event_type: &EventType) -> usize {
        self.listeners
            .read()
            .get(event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<String, usize> = self
            .listeners
            .read()
            .iter()
            .map(|(k, v)| (k.to_string(), v.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .finish()
    }
}
