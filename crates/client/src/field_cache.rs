//! Field-definition cache
//!
//! Holds one snapshot of the field definitions with an expiry time. The
//! cache is an explicit value owned by the caller; nothing here is global.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pco_sdk_core::Resource;
use std::time::Duration;

pub const DEFAULT_FIELD_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub definitions: Vec<Resource>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheSnapshot {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug)]
pub struct FieldDefinitionCache {
    snapshot: RwLock<Option<CacheSnapshot>>,
    ttl: Duration,
}

impl FieldDefinitionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshot: RwLock::new(None),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.snapshot
            .read()
            .as_ref()
            .is_some_and(|s| s.is_fresh(now))
    }

    /// Cached definitions if still fresh at `now`
    pub fn get(&self, now: DateTime<Utc>) -> Option<Vec<Resource>> {
        self.snapshot
            .read()
            .as_ref()
            .filter(|s| s.is_fresh(now))
            .map(|s| s.definitions.clone())
    }

    /// Replace the snapshot with freshly fetched definitions
    pub fn refresh(&self, definitions: Vec<Resource>, now: DateTime<Utc>) -> CacheSnapshot {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let snapshot = CacheSnapshot {
            definitions,
            fetched_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        *self.snapshot.write() = Some(snapshot.clone());
        snapshot
    }

    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }

    pub fn snapshot(&self) -> Option<CacheSnapshot> {
        self.snapshot.read().clone()
    }
}

impl Default for FieldDefinitionCache {
    fn default() -> Self {
        Self::new(DEFAULT_FIELD_CACHE_TTL)
    }
}
