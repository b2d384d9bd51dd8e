//! Short-lived cache for derived views.
//!
//! Entries are advisory: every reader falls back to the store on a miss and
//! every writer that changes covered data removes the affected key before
//! it reports success.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Rows of the known_students directory
    KnownStudents,
    /// Merged roster directory
    RosterIndex,
    Mentors { active_only: bool },
    /// Group sessions and mentor links for one `yyyy-MM-dd` day
    GroupPrefill(String),
    /// Row key last seen for a (date, group) session
    GroupSessionHint { date: String, group: String },
}

impl CacheKey {
    pub fn ttl(&self) -> Duration {
        match self {
            Self::KnownStudents => Duration::from_secs(300),
            Self::RosterIndex => Duration::from_secs(600),
            Self::Mentors { .. } => Duration::from_secs(600),
            Self::GroupPrefill(_) => Duration::from_secs(60),
            Self::GroupSessionHint { .. } => Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct Cache {
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Cached value for `key`; expired or undecodable entries count as misses.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let mut entries = self.entries();
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at <= Instant::now(),
            None => return None,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        let value = entries.get(key)?.value.clone();
        drop(entries);

        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                debug!(?key, error = %err, "dropping undecodable cache entry");
                self.remove(key);
                None
            }
        }
    }

    /// Store `value` under the key's documented TTL.
    pub fn put<T: Serialize>(&self, key: CacheKey, value: &T) {
        let ttl = key.ttl();
        self.put_for(key, value, ttl);
    }

    pub fn put_for<T: Serialize>(&self, key: CacheKey, value: &T, ttl: Duration) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                debug!(?key, error = %err, "value not cacheable");
                return;
            }
        };
        self.entries().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries().remove(key);
    }

    /// Drop every entry whose key satisfies `predicate`.
    pub fn remove_matching(&self, predicate: impl Fn(&CacheKey) -> bool) {
        self.entries().retain(|key, _| !predicate(key));
    }
}
