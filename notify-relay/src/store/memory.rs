//! Process-local [`DurableStore`] implementation.
//!
//! Mirrors the list and expiry semantics of a Redis-style store: expired keys vanish
//! on access, empty lists are deleted and writes of the wrong type are rejected.
//! Expiry is evaluated against the injected [`TimeSource`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{DurableStore, StoreError, StoreResult, ttl_secs};
use crate::time::{SystemTimeSource, TimeSource};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory store, suitable for single-process deployments and tests.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn TimeSource>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_time_source(Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Remaining time to live of a key, `None` if the key is missing or persistent.
    pub fn ttl(&self, key: &str) -> Option<chrono::Duration> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at - now)
    }

    /// Whether the key currently exists.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        entries.contains_key(key)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }

    fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            entries.remove(key);
        }
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::seconds(ttl_secs(ttl) as i64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve an inclusive, possibly negative, index range against a list length.
fn resolve_range(len: usize, start: isize, end: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { start + len } else { start }.max(0);
    let end = if end < 0 { end + len } else { end }.min(len - 1);
    if len == 0 || start > end || start >= len {
        return None;
    }
    Some((start as usize, end as usize))
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check_available()?;
        let expires_at = self.expiry(ttl);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_back(value.to_string());
                Ok(list.len())
            }
            Value::Str(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_range(&self, key: &str, start: isize, end: isize) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(match resolve_range(list.len(), start, end) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_length(&self, key: &str) -> StoreResult<usize> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_remove(&self, key: &str, value: &str, count: isize) -> StoreResult<usize> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);

        let (removed, now_empty) = match entries.get_mut(key) {
            None => return Ok(0),
            Some(Entry {
                value: Value::Str(_),
                ..
            }) => return Err(StoreError::WrongType(key.to_string())),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let limit = if count == 0 {
                    usize::MAX
                } else {
                    count.unsigned_abs()
                };
                let mut removed = 0;
                if count >= 0 {
                    let mut idx = 0;
                    while idx < list.len() && removed < limit {
                        if list[idx] == value {
                            list.remove(idx);
                            removed += 1;
                        } else {
                            idx += 1;
                        }
                    }
                } else {
                    let mut idx = list.len();
                    while idx > 0 && removed < limit {
                        idx -= 1;
                        if list[idx] == value {
                            list.remove(idx);
                            removed += 1;
                        }
                    }
                }
                (removed, list.is_empty())
            }
        };

        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available()?;
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key, now);
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}
