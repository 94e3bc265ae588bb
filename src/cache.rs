use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

pub const MAILING_LIST: &str = "mailing_list";
pub const MESSAGE_LIST: &str = "message_list";
pub const RECIPIENT_LIST: &str = "recipient_list";

/// In-memory cache of rendered list pages keyed by (list kind, viewer scope).
/// Entries are stored as JSON values and expire after the configured TTL.
/// Any write to a kind drops every entry of that kind.
pub struct ListCache {
    entries: Mutex<HashMap<String, (Instant, serde_json::Value)>>,
}

impl ListCache {
    pub fn new() -> Self {
        ListCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn full_key(kind: &str, scope: &str) -> String {
        format!("{}:{}", kind, scope)
    }

    /// Return the cached value for `kind`/`scope` if it is younger than `ttl`,
    /// otherwise run `load`, store its result and return it.
    /// A disabled cache always loads and never stores.
    pub fn get_or_load<T, F>(&self, enabled: bool, ttl: Duration, kind: &str, scope: &str, load: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if !enabled {
            return load();
        }
        let key = Self::full_key(kind, scope);
        {
            let map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((stored, value)) = map.get(&key) {
                if stored.elapsed() < ttl {
                    if let Ok(hit) = serde_json::from_value(value.clone()) {
                        return hit;
                    }
                }
            }
        }

        let fresh = load();
        if let Ok(value) = serde_json::to_value(&fresh) {
            let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            map.insert(key, (Instant::now(), value));
        }
        fresh
    }

    /// Drop every entry of a list kind, across all scopes.
    pub fn invalidate(&self, kind: &str) {
        let prefix = format!("{}:", kind);
        let mut map = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        map.retain(|k, _| !k.starts_with(&prefix));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn second_read_is_served_from_cache() {
        let cache = ListCache::new();
        let calls = Cell::new(0);
        let load = || {
            calls.set(calls.get() + 1);
            vec![1, 2, 3]
        };
        let first: Vec<i32> = cache.get_or_load(true, TTL, MAILING_LIST, "all", load);
        let second: Vec<i32> = cache.get_or_load(true, TTL, MAILING_LIST, "all", || {
            calls.set(calls.get() + 1);
            vec![9]
        });
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![1, 2, 3]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn scopes_are_separate() {
        let cache = ListCache::new();
        let a: Vec<i32> = cache.get_or_load(true, TTL, MESSAGE_LIST, "owner:1", || vec![1]);
        let b: Vec<i32> = cache.get_or_load(true, TTL, MESSAGE_LIST, "owner:2", || vec![2]);
        assert_eq!(a, vec![1]);
        assert_eq!(b, vec![2]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidate_drops_only_that_kind() {
        let cache = ListCache::new();
        let _: Vec<i32> = cache.get_or_load(true, TTL, RECIPIENT_LIST, "all", || vec![1]);
        let _: Vec<i32> = cache.get_or_load(true, TTL, RECIPIENT_LIST, "owner:3", || vec![1]);
        let _: Vec<i32> = cache.get_or_load(true, TTL, MAILING_LIST, "all", || vec![1]);
        cache.invalidate(RECIPIENT_LIST);
        assert_eq!(cache.len(), 1);

        let reloaded: Vec<i32> = cache.get_or_load(true, TTL, RECIPIENT_LIST, "all", || vec![7]);
        assert_eq!(reloaded, vec![7]);
    }

    #[test]
    fn expired_entries_reload() {
        let cache = ListCache::new();
        let _: Vec<i32> = cache.get_or_load(true, Duration::ZERO, MAILING_LIST, "all", || vec![1]);
        let again: Vec<i32> = cache.get_or_load(true, Duration::ZERO, MAILING_LIST, "all", || vec![2]);
        assert_eq!(again, vec![2]);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ListCache::new();
        let _: Vec<i32> = cache.get_or_load(false, TTL, MAILING_LIST, "all", || vec![1]);
        assert!(cache.is_empty());
    }
}
