use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::store::{ScoredMember, SharedStore, StoreResult};

/// In-process `SharedStore` backed by `DashMap`s, for tests and for hosts
/// that don't want an external broker. Every key's structure lives behind
/// its own `Mutex`, matching the teacher's `Arc<DashMap<K, V>>` registry
/// idiom rather than a single global lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: DashMap<String, Mutex<VecDeque<Vec<u8>>>>,
    zsets: DashMap<String, Mutex<Vec<(Vec<u8>, f64)>>>,
    hashes: DashMap<String, Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn list_push(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .lock()
            .push_back(value);
        Ok(())
    }

    async fn list_remove(&self, key: &str, value: &[u8]) -> StoreResult<u64> {
        let Some(list) = self.lists.get(key) else {
            return Ok(0);
        };
        let mut list = list.lock();
        if let Some(pos) = list.iter().position(|v| v.as_slice() == value) {
            list.remove(pos);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn sorted_set_add(&self, key: &str, score: f64, member: Vec<u8>) -> StoreResult<()> {
        let set = self.zsets.entry(key.to_string()).or_default();
        let mut set = set.lock();
        set.retain(|(m, _)| m != &member);
        set.push((member, score));
        Ok(())
    }

    async fn sorted_set_pop_min(&self, key: &str) -> StoreResult<Option<ScoredMember>> {
        let Some(set) = self.zsets.get(key) else {
            return Ok(None);
        };
        let mut set = set.lock();
        if set.is_empty() {
            return Ok(None);
        }
        let min_idx = set
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .map(|(idx, _)| idx)
            .expect("non-empty checked above");
        let (member, score) = set.remove(min_idx);
        Ok(Some(ScoredMember { member, score }))
    }

    async fn sorted_set_range_by_score(
        &self,
        key: &str,
        min_score: f64,
        max_score: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let Some(set) = self.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let set = set.lock();
        let mut out: Vec<ScoredMember> = set
            .iter()
            .filter(|(_, score)| *score >= min_score && *score <= max_score)
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        out.sort_by(|a, b| a.score.total_cmp(&b.score));
        Ok(out)
    }

    async fn sorted_set_remove(&self, key: &str, member: &[u8]) -> StoreResult<bool> {
        let Some(set) = self.zsets.get(key) else {
            return Ok(false);
        };
        let mut set = set.lock();
        let before = set.len();
        set.retain(|(m, _)| m.as_slice() != member);
        Ok(set.len() != before)
    }

    async fn hash_set(&self, key: &str, field: &str, value: Vec<u8>) -> StoreResult<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .lock()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let Some(hash) = self.hashes.get(key) else {
            return Ok(None);
        };
        Ok(hash.lock().get(field).cloned())
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<bool> {
        let Some(hash) = self.hashes.get(key) else {
            return Ok(false);
        };
        Ok(hash.lock().remove(field).is_some())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let Some(hash) = self.hashes.get(key) else {
            return Ok(Vec::new());
        };
        Ok(hash
            .lock()
            .iter()
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let hash = self.hashes.entry(key.to_string()).or_default();
        let mut hash = hash.lock();
        let entry = hash.entry(field.to_string()).or_insert_with(|| b"0".to_vec());
        let current: i64 = std::str::from_utf8(entry)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let updated = current + delta;
        *entry = updated.to_string().into_bytes();
        Ok(updated)
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = GlobMatcher::new(pattern);
        let mut out = Vec::new();
        out.extend(self.lists.iter().map(|e| e.key().clone()).filter(|k| matcher.matches(k)));
        out.extend(self.zsets.iter().map(|e| e.key().clone()).filter(|k| matcher.matches(k)));
        out.extend(self.hashes.iter().map(|e| e.key().clone()).filter(|k| matcher.matches(k)));
        out.sort();
        out.dedup();
        Ok(out)
    }
}

/// Minimal `*`-only glob matcher, sufficient for the `prefix:kind:type:*`
/// patterns the state validator uses to discover instances.
struct GlobMatcher<'a> {
    parts: Vec<&'a str>,
}

impl<'a> GlobMatcher<'a> {
    fn new(pattern: &'a str) -> Self {
        Self {
            parts: pattern.split('*').collect(),
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        if self.parts.len() == 1 {
            return candidate == self.parts[0];
        }
        let mut rest = candidate;
        for (i, part) in self.parts.iter().enumerate() {
            if i == 0 {
                if !rest.starts_with(part) {
                    return false;
                }
                rest = &rest[part.len()..];
            } else if i == self.parts.len() - 1 {
                return rest.ends_with(part);
            } else {
                match rest.find(part) {
                    Some(idx) => rest = &rest[idx + part.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_push_and_remove() {
        let store = MemoryStore::new();
        store.list_push("k", b"a".to_vec()).await.unwrap();
        store.list_push("k", b"b".to_vec()).await.unwrap();
        assert_eq!(store.list_remove("k", b"a").await.unwrap(), 1);
        assert_eq!(store.list_remove("k", b"a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sorted_set_pop_min_orders_by_score() {
        let store = MemoryStore::new();
        store.sorted_set_add("s", 5.0, b"mid".to_vec()).await.unwrap();
        store.sorted_set_add("s", 1.0, b"low".to_vec()).await.unwrap();
        store.sorted_set_add("s", 9.0, b"high".to_vec()).await.unwrap();

        let popped = store.sorted_set_pop_min("s").await.unwrap().unwrap();
        assert_eq!(popped.member, b"low");
        assert_eq!(popped.score, 1.0);
    }

    #[tokio::test]
    async fn hash_incr_creates_and_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_incr("m", "errors", 1).await.unwrap(), 1);
        assert_eq!(store.hash_incr("m", "errors", 2).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn scan_keys_matches_glob() {
        let store = MemoryStore::new();
        store.hash_set("ao:reserved:wba:default", "f", b"v".to_vec()).await.unwrap();
        store.hash_set("ao:reserved:wba:shard1", "f", b"v".to_vec()).await.unwrap();
        store.hash_set("ao:reserved:other:default", "f", b"v".to_vec()).await.unwrap();

        let mut keys = store.scan_keys("ao:reserved:wba:*").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["ao:reserved:wba:default".to_string(), "ao:reserved:wba:shard1".to_string()]
        );
    }
}
