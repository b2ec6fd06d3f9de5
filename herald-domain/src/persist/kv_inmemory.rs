//! 内存键值存储（InMemoryKeyValueStore）
//!
//! 基于 `DashMap` 的单进程实现，过期键在访问时惰性清除。
//!
use super::KeyValueStore;
use crate::error::{EventError, EventResult as Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, Entry>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 移除已过期的键
    fn purge_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, e| e.is_expired(now));
    }

    fn wrong_type(key: &str, found: &Value, expected: &str) -> EventError {
        EventError::cache(format!(
            "wrong type for key {key}: expected {expected}, found {}",
            found.kind()
        ))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.purge_expired(key);
        self.entries.contains_key(key)
    }
}

/// 将闭区间 `[start, stop]` 截断到 `[0, len)`
fn clamp(start: usize, stop: usize, len: usize) -> Option<(usize, usize)> {
    if len == 0 || start >= len || start > stop {
        return None;
    }
    Some((start, stop.min(len - 1)))
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn list_push(&self, key: &str, value: String) -> Result<usize> {
        self.purge_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value);
                Ok(list.len())
            }
            other => Err(Self::wrong_type(key, other, "list")),
        }
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<()> {
        self.purge_expired(key);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(());
        };
        match &mut entry.value {
            Value::List(list) => {
                match clamp(start, stop, list.len()) {
                    Some((s, e)) => {
                        list.truncate(e + 1);
                        list.drain(..s);
                    }
                    None => list.clear(),
                }
                Ok(())
            }
            other => Err(Self::wrong_type(key, other, "list")),
        }
    }

    async fn list_range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        self.purge_expired(key);
        let Some(entry) = self.entries.get(key) else {
            return Ok(Vec::new());
        };
        match &entry.value {
            Value::List(list) => Ok(match clamp(start, stop, list.len()) {
                Some((s, e)) => list.range(s..=e).cloned().collect(),
                None => Vec::new(),
            }),
            other => Err(Self::wrong_type(key, other, "list")),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        self.purge_expired(key);
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            other => Err(Self::wrong_type(key, other, "set")),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.purge_expired(key);
        let Some(entry) = self.entries.get(key) else {
            return Ok(Vec::new());
        };
        match &entry.value {
            Value::Set(set) => Ok(set.iter().cloned().collect()),
            other => Err(Self::wrong_type(key, other, "set")),
        }
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        self.purge_expired(key);
        let Some(entry) = self.entries.get(key) else {
            return Ok(0);
        };
        match &entry.value {
            Value::Set(set) => Ok(set.len()),
            other => Err(Self::wrong_type(key, other, "set")),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.purge_expired(key);
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(false);
        };
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_trim_and_range_behave_like_redis_lists() {
        let kv = InMemoryKeyValueStore::new();
        for i in 0..5 {
            kv.list_push("l", i.to_string()).await.unwrap();
        }
        // 最新写入在头部
        assert_eq!(kv.list_range("l", 0, 1).await.unwrap(), vec!["4", "3"]);

        kv.list_trim("l", 0, 2).await.unwrap();
        assert_eq!(kv.list_range("l", 0, 100).await.unwrap(), vec!["4", "3", "2"]);
        assert!(kv.list_range("l", 5, 9).await.unwrap().is_empty());
        assert!(kv.list_range("missing", 0, 9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sets_track_unique_members() {
        let kv = InMemoryKeyValueStore::new();
        assert!(kv.set_add("s", "a").await.unwrap());
        assert!(!kv.set_add("s", "a").await.unwrap());
        kv.set_add("s", "b").await.unwrap();
        assert_eq!(kv.set_len("s").await.unwrap(), 2);
        assert_eq!(kv.set_members("s").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn wrong_type_is_a_cache_error() {
        let kv = InMemoryKeyValueStore::new();
        kv.set_add("k", "a").await.unwrap();
        let err = kv.list_push("k", "x".into()).await.unwrap_err();
        assert!(matches!(err, EventError::Cache { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_disappear() {
        let kv = InMemoryKeyValueStore::new();
        kv.list_push("l", "a".into()).await.unwrap();
        assert!(kv.expire("l", Duration::from_secs(60)).await.unwrap());
        assert!(!kv.expire("missing", Duration::from_secs(60)).await.unwrap());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(kv.contains_key("l"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!kv.contains_key("l"));
        assert!(kv.list_range("l", 0, 10).await.unwrap().is_empty());
    }
}
