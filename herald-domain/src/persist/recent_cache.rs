//! 最近事件缓存（RecentEventCache）
//!
//! 基于键值存储的有界“最近事件”视图：
//! - `events:recent`：全局最近事件列表，保留最新的 `max_recent` 条；
//! - `events:type:{type}`：按类型的最近事件列表，保留 `max_per_type` 条，带过期时间；
//! - `events:types`：出现过的事件类型集合。
//!
//! 缓存是尽力而为的：辅助写入失败只记录日志，读取时跳过无法解码的条目。
//!
use super::KeyValueStore;
use crate::error::EventResult as Result;
use crate::event::Event;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const RECENT_EVENTS_KEY: &str = "events:recent";
pub const EVENT_TYPES_KEY: &str = "events:types";

pub fn event_type_key(event_type: &str) -> String {
    format!("events:type:{event_type}")
}

/// 缓存配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentCacheConfig {
    pub max_recent: usize,
    pub max_per_type: usize,
    #[serde(with = "crate::serde_ext::duration_ms")]
    pub type_ttl: Duration,
    /// 读取时 `limit` 为 0 所使用的条数
    pub default_limit: usize,
}

impl Default for RecentCacheConfig {
    fn default() -> Self {
        Self {
            max_recent: 1000,
            max_per_type: 500,
            type_ttl: Duration::from_secs(24 * 60 * 60),
            default_limit: 100,
        }
    }
}

#[derive(Clone)]
pub struct RecentEventCache {
    kv: Arc<dyn KeyValueStore>,
    config: RecentCacheConfig,
}

impl RecentEventCache {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: RecentCacheConfig) -> Self {
        Self { kv, config }
    }

    pub fn config(&self) -> &RecentCacheConfig {
        &self.config
    }

    /// 写入最近事件；仅全局列表写入失败时返回错误
    pub async fn store_recent_event(&self, event: &Event) -> Result<()> {
        let encoded = serde_json::to_string(event)?;

        self.kv.list_push(RECENT_EVENTS_KEY, encoded.clone()).await?;
        if let Err(err) = self
            .kv
            .list_trim(RECENT_EVENTS_KEY, 0, self.config.max_recent.saturating_sub(1))
            .await
        {
            warn!(error = %err, "failed to trim recent events list");
        }

        let type_key = event_type_key(event.event_type());
        if let Err(err) = self.kv.list_push(&type_key, encoded).await {
            warn!(event_type = event.event_type(), error = %err, "failed to store event by type");
        }
        if let Err(err) = self
            .kv
            .list_trim(&type_key, 0, self.config.max_per_type.saturating_sub(1))
            .await
        {
            warn!(event_type = event.event_type(), error = %err, "failed to trim event type list");
        }
        if let Err(err) = self.kv.expire(&type_key, self.config.type_ttl).await {
            warn!(event_type = event.event_type(), error = %err, "failed to set event type list expiry");
        }

        if let Err(err) = self.kv.set_add(EVENT_TYPES_KEY, event.event_type()).await {
            warn!(event_type = event.event_type(), error = %err, "failed to record event type");
        }
        Ok(())
    }

    /// 最新的在前；`limit` 为 0 时取默认条数
    pub async fn get_recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        self.read_list(RECENT_EVENTS_KEY, limit).await
    }

    pub async fn get_recent_events_by_type(&self, event_type: &str, limit: usize) -> Result<Vec<Event>> {
        self.read_list(&event_type_key(event_type), limit).await
    }

    /// 出现过的事件类型（排序后）
    pub async fn recent_event_types(&self) -> Result<Vec<String>> {
        let mut types = self.kv.set_members(EVENT_TYPES_KEY).await?;
        types.sort();
        Ok(types)
    }

    pub async fn event_type_count(&self) -> Result<usize> {
        self.kv.set_len(EVENT_TYPES_KEY).await
    }

    async fn read_list(&self, key: &str, limit: usize) -> Result<Vec<Event>> {
        let limit = if limit == 0 {
            self.config.default_limit
        } else {
            limit
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let raw = self.kv.list_range(key, 0, limit - 1).await?;
        let mut events = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<Event>(&entry) {
                Ok(event) => events.push(event),
                Err(err) => warn!(key, error = %err, "failed to decode cached event"),
            }
        }
        Ok(events)
    }
}
