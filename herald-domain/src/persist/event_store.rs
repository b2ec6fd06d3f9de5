//! 事件存储（EventStore）
//!
//! 每条分发的事件都以 `EventRecord` 形式落库，作为审计、失败排查与重放的事实来源。
//! 查询类接口按创建时间倒序返回；`limit`/`offset` 为 0 表示不限制。
//! `get_failed_events` 与 `replay_events` 按创建时间正序返回。
//!
use super::EventRecord;
use crate::error::EventResult as Result;
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 事件存储配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// 失败记录可被再次重放的重试次数上限（不含）
    pub max_retries: u32,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// 写入待处理记录；事件 ID 重复时返回 Duplicate
    async fn store(&self, event: &Event) -> Result<EventRecord>;

    /// 按事件 ID 读取单条记录
    async fn get_event(&self, event_id: &str) -> Result<EventRecord>;

    async fn get_events(
        &self,
        event_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>>;

    async fn get_events_by_user(
        &self,
        user_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>>;

    /// 闭区间 `[start, end]`
    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>>;

    async fn mark_as_processed(&self, event_id: &str) -> Result<()>;

    async fn mark_as_failed(&self, event_id: &str, message: &str) -> Result<()>;

    /// `status = failed AND retry_count < max_retries`，最早的在前
    async fn get_failed_events(&self, limit: usize) -> Result<Vec<EventRecord>>;

    /// 闭区间内的事件，最早的在前；载荷无法反序列化的记录被跳过
    async fn replay_events(
        &self,
        event_type: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>>;
}

#[async_trait]
impl<T> EventStore for Arc<T>
where
    T: EventStore + ?Sized,
{
    async fn store(&self, event: &Event) -> Result<EventRecord> {
        (**self).store(event).await
    }

    async fn get_event(&self, event_id: &str) -> Result<EventRecord> {
        (**self).get_event(event_id).await
    }

    async fn get_events(
        &self,
        event_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        (**self).get_events(event_type, limit, offset).await
    }

    async fn get_events_by_user(
        &self,
        user_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        (**self).get_events_by_user(user_id, limit, offset).await
    }

    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        (**self)
            .get_events_by_time_range(start, end, limit, offset)
            .await
    }

    async fn mark_as_processed(&self, event_id: &str) -> Result<()> {
        (**self).mark_as_processed(event_id).await
    }

    async fn mark_as_failed(&self, event_id: &str, message: &str) -> Result<()> {
        (**self).mark_as_failed(event_id, message).await
    }

    async fn get_failed_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        (**self).get_failed_events(limit).await
    }

    async fn replay_events(
        &self,
        event_type: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        (**self).replay_events(event_type, start, end).await
    }
}

/// 应用 offset/limit（0 表示不限制）
pub(crate) fn paginate<T>(items: impl IntoIterator<Item = T>, limit: usize, offset: usize) -> Vec<T> {
    let iter = items.into_iter().skip(offset);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_means_unbounded() {
        let v: Vec<u32> = (1..=5).collect();
        assert_eq!(paginate(v.clone(), 0, 0), vec![1, 2, 3, 4, 5]);
        assert_eq!(paginate(v.clone(), 2, 1), vec![2, 3]);
        assert_eq!(paginate(v, 0, 4), vec![5]);
    }
}
