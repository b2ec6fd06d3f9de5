//! 内存事件存储（InMemoryEventStore）
//!
//! 用于测试与单进程场景，语义与关系型实现保持一致。
//!
use super::event_store::paginate;
use super::{EventRecord, EventStatus, EventStore, EventStoreConfig};
use crate::error::{EventError, EventResult as Result};
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Default)]
struct State {
    next_id: i64,
    records: HashMap<String, EventRecord>,
}

#[derive(Default)]
pub struct InMemoryEventStore {
    config: EventStoreConfig,
    state: RwLock<State>,
}

impl InMemoryEventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        Self {
            config,
            state: RwLock::new(State::default()),
        }
    }

    /// 直接写入一条已有记录（导入历史或构造测试数据），`id` 重新分配
    pub fn insert_record(&self, mut record: EventRecord) -> Result<EventRecord> {
        let mut state = self.state.write();
        if state.records.contains_key(&record.event_id) {
            return Err(EventError::duplicate(format!(
                "event_id {} already stored",
                record.event_id
            )));
        }
        state.next_id += 1;
        record.id = state.next_id;
        state
            .records
            .insert(record.event_id.clone(), record.clone());
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 按条件筛选并以创建时间倒序排列
    fn newest_first(&self, mut pred: impl FnMut(&EventRecord) -> bool) -> Vec<EventRecord> {
        let state = self.state.read();
        let mut out: Vec<EventRecord> = state.records.values().filter(|r| pred(r)).cloned().collect();
        out.sort_by_key(|r| Reverse((r.created_at, r.id)));
        out
    }

    fn oldest_first(&self, mut pred: impl FnMut(&EventRecord) -> bool) -> Vec<EventRecord> {
        let state = self.state.read();
        let mut out: Vec<EventRecord> = state.records.values().filter(|r| pred(r)).cloned().collect();
        out.sort_by_key(|r| (r.created_at, r.id));
        out
    }

    fn update(&self, event_id: &str, f: impl FnOnce(&mut EventRecord) -> Result<()>) -> Result<()> {
        let mut state = self.state.write();
        let record = state
            .records
            .get_mut(event_id)
            .ok_or_else(|| EventError::not_found(format!("event {event_id}")))?;
        f(record)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn store(&self, event: &Event) -> Result<EventRecord> {
        let record = self.insert_record(EventRecord::from_event(event)?)?;
        debug!(
            event_type = %record.event_type,
            event_id = %record.event_id,
            user_id = record.user_id,
            "event stored"
        );
        Ok(record)
    }

    async fn get_event(&self, event_id: &str) -> Result<EventRecord> {
        self.state
            .read()
            .records
            .get(event_id)
            .cloned()
            .ok_or_else(|| EventError::not_found(format!("event {event_id}")))
    }

    async fn get_events(
        &self,
        event_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        Ok(paginate(
            self.newest_first(|r| r.event_type == event_type),
            limit,
            offset,
        ))
    }

    async fn get_events_by_user(
        &self,
        user_id: u64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        Ok(paginate(
            self.newest_first(|r| r.user_id == Some(user_id)),
            limit,
            offset,
        ))
    }

    async fn get_events_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<EventRecord>> {
        Ok(paginate(
            self.newest_first(|r| r.created_at >= start && r.created_at <= end),
            limit,
            offset,
        ))
    }

    async fn mark_as_processed(&self, event_id: &str) -> Result<()> {
        self.update(event_id, |r| r.mark_processed(Utc::now()))
    }

    async fn mark_as_failed(&self, event_id: &str, message: &str) -> Result<()> {
        self.update(event_id, |r| r.mark_failed(message))
    }

    async fn get_failed_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let max_retries = self.config.max_retries;
        Ok(paginate(
            self.oldest_first(|r| r.status == EventStatus::Failed && r.retry_count < max_retries),
            limit,
            0,
        ))
    }

    async fn replay_events(
        &self,
        event_type: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let records = self.oldest_first(|r| {
            r.created_at >= start
                && r.created_at <= end
                && event_type.is_none_or(|t| r.event_type == t)
        });

        let mut events = Vec::with_capacity(records.len());
        for record in records {
            match record.to_event() {
                Ok(event) => events.push(event),
                Err(err) => warn!(
                    event_id = %record.event_id,
                    error = %err,
                    "failed to deserialize event payload for replay"
                ),
            }
        }
        Ok(events)
    }
}
