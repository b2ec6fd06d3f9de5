//! 事件模型（Event / EventWrapper）
//!
//! - `Event`：不可变的事件单元，`event_type` 为扁平命名空间字符串（如 `vote.cast`），
//!   作为分发键；`event_id` 在创建时由类型与纳秒级时间戳派生，贯穿重试、持久化与重放；
//! - `EventWrapper`：分发器内部排队的在途单元，记录尝试次数与最近一次错误，从不直接持久化。
//!
use crate::error::EventResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// 载荷中约定的用户标识字段
pub const USER_ID_FIELD: &str = "user_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 事件唯一标识符（类型 + 纳秒时间戳 + 随机后缀）
    event_id: String,
    /// 事件类型，用于分发
    event_type: String,
    /// 事件负载（不透明的结构化值）
    payload: Value,
    /// 事件发生时间
    timestamp: DateTime<Utc>,
}

impl Event {
    /// 以当前时间创建事件
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self::with_timestamp(event_type, payload, Utc::now())
    }

    /// 以指定时间创建事件（常用于导入历史数据或测试）
    pub fn with_timestamp(
        event_type: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            event_id: generate_event_id(&event_type, timestamp),
            event_type,
            payload,
            timestamp,
        }
    }

    /// 将任意可序列化的载荷包装为事件
    pub fn from_payload<P: Serialize>(
        event_type: impl Into<String>,
        payload: &P,
    ) -> EventResult<Self> {
        Ok(Self::new(event_type, serde_json::to_value(payload)?))
    }

    /// 按已知标识还原事件（存储层重建、重放使用）
    pub fn restore(
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            payload,
            timestamp,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 尽力从载荷中提取用户 ID：仅当载荷为对象且含 `user_id`（数字或数字字符串）时返回
    pub fn user_id(&self) -> Option<u64> {
        let raw = self.payload.as_object()?.get(USER_ID_FIELD)?;
        let id = match raw {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.parse::<u64>().ok(),
            _ => None,
        };
        id.filter(|id| *id > 0)
    }
}

/// 生成事件 ID：`{type}_{unix_nanos}_{8 位随机十六进制}`
pub fn generate_event_id(event_type: &str, at: DateTime<Utc>) -> String {
    let nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp().saturating_mul(1_000_000_000));
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{event_type}_{nanos}_{}", &suffix[..8])
}

/// 在途事件包装器（仅存在于分发器队列中）
#[derive(Debug, Clone)]
pub struct EventWrapper {
    event: Arc<Event>,
    attempts: u32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl EventWrapper {
    pub fn new(event: Event) -> Self {
        Self {
            event: Arc::new(event),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    /// 记录一次失败的处理尝试，返回累计尝试次数
    pub fn record_failure(&mut self, reason: impl Into<String>) -> u32 {
        self.attempts += 1;
        self.last_error = Some(reason.into());
        self.attempts
    }

    pub fn mark_processed(&mut self) {
        self.processed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_id_is_derived_from_type_and_unique() {
        let at = Utc::now();
        let a = Event::with_timestamp("vote.cast", json!({}), at);
        let b = Event::with_timestamp("vote.cast", json!({}), at);
        assert!(a.event_id().starts_with("vote.cast_"));
        assert_ne!(a.event_id(), b.event_id());
    }

    #[test]
    fn user_id_is_extracted_best_effort() {
        assert_eq!(Event::new("t", json!({"user_id": 42})).user_id(), Some(42));
        assert_eq!(Event::new("t", json!({"user_id": 7.0})).user_id(), Some(7));
        assert_eq!(Event::new("t", json!({"user_id": "9"})).user_id(), Some(9));
        assert_eq!(Event::new("t", json!({"user_id": "bob"})).user_id(), None);
        assert_eq!(Event::new("t", json!({"user_id": 0})).user_id(), None);
        assert_eq!(Event::new("t", json!([1, 2])).user_id(), None);
        assert_eq!(Event::new("t", json!({"other": 1})).user_id(), None);
    }

    #[test]
    fn wrapper_counts_failures() {
        let mut w = EventWrapper::new(Event::new("t", json!(null)));
        assert_eq!(w.attempts(), 0);
        assert_eq!(w.record_failure("boom"), 1);
        assert_eq!(w.record_failure("again"), 2);
        assert_eq!(w.last_error(), Some("again"));
        assert!(w.processed_at().is_none());
        w.mark_processed();
        assert!(w.processed_at().is_some());
    }
}
