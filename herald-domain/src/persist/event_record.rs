//! 事件持久化模型（EventRecord）
//!
//! 事件在持久化层的标准形态，状态机：
//! `pending → processed`、`pending → failed`、`failed → failed`、`failed → processed`；
//! 对已处理记录重复标记处理视为刷新处理时间，其余转换均被拒绝。
//!
use crate::error::{EventError, EventResult};
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Processed,
    Failed,
}

impl EventStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processed" => Ok(EventStatus::Processed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(EventError::validation(format!("unknown event status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// 存储层分配的自增主键
    pub id: i64,
    pub event_type: String,
    /// 事件唯一标识（去重键）
    pub event_id: String,
    pub user_id: Option<u64>,
    /// 序列化后的载荷
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: EventStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl EventRecord {
    /// 由事件构造待处理记录；`id` 由存储层在写入时分配
    pub fn from_event(event: &Event) -> EventResult<Self> {
        Ok(Self {
            id: 0,
            event_type: event.event_type().to_string(),
            event_id: event.event_id().to_string(),
            user_id: event.user_id(),
            payload: serde_json::to_string(event.payload())?,
            created_at: event.timestamp(),
            processed_at: None,
            status: EventStatus::Pending,
            retry_count: 0,
            error_message: None,
        })
    }

    /// 反序列化载荷并还原为事件（保持原事件 ID 与发生时间）
    pub fn to_event(&self) -> EventResult<Event> {
        let payload = serde_json::from_str(&self.payload)?;
        Ok(Event::restore(
            self.event_id.clone(),
            self.event_type.clone(),
            payload,
            self.created_at,
        ))
    }

    pub fn mark_processed(&mut self, at: DateTime<Utc>) -> EventResult<()> {
        // pending / failed / processed（刷新）均可进入 processed
        self.status = EventStatus::Processed;
        self.processed_at = Some(at);
        Ok(())
    }

    /// 标记失败：追加错误信息，重试计数加一
    pub fn mark_failed(&mut self, message: &str) -> EventResult<()> {
        if self.status == EventStatus::Processed {
            return Err(EventError::InvalidTransition {
                event_id: self.event_id.clone(),
                from: self.status.as_str(),
                to: EventStatus::Failed.as_str(),
            });
        }

        self.status = EventStatus::Failed;
        self.retry_count += 1;
        self.error_message = Some(match self.error_message.take() {
            Some(prev) if !prev.is_empty() => format!("{prev}\n{message}"),
            _ => message.to_string(),
        });
        Ok(())
    }
}
