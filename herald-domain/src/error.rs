//! 事件子系统统一错误定义
//!
//! 覆盖发布背压、处理器执行、持久化、缓存、校验与取消等最小必要集合，
//! 便于各实现层统一转换为 `EventError`。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventError {
    // --- 发布/背压 ---
    #[error("queue is full: queue={queue}, capacity={capacity}")]
    Capacity {
        queue: &'static str,
        capacity: usize,
    },
    #[error("event dispatcher is shutting down")]
    ShuttingDown,

    // --- 处理器执行 ---
    #[error("event handler timed out: handler={handler}, timeout_ms={timeout_ms}")]
    HandlerTimeout { handler: String, timeout_ms: u128 },
    #[error("event handler panicked: handler={handler}, message={message}")]
    HandlerPanic { handler: String, message: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    HandlerFailed { handler: String, reason: String },

    // --- 持久化/缓存 ---
    #[error("persistence error: {reason}")]
    Persistence { reason: String },
    #[error("cache error: {reason}")]
    Cache { reason: String },
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("invalid status transition: event_id={event_id}, from={from}, to={to}")]
    InvalidTransition {
        event_id: String,
        from: &'static str,
        to: &'static str,
    },

    // --- 注册表 ---
    #[error("duplicate: {reason}")]
    Duplicate { reason: String },
    #[error("batch registration failed with {} errors: {}", .failures.len(), .failures.join("; "))]
    BatchRegistration { failures: Vec<String> },

    // --- 通用 ---
    #[error("validation error: {reason}")]
    Validation { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl EventError {
    pub fn persistence(reason: impl Into<String>) -> Self {
        EventError::Persistence {
            reason: reason.into(),
        }
    }

    pub fn cache(reason: impl Into<String>) -> Self {
        EventError::Cache {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        EventError::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        EventError::NotFound {
            reason: reason.into(),
        }
    }

    pub fn duplicate(reason: impl Into<String>) -> Self {
        EventError::Duplicate {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, EventError::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EventError::Duplicate { .. })
    }
}

/// 统一 Result 类型别名
pub type EventResult<T> = Result<T, EventError>;

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 EventError
#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for EventError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EventError::NotFound {
                reason: "row not found".to_string(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => EventError::Duplicate {
                reason: db.message().to_string(),
            },
            other => EventError::Persistence {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_registration_lists_every_failure() {
        let err = EventError::BatchRegistration {
            failures: vec!["a: duplicate".into(), "b: bus down".into()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("batch registration failed with 2 errors"));
        assert!(msg.contains("a: duplicate"));
        assert!(msg.contains("b: bus down"));
    }

    #[test]
    fn kind_helpers() {
        assert!(EventError::not_found("x").is_not_found());
        assert!(EventError::duplicate("x").is_duplicate());
        assert!(!EventError::ShuttingDown.is_not_found());
    }
}
