//! 重放参数与限制
//!
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 单次重放允许的最大时间窗口（7 天）
pub const MAX_REPLAY_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// 按用户重放时的批次大小
pub const USER_REPLAY_BATCH_SIZE: usize = 50;
/// 单次重放允许的最大事件数
pub const MAX_REPLAY_EVENTS: usize = 10_000;
/// 重放状态中“最近事件”的回溯时长
pub const STATUS_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// 重放选项
///
/// 候选事件的选择优先级：`user_id` → `event_type` → 整个时间窗口。
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct ReplayOptions {
    #[builder(into)]
    #[serde(default)]
    pub event_type: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<u64>,
    /// 0 表示使用默认批次大小
    #[builder(default)]
    #[serde(default)]
    pub batch_size: usize,
    /// 批次之间的等待时间
    #[builder(default)]
    #[serde(default, with = "crate::serde_ext::duration_ms")]
    pub delay_between: Duration,
    /// 只统计候选事件，不发布
    #[builder(default)]
    #[serde(default)]
    pub dry_run: bool,
}

impl ReplayOptions {
    /// 0 先归一化为默认值，再参与范围校验
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }

    pub fn user_filter(&self) -> Option<u64> {
        self.user_id.filter(|id| *id > 0)
    }

    pub fn event_type_filter(&self) -> Option<&str> {
        self.event_type.as_deref().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let now = Utc::now();
        let options = ReplayOptions::builder()
            .start_time(now - chrono::Duration::hours(1))
            .end_time(now)
            .build();
        assert_eq!(options.batch_size, 0);
        assert_eq!(options.effective_batch_size(), DEFAULT_BATCH_SIZE);
        assert!(!options.dry_run);
        assert!(options.event_type_filter().is_none());

        let options = ReplayOptions::builder()
            .start_time(now)
            .end_time(now)
            .event_type("vote.cast")
            .user_id(0)
            .batch_size(7)
            .build();
        assert_eq!(options.effective_batch_size(), 7);
        assert_eq!(options.event_type_filter(), Some("vote.cast"));
        assert_eq!(options.user_filter(), None);
    }
}
