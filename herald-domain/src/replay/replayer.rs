//! 事件重放器（EventReplayer）
//!
//! 控制面组件，不持有状态：从事件存储按条件读取历史事件，分批重新发布到事件总线。
//! - 单条发布失败只计数并记录，不中断重放；
//! - 只有取消会提前结束，并携带已完成部分的结果；
//! - `dry_run` 只统计候选事件。
//!
use super::options::{
    DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MAX_REPLAY_EVENTS, MAX_REPLAY_WINDOW, MIN_BATCH_SIZE,
    ReplayOptions, STATUS_LOOKBACK, USER_REPLAY_BATCH_SIZE,
};
use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::eventing::EventBus;
use crate::persist::EventStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 重放结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayResult {
    pub total_events: usize,
    pub processed_events: usize,
    pub failed_events: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(
        "replay cancelled after {} of {} events",
        .partial.processed_events + .partial.failed_events,
        .partial.total_events
    )]
    Cancelled { partial: ReplayResult },
}

impl ReplayError {
    /// 取消时已完成部分的结果
    pub fn partial(&self) -> Option<&ReplayResult> {
        match self {
            ReplayError::Cancelled { partial } => Some(partial),
            ReplayError::Event(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplayError::Cancelled { .. })
    }
}

pub type ReplayOutcome = Result<ReplayResult, ReplayError>;

/// 重放状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayStatus {
    pub failed_events_count: usize,
    /// 最近 24 小时内最新事件的时间
    pub last_event_time: Option<DateTime<Utc>>,
    pub replay_available: bool,
    pub max_replay_duration: Duration,
    pub max_events_per_replay: usize,
}

pub struct EventReplayer {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    settle_on_publish: bool,
}

impl EventReplayer {
    /// 重放失败事件时，发布成功即把记录标记为已处理
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            store,
            bus,
            settle_on_publish: true,
        }
    }

    /// 总线已接入 `DeliveryMarker` 时使用：发布成功后记录保持 failed，
    /// 由分发器的处理结果决定最终状态
    pub fn settled_by_delivery(mut self) -> Self {
        self.settle_on_publish = false;
        self
    }

    /// 校验时间窗口、批次大小与候选事件数量（与重放使用相同的选择逻辑）
    pub async fn validate_replay(&self, options: &ReplayOptions) -> EventResult<()> {
        Self::validate_bounds(options)?;
        let candidates = self.candidates(options).await?;
        Self::validate_count(candidates.len())
    }

    pub async fn replay_events(
        &self,
        options: &ReplayOptions,
        cancel: &CancellationToken,
    ) -> ReplayOutcome {
        let started = Instant::now();
        Self::validate_bounds(options)?;

        info!(
            event_type = options.event_type_filter(),
            user_id = options.user_filter(),
            start_time = %options.start_time,
            end_time = %options.end_time,
            batch_size = options.effective_batch_size(),
            dry_run = options.dry_run,
            "starting event replay"
        );

        let events = self.candidates(options).await?;
        Self::validate_count(events.len())?;

        let mut result = ReplayResult {
            total_events: events.len(),
            ..Default::default()
        };

        if options.dry_run {
            result.duration = started.elapsed();
            info!(total_events = result.total_events, "dry run completed");
            return Ok(result);
        }

        let batch_size = options.effective_batch_size();
        let batch_count = events.len().div_ceil(batch_size);

        for (index, batch) in events.chunks(batch_size).enumerate() {
            for event in batch {
                if cancel.is_cancelled() {
                    return Err(Self::cancelled(result, started));
                }
                self.publish_one(event, &mut result);
            }

            let has_more = index + 1 < batch_count;
            if has_more && !options.delay_between.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(Self::cancelled(result, started));
                    }
                    _ = tokio::time::sleep(options.delay_between) => {}
                }
            }
            if has_more && cancel.is_cancelled() {
                return Err(Self::cancelled(result, started));
            }
        }

        result.duration = started.elapsed();
        info!(
            total_events = result.total_events,
            processed_events = result.processed_events,
            failed_events = result.failed_events,
            duration_ms = result.duration.as_millis() as u64,
            error_count = result.errors.len(),
            "event replay completed"
        );
        Ok(result)
    }

    /// 重放失败记录（最早的在前）：发布失败则再次标记失败；
    /// 发布成功时按 `settled_by_delivery` 决定是否立即标记为已处理
    pub async fn replay_failed_events(&self, limit: usize, cancel: &CancellationToken) -> ReplayOutcome {
        let started = Instant::now();
        info!(limit, "starting failed events replay");

        let records = self.store.get_failed_events(limit).await?;
        let mut result = ReplayResult {
            total_events: records.len(),
            ..Default::default()
        };

        for record in records {
            if cancel.is_cancelled() {
                return Err(Self::cancelled(result, started));
            }

            let published = record
                .to_event()
                .and_then(|event| self.bus.publish(event));

            match published {
                Ok(()) => {
                    result.processed_events += 1;
                    if self.settle_on_publish {
                        if let Err(err) = self.store.mark_as_processed(&record.event_id).await {
                            error!(event_id = %record.event_id, error = %err, "failed to mark event as processed");
                        }
                    }
                }
                Err(err) => {
                    result.failed_events += 1;
                    result
                        .errors
                        .push(format!("failed to replay event {}: {err}", record.event_id));
                    if let Err(mark_err) = self.store.mark_as_failed(&record.event_id, &err.to_string()).await {
                        error!(event_id = %record.event_id, error = %mark_err, "failed to mark event as failed");
                    }
                }
            }
        }

        result.duration = started.elapsed();
        info!(
            total_events = result.total_events,
            processed_events = result.processed_events,
            failed_events = result.failed_events,
            duration_ms = result.duration.as_millis() as u64,
            "failed events replay completed"
        );
        Ok(result)
    }

    /// 查询失败与最近事件异常时降级，不返回错误
    pub async fn replay_status(&self) -> ReplayStatus {
        let failed_events_count = match self.store.get_failed_events(0).await {
            Ok(records) => records.len(),
            Err(err) => {
                warn!(error = %err, "failed to count failed events");
                0
            }
        };

        let now = Utc::now();
        let lookback = chrono::Duration::from_std(STATUS_LOOKBACK).unwrap_or(chrono::Duration::hours(24));
        let last_event_time = match self
            .store
            .get_events_by_time_range(now - lookback, now, 1, 0)
            .await
        {
            Ok(records) => records.first().map(|r| r.created_at),
            Err(err) => {
                warn!(error = %err, "failed to load recent events");
                None
            }
        };

        ReplayStatus {
            failed_events_count,
            last_event_time,
            replay_available: true,
            max_replay_duration: MAX_REPLAY_WINDOW,
            max_events_per_replay: MAX_REPLAY_EVENTS,
        }
    }

    pub async fn replay_user_events(
        &self,
        user_id: u64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ReplayOutcome {
        let options = ReplayOptions::builder()
            .user_id(user_id)
            .start_time(start_time)
            .end_time(end_time)
            .batch_size(USER_REPLAY_BATCH_SIZE)
            .build();
        self.replay_events(&options, cancel).await
    }

    pub async fn replay_events_by_type(
        &self,
        event_type: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> ReplayOutcome {
        let options = ReplayOptions::builder()
            .event_type(event_type)
            .start_time(start_time)
            .end_time(end_time)
            .batch_size(DEFAULT_BATCH_SIZE)
            .build();
        self.replay_events(&options, cancel).await
    }

    fn validate_bounds(options: &ReplayOptions) -> EventResult<()> {
        if options.end_time < options.start_time {
            return Err(EventError::validation("end time must not be before start time"));
        }

        let window = (options.end_time - options.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if window > MAX_REPLAY_WINDOW {
            return Err(EventError::validation(format!(
                "time range cannot exceed {} days",
                MAX_REPLAY_WINDOW.as_secs() / 86_400
            )));
        }

        let batch_size = options.effective_batch_size();
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(EventError::validation(format!(
                "batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        Ok(())
    }

    fn validate_count(count: usize) -> EventResult<()> {
        if count > MAX_REPLAY_EVENTS {
            return Err(EventError::validation(format!(
                "too many events to replay ({count}), maximum allowed is {MAX_REPLAY_EVENTS}"
            )));
        }
        Ok(())
    }

    /// 候选事件（最早的在前）：用户 → 类型 → 整个时间窗口
    async fn candidates(&self, options: &ReplayOptions) -> EventResult<Vec<Event>> {
        let Some(user_id) = options.user_filter() else {
            return self
                .store
                .replay_events(options.event_type_filter(), options.start_time, options.end_time)
                .await;
        };

        let records = self.store.get_events_by_user(user_id, 0, 0).await?;
        let event_type = options.event_type_filter();
        let mut events: Vec<Event> = records
            .into_iter()
            .filter(|r| r.created_at >= options.start_time && r.created_at <= options.end_time)
            .filter(|r| event_type.is_none_or(|t| r.event_type == t))
            .filter_map(|r| match r.to_event() {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(event_id = %r.event_id, error = %err, "failed to deserialize event payload for replay");
                    None
                }
            })
            .collect();
        // 存储按时间倒序返回
        events.reverse();
        Ok(events)
    }

    fn publish_one(&self, event: &Event, result: &mut ReplayResult) {
        match self.bus.publish(event.clone()) {
            Ok(()) => {
                result.processed_events += 1;
                debug!(
                    event_type = event.event_type(),
                    event_id = event.event_id(),
                    "event replayed"
                );
            }
            Err(err) => {
                result.failed_events += 1;
                result.errors.push(format!(
                    "failed to replay event {} ({}): {err}",
                    event.event_id(),
                    event.event_type()
                ));
                error!(
                    event_type = event.event_type(),
                    event_id = event.event_id(),
                    error = %err,
                    "failed to replay event"
                );
            }
        }
    }

    fn cancelled(mut partial: ReplayResult, started: Instant) -> ReplayError {
        partial.duration = started.elapsed();
        info!(
            processed_events = partial.processed_events,
            failed_events = partial.failed_events,
            "event replay cancelled"
        );
        ReplayError::Cancelled { partial }
    }
}
