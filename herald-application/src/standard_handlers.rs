//! 标准处理器
//!
//! - `LoggingEventHandler`：按配置的级别输出收到的每个事件；
//! - `MetricsEventHandler`：按事件类型累计次数、最近出现时间与平均处理耗时。
//!
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use herald_domain::event::Event;
use herald_domain::eventing::EventHandler;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, trace, warn};

pub const LOGGING_HANDLER_NAME: &str = "logging_event_handler";
pub const METRICS_HANDLER_NAME: &str = "metrics_event_handler";

pub struct LoggingEventHandler {
    level: Level,
}

impl LoggingEventHandler {
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Default for LoggingEventHandler {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

#[async_trait]
impl EventHandler for LoggingEventHandler {
    fn handler_name(&self) -> &str {
        LOGGING_HANDLER_NAME
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let event_type = event.event_type();
        let event_id = event.event_id();
        let timestamp = event.timestamp();
        let payload = event.payload();

        // tracing 的级别必须是常量
        let level = self.level;
        if level == Level::TRACE {
            trace!(event_type, event_id, %timestamp, %payload, "event received");
        } else if level == Level::DEBUG {
            debug!(event_type, event_id, %timestamp, %payload, "event received");
        } else if level == Level::WARN {
            warn!(event_type, event_id, %timestamp, %payload, "event received");
        } else if level == Level::ERROR {
            error!(event_type, event_id, %timestamp, %payload, "event received");
        } else {
            info!(event_type, event_id, %timestamp, %payload, "event received");
        }
        Ok(())
    }
}

/// 单个事件类型的处理统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeMetrics {
    pub count: u64,
    pub last_seen: Option<DateTime<Utc>>,
    pub total_time: Duration,
    pub average_time: Duration,
}

impl TypeMetrics {
    fn observe(&mut self, seen_at: DateTime<Utc>, elapsed: Duration) {
        self.count += 1;
        self.last_seen = Some(seen_at);
        self.total_time += elapsed;
        self.average_time = self.total_time / u32::try_from(self.count).unwrap_or(u32::MAX);
    }
}

#[derive(Default)]
pub struct MetricsEventHandler {
    metrics: DashMap<String, TypeMetrics>,
}

impl MetricsEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_metrics(&self, event_type: &str) -> Option<TypeMetrics> {
        self.metrics.get(event_type).map(|m| m.clone())
    }

    /// 所有类型统计的副本
    pub fn metrics(&self) -> HashMap<String, TypeMetrics> {
        self.metrics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn reset(&self) {
        self.metrics.clear();
    }
}

#[async_trait]
impl EventHandler for MetricsEventHandler {
    fn handler_name(&self) -> &str {
        METRICS_HANDLER_NAME
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let started = Instant::now();
        let mut entry = self
            .metrics
            .entry(event.event_type().to_string())
            .or_default();
        entry.observe(event.timestamp(), started.elapsed());

        debug!(
            event_type = event.event_type(),
            count = entry.count,
            average_time_us = entry.average_time.as_micros() as u64,
            "event metrics updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn metrics_handler_counts_per_type() {
        let handler = MetricsEventHandler::new();
        let vote = Event::new("vote.cast", json!({"user_id": 1}));
        handler.handle(&vote).await.unwrap();
        handler.handle(&vote).await.unwrap();
        handler
            .handle(&Event::new("page.viewed", json!({})))
            .await
            .unwrap();

        let votes = handler.type_metrics("vote.cast").unwrap();
        assert_eq!(votes.count, 2);
        assert_eq!(votes.last_seen, Some(vote.timestamp()));
        assert_eq!(handler.metrics().len(), 2);
        assert!(handler.type_metrics("match.viewed").is_none());

        handler.reset();
        assert!(handler.metrics().is_empty());
    }

    #[tokio::test]
    async fn logging_handler_never_fails() {
        for level in [Level::TRACE, Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR] {
            let handler = LoggingEventHandler::new(level);
            assert!(handler.handle(&Event::new("user.registered", json!({}))).await.is_ok());
        }
        assert_eq!(LoggingEventHandler::default().level(), Level::INFO);
    }

    #[test]
    fn average_time_is_total_over_count() {
        let mut m = TypeMetrics::default();
        let now = Utc::now();
        m.observe(now, Duration::from_millis(10));
        m.observe(now, Duration::from_millis(30));
        assert_eq!(m.average_time, Duration::from_millis(20));
    }
}
