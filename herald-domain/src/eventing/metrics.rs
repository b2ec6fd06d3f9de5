//! 分发指标（DispatcherMetrics）
//!
//! 全局计数器使用原子变量，按事件类型的统计位于独立的读写锁之下；
//! `snapshot` 返回拷贝，供周期报告与外部查询使用。
//!
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 单个事件类型的分发统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventTypeStats {
    pub count: u64,
    pub failed: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub panicked: u64,
    pub average_processing_time: Duration,
    pub per_type: HashMap<String, EventTypeStats>,
}

#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    panicked: AtomicU64,
    avg_processing_nanos: AtomicU64,
    per_type: RwLock<HashMap<String, EventTypeStats>>,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_published(&self, event_type: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut per_type = self.per_type.write();
        let stats = per_type.entry(event_type.to_string()).or_default();
        stats.count += 1;
        stats.last_seen = Some(Utc::now());
    }

    /// 记录一次全部处理器成功的处理，并更新移动平均耗时
    pub(crate) fn record_processed(&self, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let sample = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        // (avg + d) / 2，首个样本直接采用
        let _ = self
            .avg_processing_nanos
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |avg| {
                Some(if avg == 0 {
                    sample
                } else {
                    avg / 2 + sample / 2
                })
            });
    }

    pub(crate) fn record_failed(&self, event_type: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut per_type = self.per_type.write();
        per_type.entry(event_type.to_string()).or_default().failed += 1;
    }

    pub(crate) fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    pub fn average_processing_time(&self) -> Duration {
        Duration::from_nanos(self.avg_processing_nanos.load(Ordering::Relaxed))
    }

    pub fn event_type_stats(&self, event_type: &str) -> Option<EventTypeStats> {
        self.per_type.read().get(event_type).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published(),
            processed: self.processed(),
            failed: self.failed(),
            retried: self.retried(),
            panicked: self.panicked(),
            average_processing_time: self.average_processing_time(),
            per_type: self.per_type.read().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_halves_towards_latest_sample() {
        let m = DispatcherMetrics::new();
        m.record_processed(Duration::from_millis(100));
        assert_eq!(m.average_processing_time(), Duration::from_millis(100));
        m.record_processed(Duration::from_millis(300));
        assert_eq!(m.average_processing_time(), Duration::from_millis(200));
        assert_eq!(m.processed(), 2);
    }

    #[test]
    fn per_type_stats_track_publish_and_failure() {
        let m = DispatcherMetrics::new();
        m.record_published("vote.cast");
        m.record_published("vote.cast");
        m.record_failed("vote.cast");

        let stats = m.event_type_stats("vote.cast").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.failed, 1);
        assert!(stats.last_seen.is_some());
        assert!(m.event_type_stats("page.view").is_none());

        let snap = m.snapshot();
        assert_eq!(snap.published, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.per_type.len(), 1);
    }
}
