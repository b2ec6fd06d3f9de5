//! 处理器组合器与事件条件
//!
//! - `ConditionalEventHandler`：条件满足时才调用内部处理器；
//! - `ChainEventHandler`：依次调用，遇到首个失败即停止；
//! - `AsyncEventHandler`：在后台任务中调用内部处理器，立即返回成功。
//!
//! 条件：`EventTypeFilter`、`PayloadCondition`、`TimeWindowCondition`，
//! 以及任意 `Fn(&Event) -> bool` 闭包。
//!
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_domain::event::Event;
use herald_domain::eventing::EventHandler;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 事件条件
pub trait EventCondition: Send + Sync + 'static {
    fn should_handle(&self, event: &Event) -> bool;
}

impl<F> EventCondition for F
where
    F: Fn(&Event) -> bool + Send + Sync + 'static,
{
    fn should_handle(&self, event: &Event) -> bool {
        self(event)
    }
}

pub struct ConditionalEventHandler {
    name: String,
    condition: Box<dyn EventCondition>,
    handler: Arc<dyn EventHandler>,
}

impl ConditionalEventHandler {
    pub fn new(condition: impl EventCondition, handler: Arc<dyn EventHandler>) -> Self {
        Self {
            name: format!("conditional_{}", handler.handler_name()),
            condition: Box::new(condition),
            handler,
        }
    }
}

#[async_trait]
impl EventHandler for ConditionalEventHandler {
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if !self.condition.should_handle(event) {
            debug!(
                event_type = event.event_type(),
                handler = self.handler.handler_name(),
                "event condition not met, skipping handler"
            );
            return Ok(());
        }
        self.handler.handle(event).await
    }
}

pub struct ChainEventHandler {
    name: String,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl ChainEventHandler {
    pub fn new(name: impl Into<String>, handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        Self {
            name: name.into(),
            handlers,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl EventHandler for ChainEventHandler {
    fn handler_name(&self) -> &str {
        &self.name
    }

    /// 整条链作为一个订阅重试，已成功的前段处理器会被再次调用
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        for (index, handler) in self.handlers.iter().enumerate() {
            if let Err(err) = handler.handle(event).await {
                error!(
                    event_type = event.event_type(),
                    chain = %self.name,
                    handler_index = index,
                    handler = handler.handler_name(),
                    error = %err,
                    "handler in chain failed"
                );
                return Err(err).with_context(|| {
                    format!("handler {index} ({}) in chain failed", handler.handler_name())
                });
            }
        }
        Ok(())
    }
}

/// 后台执行的包装器；内部失败与 panic 只记录日志，不进入分发器的重试
pub struct AsyncEventHandler {
    name: String,
    handler: Arc<dyn EventHandler>,
}

impl AsyncEventHandler {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            name: format!("async_{}", handler.handler_name()),
            handler,
        }
    }
}

#[async_trait]
impl EventHandler for AsyncEventHandler {
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let handler = self.handler.clone();
        let owned = event.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });

        let event_type = event.event_type().to_string();
        let name = self.handler.handler_name().to_string();
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(
                    event_type = %event_type,
                    handler = %name,
                    error = %err,
                    "async event handler failed"
                ),
                Err(err) if err.is_panic() => error!(
                    event_type = %event_type,
                    handler = %name,
                    "async event handler panicked"
                ),
                Err(err) => warn!(
                    event_type = %event_type,
                    handler = %name,
                    error = %err,
                    "async event handler cancelled"
                ),
            }
        });
        Ok(())
    }
}

/// 事件类型白名单
#[derive(Debug, Clone, Default)]
pub struct EventTypeFilter {
    allowed: HashSet<String>,
}

impl EventTypeFilter {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl EventCondition for EventTypeFilter {
    fn should_handle(&self, event: &Event) -> bool {
        self.allowed.contains(event.event_type())
    }
}

/// 载荷顶层字段等于期望值
#[derive(Debug, Clone)]
pub struct PayloadCondition {
    field: String,
    expected: Value,
}

impl PayloadCondition {
    pub fn new(field: impl Into<String>, expected: Value) -> Self {
        Self {
            field: field.into(),
            expected,
        }
    }
}

impl EventCondition for PayloadCondition {
    fn should_handle(&self, event: &Event) -> bool {
        event.payload().get(&self.field) == Some(&self.expected)
    }
}

/// 事件时间落在开区间 (start, end) 内
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowCondition {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindowCondition {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

impl EventCondition for TimeWindowCondition {
    fn should_handle(&self, event: &Event) -> bool {
        let at = event.timestamp();
        at > self.start && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录调用次数，可配置为失败
    #[derive(Clone)]
    struct Spy {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Spy {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                fail: true,
                ..Self::ok(name)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for Spy {
        fn handler_name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("{} failed", self.name);
            }
            Ok(())
        }
    }

    struct Exploding;

    #[async_trait]
    impl EventHandler for Exploding {
        fn handler_name(&self) -> &str {
            "exploding"
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            panic!("exploded");
        }
    }

    #[tokio::test]
    async fn conditional_handler_skips_unmatched_events() {
        let spy = Spy::ok("points");
        let handler = ConditionalEventHandler::new(
            EventTypeFilter::new(["vote.cast", "vote.removed"]),
            Arc::new(spy.clone()),
        );
        assert_eq!(handler.handler_name(), "conditional_points");

        handler.handle(&Event::new("vote.cast", json!({}))).await.unwrap();
        handler.handle(&Event::new("page.viewed", json!({}))).await.unwrap();
        assert_eq!(spy.calls(), 1);
    }

    #[tokio::test]
    async fn closures_work_as_conditions() {
        let spy = Spy::ok("vip");
        let handler = ConditionalEventHandler::new(
            |event: &Event| event.user_id().is_some_and(|id| id < 10),
            Arc::new(spy.clone()),
        );

        handler.handle(&Event::new("t", json!({"user_id": 3}))).await.unwrap();
        handler.handle(&Event::new("t", json!({"user_id": 30}))).await.unwrap();
        handler.handle(&Event::new("t", json!({}))).await.unwrap();
        assert_eq!(spy.calls(), 1);
    }

    #[tokio::test]
    async fn chain_stops_at_first_failure() {
        let first = Spy::ok("first");
        let broken = Spy::failing("broken");
        let never = Spy::ok("never");
        let chain = ChainEventHandler::new(
            "scoring_chain",
            vec![
                Arc::new(first.clone()),
                Arc::new(broken.clone()),
                Arc::new(never.clone()),
            ],
        );
        assert_eq!(chain.len(), 3);

        let err = chain
            .handle(&Event::new("match.finished", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "handler 1 (broken) in chain failed");
        assert_eq!(format!("{:#}", err), "handler 1 (broken) in chain failed: broken failed");
        assert_eq!((first.calls(), broken.calls(), never.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn empty_chain_succeeds() {
        let chain = ChainEventHandler::new("empty", Vec::new());
        assert!(chain.is_empty());
        assert!(chain.handle(&Event::new("t", json!({}))).await.is_ok());
    }

    #[tokio::test]
    async fn async_handler_returns_before_inner_failure() {
        let broken = Spy::failing("slow_sink");
        let handler = AsyncEventHandler::new(Arc::new(broken.clone()));
        assert_eq!(handler.handler_name(), "async_slow_sink");

        assert!(handler.handle(&Event::new("t", json!({}))).await.is_ok());
        let _ = tokio::time::timeout(Duration::from_secs(1), async {
            while broken.calls() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert_eq!(broken.calls(), 1);
    }

    #[tokio::test]
    async fn async_handler_contains_panics() {
        let handler = AsyncEventHandler::new(Arc::new(Exploding));
        assert!(handler.handle(&Event::new("t", json!({}))).await.is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handler.handle(&Event::new("t", json!({}))).await.is_ok());
    }

    #[test]
    fn payload_condition_compares_top_level_field() {
        let condition = PayloadCondition::new("source", json!("web"));
        assert!(condition.should_handle(&Event::new("t", json!({"source": "web"}))));
        assert!(!condition.should_handle(&Event::new("t", json!({"source": "app"}))));
        assert!(!condition.should_handle(&Event::new("t", json!({"nested": {"source": "web"}}))));
        assert!(!condition.should_handle(&Event::new("t", json!([1, 2]))));
    }

    #[test]
    fn time_window_bounds_are_exclusive() {
        let start = Utc::now() - ChronoDuration::hours(1);
        let end = start + ChronoDuration::minutes(30);
        let window = TimeWindowCondition::new(start, end);

        let at = |ts| Event::with_timestamp("t", json!({}), ts);
        assert!(window.should_handle(&at(start + ChronoDuration::minutes(10))));
        assert!(!window.should_handle(&at(start)));
        assert!(!window.should_handle(&at(end)));
        assert!(!window.should_handle(&at(end + ChronoDuration::seconds(1))));
    }
}
