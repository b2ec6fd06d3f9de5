use anyhow::Result as AnyResult;
use chrono::{Duration as ChronoDuration, Utc};
use herald_application::payloads::{FeatureUsed, UserRegistered};
use herald_application::{AppError, EventManager, EventManagerConfig};
use herald_domain::error::EventError;
use herald_domain::event::Event;
use herald_domain::eventing::{DispatcherConfig, EventHandler};
use herald_domain::replay::ReplayOptions;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn manager() -> AnyResult<EventManager> {
    let config = EventManagerConfig {
        dispatcher: DispatcherConfig {
            worker_count: 2,
            enable_metrics: false,
            retry_interval: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    };
    Ok(EventManager::builder().config(config).build()?)
}

async fn wait_processed(manager: &EventManager, n: u64) {
    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        while manager.metrics().processed < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_after_shutdown_surfaces_as_app_error() -> AnyResult<()> {
    let manager = manager()?;
    manager.start();
    manager.shutdown().await;

    let err = manager
        .publish(Event::new("page.viewed", json!({})))
        .unwrap_err();
    assert!(matches!(err, AppError::Event(EventError::ShuttingDown)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn user_events_can_be_replayed_by_type() -> AnyResult<()> {
    let manager = manager()?;
    manager.start();

    manager.publish_payload(&UserRegistered {
        user_id: 3,
        username: "mia".into(),
        email: "mia@example.com".into(),
        nickname: String::new(),
        registration_source: "web".into(),
    })?;
    manager.publish_payload(&FeatureUsed {
        user_id: 3,
        feature_name: "compare".into(),
        action: "open".into(),
        parameters: Default::default(),
        success: true,
        duration: Duration::from_millis(120),
    })?;
    wait_processed(&manager, 2).await;

    let now = Utc::now();
    let options = ReplayOptions::builder()
        .event_type("feature.used")
        .start_time(now - ChronoDuration::minutes(5))
        .end_time(now + ChronoDuration::minutes(1))
        .build();
    let result = manager
        .replayer()
        .replay_events(&options, &CancellationToken::new())
        .await?;
    assert_eq!(result.total_events, 1);
    assert_eq!(result.processed_events, 1);

    wait_processed(&manager, 3).await;
    manager.shutdown().await;

    let counted = manager
        .metrics_handler()
        .type_metrics("feature.used")
        .map(|m| m.count);
    assert_eq!(counted, Some(2));
    // 重放不会产生新的存储记录
    let stored = manager.store().get_events_by_user(3, 0, 0).await?;
    assert_eq!(stored.len(), 2);
    Ok(())
}

/// 慢速计数处理器
#[derive(Clone, Default)]
struct SlowCounter {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl EventHandler for SlowCounter {
    fn handler_name(&self) -> &str {
        "slow_counter"
    }

    async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_sync_returns_after_registered_handlers_ran() -> AnyResult<()> {
    let manager = manager()?;
    let counter = SlowCounter::default();
    manager.register_handler("prediction.created", Arc::new(counter.clone()))?;
    manager.start();

    manager
        .publish_sync(
            Event::new("prediction.created", json!({"user_id": 5})),
            Duration::from_secs(2),
        )
        .await?;
    assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

    // 等待者已退订，后续发布不受影响
    manager.publish(Event::new("prediction.created", json!({"user_id": 5})))?;
    wait_processed(&manager, 2).await;
    manager.shutdown().await;

    assert_eq!(counter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.dispatcher().handler_count("prediction.created"), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn publish_sync_times_out_when_nothing_consumes() -> AnyResult<()> {
    let manager = manager()?;

    let event = Event::new("page.viewed", json!({}));
    let expected_id = event.event_id().to_string();
    let err = manager
        .publish_sync(event, Duration::from_millis(50))
        .await
        .unwrap_err();
    match err {
        AppError::SyncTimeout { event_id, timeout } => {
            assert_eq!(event_id, expected_id);
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(manager.dispatcher().handler_count("page.viewed"), 0);

    let err = manager
        .publish_sync(Event::new("page.viewed", json!({})), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    Ok(())
}
