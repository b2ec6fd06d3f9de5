/// EventManager 示例
/// 演示强类型载荷发布、业务处理器注册、同步发布、健康检查与失败事件重放
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use herald_application::payloads::{PageViewed, VoteCast};
use herald_application::{EventManager, EventManagerConfig, LogFormat, event_types, init_tracing};
use herald_domain::event::Event;
use herald_domain::eventing::{DispatcherConfig, EventHandler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 第一次调用失败且不允许重试，制造一条失败记录
#[derive(Default)]
struct LeaderboardRefresher {
    failed_once: AtomicBool,
}

#[async_trait]
impl EventHandler for LeaderboardRefresher {
    fn handler_name(&self) -> &str {
        "leaderboard_refresher"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if !self.failed_once.swap(true, Ordering::SeqCst) {
            anyhow::bail!("leaderboard cache is warming up");
        }
        println!("  🏆 leaderboard refreshed after {}", event.event_id());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    init_tracing(LogFormat::Plain, "info,herald_domain=debug")?;
    println!("=== EventManager 示例 ===\n");

    let config = EventManagerConfig {
        dispatcher: DispatcherConfig {
            max_retries: 1,
            enable_metrics: false,
            ..Default::default()
        },
        ..Default::default()
    };
    let manager = EventManager::builder().config(config).build()?;
    manager.register_handler(event_types::VOTE_CAST, Arc::new(LeaderboardRefresher::default()))?;
    manager.start();

    let vote_id = manager.publish_payload(&VoteCast {
        vote_id: 1,
        user_id: 21,
        author_id: 7,
        prediction_id: 300,
        match_id: 12,
        new_vote_count: 4,
    })?;
    manager.publish_payload(&PageViewed {
        user_id: 21,
        page_path: "/matches/12".into(),
        page_title: "Final".into(),
        referrer: String::new(),
        view_duration: Duration::from_secs(42),
    })?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let record = manager.store().get_event(&vote_id).await?;
    println!("✅ vote {} status={} error={:?}", vote_id, record.status, record.error_message);

    println!("\n--- 指标 ---");
    let m = manager.metrics();
    println!("published={} processed={} failed={}", m.published, m.processed, m.failed);
    for (event_type, stats) in manager.metrics_handler().metrics() {
        println!("  {event_type}: count={}", stats.count);
    }

    println!("\n--- 同步发布与健康检查 ---");
    manager
        .publish_sync(
            Event::new(event_types::PAGE_VIEWED, serde_json::json!({"user_id": 21})),
            Duration::from_secs(1),
        )
        .await?;
    let report = manager.perform_health_check();
    println!(
        "🩺 healthy={} failure_rate={:.2} handlers={}",
        report.is_healthy(),
        report.failure_rate,
        report.registered_handlers
    );

    println!("\n--- 重放失败事件 ---");
    let token = CancellationToken::new();
    let result = manager.replayer().replay_failed_events(10, &token).await?;
    println!("🔁 total={} processed={}", result.total_events, result.processed_events);
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("\n--- 按用户重放最近一小时 ---");
    let now = Utc::now();
    let result = manager
        .replayer()
        .replay_user_events(21, now - ChronoDuration::hours(1), now, &token)
        .await?;
    println!("🔁 total={} processed={}", result.total_events, result.processed_events);

    let status = manager.replayer().replay_status().await;
    println!("\nfailed events waiting: {}", status.failed_events_count);

    manager.shutdown().await;
    Ok(())
}
