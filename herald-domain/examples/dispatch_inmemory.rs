/// 内存分发示例
/// 演示分发器 + 持久化处理器 + 最近事件缓存 + 重放的完整链路
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use herald_domain::event::Event;
use herald_domain::eventing::{
    DispatcherConfig, EventBus, EventDispatcher, EventHandler, HandlerMetadata, HandlerRegistry,
    WILDCARD_EVENT_TYPE,
};
use herald_domain::persist::{
    EventStore, InMemoryEventStore, InMemoryKeyValueStore, PersistentEventHandler,
    RecentCacheConfig, RecentEventCache, StoreDeliveryMarker,
};
use herald_domain::replay::{EventReplayer, ReplayOptions};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// 业务处理器
// ============================================================================

/// 统计投票数
#[derive(Default)]
struct VoteTally {
    votes: AtomicUsize,
}

#[async_trait]
impl EventHandler for VoteTally {
    fn handler_name(&self) -> &str {
        "vote_tally"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let total = self.votes.fetch_add(1, Ordering::SeqCst) + 1;
        println!("  🗳  {} -> total votes {}", event.event_id(), total);
        Ok(())
    }
}

/// 前两次调用失败，模拟不稳定的下游通知服务
#[derive(Default)]
struct FlakyNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl EventHandler for FlakyNotifier {
    fn handler_name(&self) -> &str {
        "flaky_notifier"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= 2 {
            anyhow::bail!("notification gateway unavailable (attempt {n})");
        }
        println!("  📣 notified subscribers about {}", event.event_id());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    println!("=== 内存分发示例 ===\n");

    let store = Arc::new(InMemoryEventStore::default());
    let cache = RecentEventCache::new(
        Arc::new(InMemoryKeyValueStore::new()),
        RecentCacheConfig::default(),
    );

    let dispatcher = Arc::new(
        EventDispatcher::builder()
            .config(DispatcherConfig {
                worker_count: 4,
                retry_interval: Duration::from_millis(50),
                enable_metrics: false,
                ..Default::default()
            })
            .marker(Arc::new(StoreDeliveryMarker::new(store.clone())))
            .build(),
    );

    let registry = HandlerRegistry::new(dispatcher.clone());
    registry.register_handler(
        WILDCARD_EVENT_TYPE,
        Arc::new(PersistentEventHandler::new(store.clone(), Some(cache.clone()))),
        None,
        None,
    )?;
    let tally = Arc::new(VoteTally::default());
    registry.register_handler("vote.cast", tally.clone(), None, None)?;
    registry.register_handler(
        "vote.cast",
        Arc::new(FlakyNotifier::default()),
        Some(
            HandlerMetadata::builder()
                .name("flaky_notifier")
                .retry_count(5)
                .build(),
        ),
        None,
    )?;

    dispatcher.start();

    // 发布
    println!("--- 发布事件 ---");
    let vote = Event::new("vote.cast", json!({"user_id": 42, "match_id": 7, "option": "home"}));
    let vote_id = vote.event_id().to_string();
    dispatcher.publish(vote)?;
    dispatcher.publish(Event::new("page.view", json!({"user_id": 42, "page": "/matches/7"})))?;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let record = store.get_event(&vote_id).await?;
    println!(
        "✅ {} status={} retry_count={}",
        record.event_id, record.status, record.retry_count
    );

    let m = dispatcher.metrics();
    println!(
        "📊 published={} processed={} failed={} retried={} avg={:?}",
        m.published, m.processed, m.failed, m.retried, m.average_processing_time
    );

    // 缓存
    println!("\n--- 最近事件缓存 ---");
    for event in cache.get_recent_events(10).await? {
        println!("  {} {}", event.event_type(), event.event_id());
    }
    println!("types: {:?}", cache.recent_event_types().await?);

    // 注册表
    println!("\n--- 注册表 ---");
    let stats = registry.registry_stats();
    println!(
        "handlers={} enabled={} types={}",
        stats.total_handlers, stats.enabled_handlers, stats.event_types
    );

    // 重放
    println!("\n--- 重放最近一小时的投票 ---");
    let replayer = EventReplayer::new(store.clone(), dispatcher.clone());
    let now = Utc::now();
    let options = ReplayOptions::builder()
        .event_type("vote.cast")
        .start_time(now - ChronoDuration::hours(1))
        .end_time(now)
        .build();
    let result = replayer.replay_events(&options, &CancellationToken::new()).await?;
    println!(
        "🔁 total={} processed={} failed={}",
        result.total_events, result.processed_events, result.failed_events
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    dispatcher.shutdown().await;
    println!("\ntotal votes tallied: {}", tally.votes.load(Ordering::SeqCst));
    Ok(())
}
