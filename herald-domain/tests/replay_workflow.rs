use anyhow::Result as AnyResult;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use herald_domain::event::Event;
use herald_domain::eventing::{
    DispatcherConfig, EventBus, EventDispatcher, EventHandler, HandlerRegistry,
    WILDCARD_EVENT_TYPE,
};
use herald_domain::persist::{
    EventRecord, EventStatus, EventStore, InMemoryEventStore, PersistentEventHandler,
    StoreDeliveryMarker,
};
use herald_domain::replay::{EventReplayer, MAX_REPLAY_EVENTS, ReplayOptions};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Counter {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl EventHandler for Counter {
    fn handler_name(&self) -> &str {
        "counter"
    }

    async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryEventStore>,
    dispatcher: Arc<EventDispatcher>,
    replayer: EventReplayer,
    counter: Counter,
}

fn harness() -> AnyResult<Harness> {
    let store = Arc::new(InMemoryEventStore::default());
    let dispatcher = Arc::new(
        EventDispatcher::builder()
            .config(DispatcherConfig {
                queue_size: 256,
                worker_count: 2,
                retry_interval: Duration::from_millis(10),
                enable_metrics: false,
                ..Default::default()
            })
            .marker(Arc::new(StoreDeliveryMarker::new(store.clone())))
            .build(),
    );
    let registry = HandlerRegistry::new(dispatcher.clone());
    registry.register_handler(
        WILDCARD_EVENT_TYPE,
        Arc::new(PersistentEventHandler::new(store.clone(), None)),
        None,
        None,
    )?;
    let counter = Counter::default();
    registry.register_handler("vote.cast", Arc::new(counter.clone()), None, None)?;

    let replayer = EventReplayer::new(store.clone(), dispatcher.clone()).settled_by_delivery();
    Ok(Harness {
        store,
        dispatcher,
        replayer,
        counter,
    })
}

async fn seed(store: &InMemoryEventStore, base: DateTime<Utc>, n: i64) -> AnyResult<Vec<String>> {
    let mut ids = Vec::new();
    for i in 0..n {
        let event = Event::with_timestamp(
            "vote.cast",
            json!({"user_id": 1, "n": i}),
            base + ChronoDuration::seconds(i),
        );
        ids.push(store.store(&event).await?.event_id);
    }
    Ok(ids)
}

fn options(start: DateTime<Utc>, end: DateTime<Utc>) -> ReplayOptions {
    ReplayOptions::builder().start_time(start).end_time(end).build()
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    let _ = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if cond() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn validate_replay_rejects_bad_options() -> AnyResult<()> {
    let h = harness()?;
    let now = Utc::now();

    // end < start
    let err = h
        .replayer
        .validate_replay(&options(now, now - ChronoDuration::seconds(1)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("end time"));

    // 超过 7 天
    let err = h
        .replayer
        .validate_replay(&options(now - ChronoDuration::days(8), now))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("time range"));

    // 批次大小越界；0 归一化为默认值后合法
    let mut too_big = options(now - ChronoDuration::hours(1), now);
    too_big.batch_size = 1001;
    assert!(h.replayer.validate_replay(&too_big).await.is_err());
    let mut zero = options(now - ChronoDuration::hours(1), now);
    zero.batch_size = 0;
    assert!(h.replayer.validate_replay(&zero).await.is_ok());

    // 候选事件过多
    let base = now - ChronoDuration::hours(5);
    for i in 0..=MAX_REPLAY_EVENTS {
        let record = EventRecord::from_event(&Event::with_timestamp(
            "page.view",
            json!({}),
            base + ChronoDuration::milliseconds(i as i64),
        ))?;
        h.store.insert_record(record)?;
    }
    let err = h
        .replayer
        .validate_replay(&options(base, now))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("too many events"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_counts_without_publishing() -> AnyResult<()> {
    let h = harness()?;
    h.dispatcher.start();
    let base = Utc::now() - ChronoDuration::hours(2);
    seed(&h.store, base, 10).await?;

    let mut opts = options(base, base + ChronoDuration::hours(1));
    opts.dry_run = true;
    let result = h.replayer.replay_events(&opts, &CancellationToken::new()).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.dispatcher.shutdown().await;

    assert_eq!(result.total_events, 10);
    assert_eq!(result.processed_events, 0);
    assert_eq!(h.dispatcher.metrics().published, 0);
    assert_eq!(h.counter.calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn processed_events_are_republished() -> AnyResult<()> {
    let h = harness()?;
    h.dispatcher.start();
    let base = Utc::now() - ChronoDuration::hours(2);
    let ids = seed(&h.store, base, 3).await?;
    for id in &ids {
        h.store.mark_as_processed(id).await?;
    }

    let result = h
        .replayer
        .replay_events(
            &options(base, base + ChronoDuration::hours(1)),
            &CancellationToken::new(),
        )
        .await?;
    wait_for(|| h.counter.calls.load(Ordering::SeqCst) == 3).await;
    wait_for(|| h.dispatcher.metrics().processed == 3).await;
    h.dispatcher.shutdown().await;

    assert_eq!(result.total_events, 3);
    assert_eq!(result.processed_events, 3);
    assert_eq!(h.counter.calls.load(Ordering::SeqCst), 3);
    // 同一事件 ID 不会重复落库
    assert_eq!(h.store.len(), 3);
    for id in &ids {
        assert_eq!(h.store.get_event(id).await?.status, EventStatus::Processed);
    }
    Ok(())
}

#[tokio::test]
async fn failed_events_query_is_oldest_first_and_bounded() -> AnyResult<()> {
    let h = harness()?;
    let base = Utc::now() - ChronoDuration::hours(3);
    let ids = seed(&h.store, base, 8).await?;

    // ids[0..6] 失败一次；ids[6] 失败三次（已达上限）；ids[7] 保持 pending
    for id in &ids[..6] {
        h.store.mark_as_failed(id, "boom").await?;
    }
    for _ in 0..3 {
        h.store.mark_as_failed(&ids[6], "boom").await?;
    }

    let failed = h.store.get_failed_events(5).await?;
    assert_eq!(failed.len(), 5);
    assert!(failed.iter().all(|r| r.status == EventStatus::Failed && r.retry_count < 3));
    assert!(failed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(failed[0].event_id, ids[0]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_failed_events_through_the_dispatcher() -> AnyResult<()> {
    let h = harness()?;
    h.dispatcher.start();
    let base = Utc::now() - ChronoDuration::hours(1);
    let ids = seed(&h.store, base, 2).await?;
    for id in &ids {
        h.store.mark_as_failed(id, "downstream unavailable").await?;
    }

    let result = h
        .replayer
        .replay_failed_events(10, &CancellationToken::new())
        .await?;
    wait_for(|| h.dispatcher.metrics().processed == 2).await;
    h.dispatcher.shutdown().await;

    assert_eq!(h.counter.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.total_events, 2);
    assert_eq!(result.processed_events, 2);
    for id in &ids {
        let record = h.store.get_event(id).await?;
        assert_eq!(record.status, EventStatus::Processed);
        assert_eq!(record.retry_count, 1);
    }
    assert!(h.store.get_failed_events(0).await?.is_empty());

    let status = h.replayer.replay_status().await;
    assert_eq!(status.failed_events_count, 0);
    Ok(())
}

struct AlwaysDown {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl EventHandler for AlwaysDown {
    fn handler_name(&self) -> &str {
        "always_down"
    }

    async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("down")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_event_that_keeps_failing_stays_failed_after_replay() -> AnyResult<()> {
    let h = harness()?;
    let calls = Arc::new(AtomicUsize::new(0));
    h.dispatcher.subscribe(
        "prediction.created",
        Arc::new(AlwaysDown {
            calls: calls.clone(),
        }),
    )?;
    h.dispatcher.start();

    let event = Event::with_timestamp(
        "prediction.created",
        json!({"user_id": 2}),
        Utc::now() - ChronoDuration::minutes(10),
    );
    let event_id = h.store.store(&event).await?.event_id;
    h.store.mark_as_failed(&event_id, "down").await?;

    let result = h
        .replayer
        .replay_failed_events(10, &CancellationToken::new())
        .await?;
    wait_for(|| h.dispatcher.metrics().failed == 1).await;
    h.dispatcher.shutdown().await;

    assert_eq!(result.processed_events, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.dispatcher.metrics().failed, 1);

    let record = h.store.get_event(&event_id).await?;
    assert_eq!(record.status, EventStatus::Failed);
    // 原有一次失败 + 重放后的三次尝试
    assert_eq!(record.retry_count, 4);
    assert_eq!(record.error_message.unwrap_or_default().lines().count(), 4);
    Ok(())
}
