//! 事件管理器（EventManager）
//!
//! 一次性装配事件系统：事件存储、最近事件缓存、分发器、处理器注册表与重放器。
//! 持久化处理器与指标处理器以通配类型注册，且持久化处理器最先注册，
//! 保证业务处理器运行前事件已经落库。
//!
//! 启动后按配置周期执行健康检查：校验处理器注册并在出现失败事件时告警。
//!
use crate::error::{AppError, AppResult};
use crate::payloads::EventPayload;
use crate::standard_handlers::{LoggingEventHandler, MetricsEventHandler};
use async_trait::async_trait;
use bon::bon;
use herald_domain::event::Event;
use herald_domain::eventing::{
    DispatcherConfig, EventBus, EventDispatcher, EventHandler, HandlerId, HandlerRegistry,
    MetricsSnapshot, SubscriptionId, WILDCARD_EVENT_TYPE,
};
use herald_domain::persist::{
    EventStore, EventStoreConfig, InMemoryEventStore, InMemoryKeyValueStore, KeyValueStore,
    PersistentEventHandler, RecentCacheConfig, RecentEventCache, StoreDeliveryMarker,
};
use herald_domain::replay::EventReplayer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SYNC_WAITER_NAME: &str = "sync_publish_waiter";

/// 事件管理器配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventManagerConfig {
    pub dispatcher: DispatcherConfig,
    pub store: EventStoreConfig,
    pub cache: RecentCacheConfig,
    /// 是否额外以通配类型注册日志处理器
    pub log_events: bool,
    pub enable_health_check: bool,
    #[serde(with = "herald_domain::serde_ext::duration_ms")]
    pub health_check_interval: Duration,
}

impl Default for EventManagerConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            store: EventStoreConfig::default(),
            cache: RecentCacheConfig::default(),
            log_events: false,
            enable_health_check: true,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

/// 一次健康检查的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// 处理器校验失败的原因，校验通过时为空
    pub validation_error: Option<String>,
    pub published: u64,
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// failed / published，尚无发布时为 0
    pub failure_rate: f64,
    pub registered_handlers: usize,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.validation_error.is_none() && self.failed == 0
    }
}

pub struct EventManager {
    config: EventManagerConfig,
    store: Arc<dyn EventStore>,
    cache: Option<RecentEventCache>,
    dispatcher: Arc<EventDispatcher>,
    registry: Arc<HandlerRegistry>,
    replayer: EventReplayer,
    metrics_handler: Arc<MetricsEventHandler>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[bon]
impl EventManager {
    /// 未指定存储时使用内存实现；未指定键值存储时使用内存键值存储
    #[builder]
    pub fn new(
        #[builder(default)] config: EventManagerConfig,
        store: Option<Arc<dyn EventStore>>,
        kv: Option<Arc<dyn KeyValueStore>>,
        #[builder(default = true)] enable_cache: bool,
    ) -> AppResult<Self> {
        let store =
            store.unwrap_or_else(|| Arc::new(InMemoryEventStore::new(config.store)) as Arc<dyn EventStore>);
        let cache = enable_cache.then(|| {
            let kv = kv.unwrap_or_else(|| Arc::new(InMemoryKeyValueStore::new()) as Arc<dyn KeyValueStore>);
            RecentEventCache::new(kv, config.cache)
        });

        let dispatcher = Arc::new(
            EventDispatcher::builder()
                .config(config.dispatcher)
                .marker(Arc::new(StoreDeliveryMarker::new(store.clone())))
                .build(),
        );
        let registry = Arc::new(HandlerRegistry::new(dispatcher.clone()));
        // 失败事件重放后的最终状态由分发器的投递结果落定
        let replayer = EventReplayer::new(store.clone(), dispatcher.clone()).settled_by_delivery();
        let metrics_handler = Arc::new(MetricsEventHandler::new());

        registry.register_handler(
            WILDCARD_EVENT_TYPE,
            Arc::new(PersistentEventHandler::new(store.clone(), cache.clone())),
            None,
            None,
        )?;
        registry.register_handler(WILDCARD_EVENT_TYPE, metrics_handler.clone(), None, None)?;
        if config.log_events {
            registry.register_handler(
                WILDCARD_EVENT_TYPE,
                Arc::new(LoggingEventHandler::default()),
                None,
                None,
            )?;
        }

        info!(
            queue_size = config.dispatcher.queue_size,
            worker_count = config.dispatcher.worker_count,
            cache_enabled = cache.is_some(),
            "event manager assembled"
        );

        Ok(Self {
            config,
            store,
            cache,
            dispatcher,
            registry,
            replayer,
            metrics_handler,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl EventManager {
    /// 启动分发器工作者与健康检查任务（幂等）
    pub fn start(&self) {
        self.dispatcher.start();

        if !self.config.enable_health_check || self.token.is_cancelled() {
            return;
        }
        let interval = self.config.health_check_interval;
        if interval.is_zero() {
            warn!("health check interval is zero, health check disabled");
            return;
        }

        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        tasks.push(spawn_periodic(self.token.clone(), interval, move || {
            log_health(&health_report(&registry, &dispatcher));
        }));
        info!(interval_ms = interval.as_millis() as u64, "event manager health check started");
    }

    pub fn publish(&self, event: Event) -> AppResult<()> {
        Ok(self.dispatcher.publish(event)?)
    }

    /// 发布并等待事件被分发到本次订阅的等待者，超时返回 `SyncTimeout`
    ///
    /// 等待者订阅在所有已有处理器之后，收到通知即说明此前的处理器都已被调用过。
    pub async fn publish_sync(&self, event: Event, timeout: Duration) -> AppResult<()> {
        if timeout.is_zero() {
            return Err(AppError::Validation(
                "sync publish timeout must be positive".to_string(),
            ));
        }

        let event_type = event.event_type().to_string();
        let event_id = event.event_id().to_string();
        let (done, mut finished) = mpsc::channel(1);
        let subscription = self.dispatcher.subscribe(
            &event_type,
            Arc::new(SyncWaiter {
                event_id: event_id.clone(),
                done,
            }),
        )?;

        let outcome = match self.dispatcher.publish(event) {
            Ok(()) => match time::timeout(timeout, finished.recv()).await {
                Ok(_) => Ok(()),
                Err(_) => Err(AppError::SyncTimeout { event_id, timeout }),
            },
            Err(err) => Err(err.into()),
        };

        if let Err(err) = self.dispatcher.unsubscribe(&event_type, subscription) {
            warn!(event_type = %event_type, error = %err, "failed to remove sync publish waiter");
        }
        outcome
    }

    /// 立即执行一次健康检查并输出日志
    pub fn perform_health_check(&self) -> HealthReport {
        let report = health_report(&self.registry, &self.dispatcher);
        log_health(&report);
        report
    }

    /// 发布强类型载荷，返回生成的事件 ID
    pub fn publish_payload<P: EventPayload>(&self, payload: &P) -> AppResult<String> {
        let event = payload.to_event()?;
        let event_id = event.event_id().to_string();
        self.dispatcher.publish(event)?;
        Ok(event_id)
    }

    /// 以注册表登记业务处理器
    pub fn register_handler(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> AppResult<HandlerId> {
        Ok(self
            .registry
            .register_handler(event_type, handler, None, None)?)
    }

    /// 绕过注册表直接订阅
    pub fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
    ) -> AppResult<SubscriptionId> {
        Ok(self.dispatcher.subscribe(event_type, handler)?)
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&RecentEventCache> {
        self.cache.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn replayer(&self) -> &EventReplayer {
        &self.replayer
    }

    pub fn metrics_handler(&self) -> &Arc<MetricsEventHandler> {
        &self.metrics_handler
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatcher.metrics()
    }

    /// 停止健康检查，停止接收新事件并等待工作者退出
    pub async fn shutdown(&self) {
        self.token.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "health check task ended abnormally");
            }
        }

        self.dispatcher.shutdown().await;
        info!("event manager stopped");
    }
}

/// 只对指定事件 ID 发出完成通知
struct SyncWaiter {
    event_id: String,
    done: mpsc::Sender<()>,
}

#[async_trait]
impl EventHandler for SyncWaiter {
    fn handler_name(&self) -> &str {
        SYNC_WAITER_NAME
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if event.event_id() == self.event_id {
            let _ = self.done.try_send(());
        }
        Ok(())
    }
}

fn health_report(registry: &HandlerRegistry, dispatcher: &EventDispatcher) -> HealthReport {
    let metrics = dispatcher.metrics();
    let failure_rate = if metrics.published == 0 {
        0.0
    } else {
        metrics.failed as f64 / metrics.published as f64
    };

    HealthReport {
        validation_error: registry.validate_handlers().err().map(|e| e.to_string()),
        published: metrics.published,
        processed: metrics.processed,
        failed: metrics.failed,
        panicked: metrics.panicked,
        failure_rate,
        registered_handlers: registry.handler_count(),
    }
}

fn log_health(report: &HealthReport) {
    if let Some(reason) = &report.validation_error {
        warn!(error = %reason, "handler validation errors found");
    }
    if report.failed > 0 {
        warn!(
            failed_events = report.failed,
            total_events = report.published,
            failure_rate = report.failure_rate,
            "event processing failures detected"
        );
    }
    debug!(
        published_events = report.published,
        processed_events = report.processed,
        failed_events = report.failed,
        handler_panics = report.panicked,
        registered_handlers = report.registered_handlers,
        "event manager health check completed"
    );
}

fn spawn_periodic<F>(token: CancellationToken, interval: Duration, mut f: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 首个 tick 立即完成，跳过它让第一次检查落在一个周期之后
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f(),
            }
        }
    })
}
