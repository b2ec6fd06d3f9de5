//! 事件分发器（EventDispatcher）
//!
//! 统一编排“入队 → 工作者处理 → 重试 → 指标报告”的长驻任务：
//! - `publish` 非阻塞写入有界入口队列，满时返回容量错误；
//! - 固定数量的工作者共享入口队列，按订阅顺序依次调用处理器（独立任务 + 超时 + panic 隔离）；
//! - 处理失败的事件进入有界重试队列，由重试工作者按固定间隔每次取出一条重新处理；
//! - 周期报告指标；
//! - `shutdown` 停止接收、取消任务并等待全部任务退出。
//!
use super::bus::{EventBus, SubscribeOptions, SubscriptionId, WILDCARD_EVENT_TYPE};
use super::{DeliveryMarker, DispatcherMetrics, EventHandler, MetricsSnapshot};
use crate::error::{EventError, EventResult as Result};
use crate::event::{Event, EventWrapper};
use bon::bon;
use flume::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INGRESS_QUEUE: &str = "ingress";
const RETRY_QUEUE: &str = "retry";
const RETRY_WORKER_ID: usize = usize::MAX;

/// 分发器配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 入口队列容量
    pub queue_size: usize,
    /// 重试队列容量，缺省为入口队列的一半
    pub retry_queue_size: Option<usize>,
    /// 工作者数量
    pub worker_count: usize,
    /// 单个事件的最大处理尝试次数
    pub max_retries: u32,
    /// 重试工作者的取出间隔
    #[serde(with = "crate::serde_ext::duration_ms")]
    pub retry_interval: Duration,
    /// 单个处理器调用的超时
    #[serde(with = "crate::serde_ext::duration_ms")]
    pub handler_timeout: Duration,
    /// 是否周期报告指标
    pub enable_metrics: bool,
    #[serde(with = "crate::serde_ext::duration_ms")]
    pub metrics_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: 1000,
            retry_queue_size: None,
            worker_count: 5,
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            handler_timeout: Duration::from_secs(30),
            enable_metrics: true,
            metrics_interval: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    pub fn effective_queue_size(&self) -> usize {
        self.queue_size.max(1)
    }

    pub fn effective_retry_queue_size(&self) -> usize {
        self.retry_queue_size
            .unwrap_or(self.queue_size / 2)
            .max(1)
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    options: SubscribeOptions,
}

struct DispatcherInner {
    config: DispatcherConfig,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    next_subscription: AtomicU64,
    metrics: DispatcherMetrics,
    marker: Option<Arc<dyn DeliveryMarker>>,
    ingress_tx: Sender<EventWrapper>,
    ingress_rx: Receiver<EventWrapper>,
    retry_tx: Sender<EventWrapper>,
    retry_rx: Receiver<EventWrapper>,
    closed: AtomicBool,
    token: CancellationToken,
}

/// EventDispatcher：
/// - 有界入口队列 + 工作者池
/// - 有界重试队列 + 固定间隔的重试工作者
/// - 按类型与通配符解析订阅，按订阅顺序调用
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[bon]
impl EventDispatcher {
    #[builder]
    pub fn new(
        #[builder(default)] config: DispatcherConfig,
        marker: Option<Arc<dyn DeliveryMarker>>,
    ) -> Self {
        let (ingress_tx, ingress_rx) = flume::bounded(config.effective_queue_size());
        let (retry_tx, retry_rx) = flume::bounded(config.effective_retry_queue_size());

        Self {
            inner: Arc::new(DispatcherInner {
                config,
                subscriptions: RwLock::new(HashMap::new()),
                next_subscription: AtomicU64::new(0),
                metrics: DispatcherMetrics::new(),
                marker,
                ingress_tx,
                ingress_rx,
                retry_tx,
                retry_rx,
                closed: AtomicBool::new(false),
                token: CancellationToken::new(),
            }),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

impl EventDispatcher {
    /// 启动工作者、重试工作者与指标报告任务；重复调用无副作用
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = &self.inner;
        let config = inner.config;
        let worker_count = config.worker_count.max(1);
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count + 2);

        // event workers（长循环）
        for worker_id in 0..worker_count {
            tasks.push(tokio::spawn(Self::worker_loop(
                inner.clone(),
                inner.token.clone(),
                worker_id,
            )));
        }

        // retry worker（周期任务，每次最多取出一条）
        {
            let inner = inner.clone();
            tasks.push(Self::spawn_periodic(
                self.inner.token.clone(),
                config.retry_interval,
                move || {
                    let inner = inner.clone();
                    async move {
                        if let Ok(wrapper) = inner.retry_rx.try_recv() {
                            debug!(
                                event_type = wrapper.event().event_type(),
                                attempts = wrapper.attempts(),
                                "retrying event"
                            );
                            inner.process(wrapper, RETRY_WORKER_ID).await;
                        }
                    }
                },
            ));
        }

        // metrics reporter（周期任务）
        if config.enable_metrics {
            let inner = inner.clone();
            tasks.push(Self::spawn_periodic(
                self.inner.token.clone(),
                config.metrics_interval,
                move || {
                    let inner = inner.clone();
                    async move {
                        let m = &inner.metrics;
                        info!(
                            published = m.published(),
                            processed = m.processed(),
                            failed = m.failed(),
                            retried = m.retried(),
                            panicked = m.panicked(),
                            avg_processing_ms = m.average_processing_time().as_millis() as u64,
                            queue_len = inner.ingress_rx.len(),
                            retry_queue_len = inner.retry_rx.len(),
                            "event dispatcher metrics"
                        );
                    }
                },
            ));
        }

        info!(
            workers = worker_count,
            queue_size = config.effective_queue_size(),
            retry_queue_size = config.effective_retry_queue_size(),
            "event dispatcher started"
        );
        self.tasks.lock().extend(tasks);
    }

    /// 停止接收新事件，取消所有任务并等待其退出；
    /// 工作者完成手头事件后退出，仍在队列中的事件被丢弃并记录日志
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        futures_util::future::join_all(tasks).await;

        let dropped = self.inner.ingress_rx.len() + self.inner.retry_rx.len();
        if dropped > 0 {
            warn!(dropped, "event dispatcher stopped with queued events");
        }
        info!("event dispatcher stopped");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn metrics_ref(&self) -> &DispatcherMetrics {
        &self.inner.metrics
    }

    /// 当前订阅指定类型（不含通配订阅）的处理器数量
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// 存在订阅的事件类型（含通配符 `*`）
    pub fn list_event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .subscriptions
            .read()
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        types.sort();
        types
    }

    pub fn queue_len(&self) -> usize {
        self.inner.ingress_rx.len()
    }

    pub fn retry_queue_len(&self) -> usize {
        self.inner.retry_rx.len()
    }

    fn spawn_periodic<F, Fut>(
        token: CancellationToken,
        interval: Duration,
        mut f: F,
    ) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => f().await,
                }
            }
        })
    }

    async fn worker_loop(inner: Arc<DispatcherInner>, token: CancellationToken, worker_id: usize) {
        debug!(worker_id, "event worker started");
        let rx = inner.ingress_rx.clone();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    break;
                }
                next = rx.recv_async() => {
                    match next {
                        Ok(wrapper) => inner.process(wrapper, worker_id).await,
                        Err(_) => break,
                    }
                }
            }
        }
        debug!(worker_id, "event worker stopped");
    }
}

impl DispatcherInner {
    /// 按全局订阅顺序合并类型订阅与通配订阅
    fn resolve(&self, event_type: &str) -> Vec<Subscription> {
        let subscriptions = self.subscriptions.read();
        let mut merged: Vec<Subscription> = Vec::new();
        if let Some(list) = subscriptions.get(event_type) {
            merged.extend(list.iter().cloned());
        }
        if event_type != WILDCARD_EVENT_TYPE {
            if let Some(list) = subscriptions.get(WILDCARD_EVENT_TYPE) {
                merged.extend(list.iter().cloned());
            }
        }
        merged.sort_by_key(|s| (s.options.order.unwrap_or(s.id.value()), s.id));
        merged
    }

    async fn process(&self, mut wrapper: EventWrapper, worker_id: usize) {
        let event = wrapper.event().clone();
        let subscriptions = self.resolve(event.event_type());
        if subscriptions.is_empty() {
            debug!(
                event_type = event.event_type(),
                "no handlers registered for event"
            );
            return;
        }

        let started = Instant::now();
        let mut permanently_failed = false;

        for sub in subscriptions {
            let timeout = sub.options.timeout.unwrap_or(self.config.handler_timeout);
            let max_attempts = sub.options.max_retries.unwrap_or(self.config.max_retries);

            let Err(err) = self.invoke(&sub, &event, timeout).await else {
                continue;
            };

            let reason = err.to_string();
            let attempts = wrapper.record_failure(reason.clone());
            self.mark_failed(&event, &reason).await;

            if attempts < max_attempts {
                self.metrics.record_retried();
                warn!(
                    worker_id,
                    event_type = event.event_type(),
                    event_id = event.event_id(),
                    handler = sub.handler.handler_name(),
                    attempts,
                    error = %err,
                    "event handler failed, scheduling retry"
                );
                if let Err(e) = self.retry_tx.try_send(wrapper) {
                    let capacity = self.config.effective_retry_queue_size();
                    match e {
                        TrySendError::Full(_) => warn!(
                            event_type = event.event_type(),
                            event_id = event.event_id(),
                            queue = RETRY_QUEUE,
                            capacity,
                            "retry queue is full, dropping event"
                        ),
                        TrySendError::Disconnected(_) => warn!(
                            event_type = event.event_type(),
                            event_id = event.event_id(),
                            "retry queue closed, dropping event"
                        ),
                    }
                    self.metrics.record_failed(event.event_type());
                }
                // 剩余处理器在重试时一并重新调用
                return;
            }

            error!(
                worker_id,
                event_type = event.event_type(),
                event_id = event.event_id(),
                handler = sub.handler.handler_name(),
                attempts,
                error = %err,
                "event permanently failed"
            );
            self.metrics.record_failed(event.event_type());
            permanently_failed = true;
        }

        if permanently_failed {
            return;
        }

        wrapper.mark_processed();
        let elapsed = started.elapsed();
        if let Some(marker) = &self.marker {
            if let Err(err) = marker.mark_processed(&event).await {
                warn!(event_id = event.event_id(), error = %err, "failed to mark event processed");
            }
        }
        self.metrics.record_processed(elapsed);
        debug!(
            worker_id,
            event_type = event.event_type(),
            event_id = event.event_id(),
            attempts = wrapper.attempts() + 1,
            "event processed"
        );
    }

    /// 在独立任务中调用处理器：超时后放弃等待（任务不会被中止），panic 转换为错误
    async fn invoke(&self, sub: &Subscription, event: &Arc<Event>, timeout: Duration) -> Result<()> {
        let handler = sub.handler.clone();
        let name = handler.handler_name().to_string();
        let ev = event.clone();
        let task = tokio::spawn(async move { handler.handle(&ev).await });

        match time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(EventError::HandlerFailed {
                handler: name,
                reason: format!("{err:#}"),
            }),
            Ok(Err(join_err)) if join_err.is_panic() => {
                self.metrics.record_panicked();
                let message = panic_message(join_err.into_panic());
                error!(
                    handler = %name,
                    event_type = event.event_type(),
                    event_id = event.event_id(),
                    panic = %message,
                    "event handler panicked"
                );
                Err(EventError::HandlerPanic {
                    handler: name,
                    message,
                })
            }
            Ok(Err(join_err)) => Err(EventError::HandlerFailed {
                handler: name,
                reason: join_err.to_string(),
            }),
            Err(_) => {
                warn!(
                    handler = %name,
                    event_type = event.event_type(),
                    timeout_ms = timeout.as_millis() as u64,
                    "event handler timed out"
                );
                Err(EventError::HandlerTimeout {
                    handler: name,
                    timeout_ms: timeout.as_millis(),
                })
            }
        }
    }

    async fn mark_failed(&self, event: &Event, reason: &str) {
        if let Some(marker) = &self.marker {
            if let Err(err) = marker.mark_failed(event, reason).await {
                warn!(event_id = event.event_id(), error = %err, "failed to mark event failed");
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl EventBus for EventDispatcher {
    fn publish(&self, event: Event) -> Result<()> {
        if self.is_shutting_down() || self.inner.token.is_cancelled() {
            return Err(EventError::ShuttingDown);
        }

        let event_type = event.event_type().to_string();
        match self.inner.ingress_tx.try_send(EventWrapper::new(event)) {
            Ok(()) => {
                self.inner.metrics.record_published(&event_type);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                let capacity = self.inner.config.effective_queue_size();
                warn!(event_type = %event_type, capacity, "event queue is full");
                Err(EventError::Capacity {
                    queue: INGRESS_QUEUE,
                    capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(EventError::ShuttingDown),
        }
    }

    fn subscribe_with(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId> {
        if event_type.is_empty() {
            return Err(EventError::validation("event type must not be empty"));
        }

        let id = SubscriptionId::new(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        let name = handler.handler_name().to_string();
        self.inner
            .subscriptions
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription {
                id,
                handler,
                options,
            });

        info!(event_type, handler = %name, subscription = %id, "event handler subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()> {
        let mut subscriptions = self.inner.subscriptions.write();
        let Some(list) = subscriptions.get_mut(event_type) else {
            return Err(EventError::not_found(format!(
                "no subscriptions for event type {event_type}"
            )));
        };

        let Some(pos) = list.iter().position(|s| s.id == subscription) else {
            return Err(EventError::not_found(format!(
                "subscription {subscription} for event type {event_type}"
            )));
        };

        let removed = list.remove(pos);
        if list.is_empty() {
            subscriptions.remove(event_type);
        }

        info!(
            event_type,
            handler = removed.handler.handler_name(),
            subscription = %subscription,
            "event handler unsubscribed"
        );
        Ok(())
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.inner.token.cancel();
    }
}
