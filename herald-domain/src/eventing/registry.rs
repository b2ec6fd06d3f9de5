//! 处理器注册表（HandlerRegistry）
//!
//! 在事件总线之上维护“事件类型 → 处理器”的注册信息：
//! - 以 `(event_type, handler)` 去重，注册时向总线订阅，订阅失败则不留下任何状态；
//! - 每条注册返回 `HandlerId`（槽位下标 + 代数），用于启用、停用与注销；
//! - 停用只取消总线订阅，保留元数据，可再次启用；
//! - 查询接口均返回拷贝。
//!
use super::bus::{EventBus, SubscribeOptions, SubscriptionId};
use super::EventHandler;
use crate::error::{EventError, EventResult as Result};
use bon::Builder;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_HANDLER_PRIORITY: i32 = 100;
pub const DEFAULT_HANDLER_VERSION: &str = "1.0.0";

/// 注册句柄：槽位被复用后旧句柄因代数不同而失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerId {
    index: u32,
    generation: u32,
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}v{}", self.index, self.generation)
    }
}

/// 处理器元数据
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct HandlerMetadata {
    #[builder(into)]
    pub name: String,
    #[builder(default = DEFAULT_HANDLER_PRIORITY)]
    pub priority: i32,
    /// 覆盖分发器的处理超时
    #[serde(default, with = "optional_duration_ms")]
    pub timeout: Option<Duration>,
    /// 覆盖分发器的最大尝试次数
    pub retry_count: Option<u32>,
}

impl HandlerMetadata {
    fn for_handler(handler: &dyn EventHandler) -> Self {
        Self::builder().name(handler.handler_name()).build()
    }

    fn subscribe_options(&self, order: Option<u64>) -> SubscribeOptions {
        SubscribeOptions {
            timeout: self.timeout,
            max_retries: self.retry_count,
            order,
        }
    }
}

/// 处理器描述信息
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct HandlerInfo {
    #[builder(into)]
    pub name: String,
    #[builder(into, default)]
    pub kind: String,
    #[builder(into, default)]
    pub description: String,
    #[builder(into, default = DEFAULT_HANDLER_VERSION.to_string())]
    pub version: String,
    #[builder(default = true)]
    pub enabled: bool,
}

impl HandlerInfo {
    fn for_handler(handler: &dyn EventHandler) -> Self {
        Self::builder()
            .name(handler.handler_name())
            .kind(handler.handler_kind())
            .build()
    }
}

/// 批量注册的单条输入
#[derive(Clone, Builder)]
pub struct HandlerRegistration {
    #[builder(into)]
    pub event_type: String,
    pub handler: Arc<dyn EventHandler>,
    pub metadata: Option<HandlerMetadata>,
    pub info: Option<HandlerInfo>,
}

/// 注册信息拷贝（查询结果）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredHandler {
    pub id: HandlerId,
    pub event_type: String,
    pub metadata: HandlerMetadata,
    pub info: HandlerInfo,
    pub subscribed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total_handlers: usize,
    pub enabled_handlers: usize,
    pub disabled_handlers: usize,
    pub event_types: usize,
    pub handlers_by_type: HashMap<String, usize>,
}

struct Registration {
    event_type: String,
    handler: Arc<dyn EventHandler>,
    metadata: HandlerMetadata,
    info: HandlerInfo,
    subscription: Option<SubscriptionId>,
    /// 首次订阅时确定的分发顺序，禁用再启用后沿用
    order: Option<u64>,
}

impl Registration {
    fn snapshot(&self, id: HandlerId) -> RegisteredHandler {
        RegisteredHandler {
            id,
            event_type: self.event_type.clone(),
            metadata: self.metadata.clone(),
            info: self.info.clone(),
            subscribed: self.subscription.is_some(),
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Registration>,
}

#[derive(Default)]
struct RegistryState {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_type: HashMap<String, Vec<HandlerId>>,
}

impl RegistryState {
    fn get(&self, id: HandlerId) -> Option<&Registration> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_ref())
    }

    fn get_mut(&mut self, id: HandlerId) -> Option<&mut Registration> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_mut())
    }

    fn insert(&mut self, registration: Registration) -> HandlerId {
        let event_type = registration.event_type.clone();
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(registration);
                HandlerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(registration),
                });
                HandlerId {
                    index,
                    generation: 0,
                }
            }
        };
        self.by_type.entry(event_type).or_default().push(id);
        id
    }

    fn remove(&mut self, id: HandlerId) -> Option<Registration> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)?;
        let registration = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        if let Some(ids) = self.by_type.get_mut(&registration.event_type) {
            ids.retain(|x| *x != id);
            if ids.is_empty() {
                self.by_type.remove(&registration.event_type);
            }
        }
        Some(registration)
    }

    fn find(&self, event_type: &str, handler: &Arc<dyn EventHandler>) -> Option<HandlerId> {
        let target = handler_addr(handler);
        self.by_type.get(event_type)?.iter().copied().find(|id| {
            self.get(*id)
                .is_some_and(|r| handler_addr(&r.handler) == target)
        })
    }

    fn iter(&self) -> impl Iterator<Item = (HandlerId, &Registration)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|r| {
                (
                    HandlerId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    r,
                )
            })
        })
    }
}

fn handler_addr(handler: &Arc<dyn EventHandler>) -> *const () {
    Arc::as_ptr(handler) as *const ()
}

pub struct HandlerRegistry {
    bus: Arc<dyn EventBus>,
    state: RwLock<RegistryState>,
}

impl HandlerRegistry {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// 注册处理器：缺省元数据优先级 100，缺省信息为启用；启用时立即向总线订阅
    pub fn register_handler(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        metadata: Option<HandlerMetadata>,
        info: Option<HandlerInfo>,
    ) -> Result<HandlerId> {
        if event_type.is_empty() {
            return Err(EventError::validation("event type must not be empty"));
        }

        let metadata = metadata.unwrap_or_else(|| HandlerMetadata::for_handler(handler.as_ref()));
        let info = info.unwrap_or_else(|| HandlerInfo::for_handler(handler.as_ref()));

        let mut state = self.state.write();
        if state.find(event_type, &handler).is_some() {
            return Err(EventError::duplicate(format!(
                "handler {} already registered for event type {event_type}",
                metadata.name
            )));
        }

        let subscription = if info.enabled {
            match self
                .bus
                .subscribe_with(event_type, handler.clone(), metadata.subscribe_options(None))
            {
                Ok(id) => Some(id),
                Err(err) => {
                    warn!(
                        event_type,
                        handler = %metadata.name,
                        error = %err,
                        "handler subscription failed, registration rolled back"
                    );
                    return Err(err);
                }
            }
        } else {
            None
        };

        let name = metadata.name.clone();
        let id = state.insert(Registration {
            event_type: event_type.to_string(),
            handler,
            metadata,
            info,
            subscription,
            order: subscription.map(|s| s.value()),
        });

        info!(event_type, handler = %name, id = %id, "event handler registered");
        Ok(id)
    }

    /// 按句柄注销
    pub fn unregister(&self, id: HandlerId) -> Result<()> {
        let mut state = self.state.write();
        let Some(registration) = state.get(id) else {
            return Err(EventError::not_found(format!("handler {id}")));
        };

        if let Some(subscription) = registration.subscription {
            self.bus.unsubscribe(&registration.event_type, subscription)?;
        }

        if let Some(registration) = state.remove(id) {
            info!(
                event_type = %registration.event_type,
                handler = %registration.metadata.name,
                id = %id,
                "event handler unregistered"
            );
        }
        Ok(())
    }

    /// 按 `(event_type, handler)` 注销
    pub fn unregister_handler(
        &self,
        event_type: &str,
        handler: &Arc<dyn EventHandler>,
    ) -> Result<()> {
        let id = self.state.read().find(event_type, handler).ok_or_else(|| {
            EventError::not_found(format!(
                "handler {} for event type {event_type}",
                handler.handler_name()
            ))
        })?;
        self.unregister(id)
    }

    pub fn enable_handler(&self, id: HandlerId) -> Result<()> {
        let mut state = self.state.write();
        let Some(registration) = state.get_mut(id) else {
            return Err(EventError::not_found(format!("handler {id}")));
        };

        if registration.subscription.is_none() {
            let subscription = self.bus.subscribe_with(
                &registration.event_type,
                registration.handler.clone(),
                registration.metadata.subscribe_options(registration.order),
            )?;
            registration.subscription = Some(subscription);
            registration.order.get_or_insert(subscription.value());
        }
        registration.info.enabled = true;

        info!(handler = %registration.metadata.name, id = %id, "event handler enabled");
        Ok(())
    }

    pub fn disable_handler(&self, id: HandlerId) -> Result<()> {
        let mut state = self.state.write();
        let Some(registration) = state.get_mut(id) else {
            return Err(EventError::not_found(format!("handler {id}")));
        };

        if let Some(subscription) = registration.subscription {
            self.bus
                .unsubscribe(&registration.event_type, subscription)?;
            registration.subscription = None;
        }
        registration.info.enabled = false;

        info!(handler = %registration.metadata.name, id = %id, "event handler disabled");
        Ok(())
    }

    pub fn handler_info(&self, id: HandlerId) -> Result<HandlerInfo> {
        self.state
            .read()
            .get(id)
            .map(|r| r.info.clone())
            .ok_or_else(|| EventError::not_found(format!("handler {id}")))
    }

    pub fn list_handlers(&self) -> Vec<RegisteredHandler> {
        let state = self.state.read();
        state.iter().map(|(id, r)| r.snapshot(id)).collect()
    }

    /// 按注册顺序返回指定类型的处理器
    pub fn list_handlers_by_event_type(&self, event_type: &str) -> Vec<RegisteredHandler> {
        let state = self.state.read();
        state
            .by_type
            .get(event_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.get(*id).map(|r| r.snapshot(*id)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list_event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.state.read().by_type.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn handler_count(&self) -> usize {
        self.state.read().iter().count()
    }

    pub fn event_type_count(&self) -> usize {
        self.state.read().by_type.len()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        let state = self.state.read();
        let mut stats = RegistryStats {
            event_types: state.by_type.len(),
            ..Default::default()
        };
        for (_, r) in state.iter() {
            stats.total_handlers += 1;
            if r.info.enabled {
                stats.enabled_handlers += 1;
            } else {
                stats.disabled_handlers += 1;
            }
            *stats
                .handlers_by_type
                .entry(r.event_type.clone())
                .or_default() += 1;
        }
        stats
    }

    /// 只读校验：收集所有结构性问题，一并返回
    pub fn validate_handlers(&self) -> Result<()> {
        let state = self.state.read();
        let mut issues: Vec<String> = Vec::new();

        for (id, r) in state.iter() {
            if r.event_type.is_empty() {
                issues.push(format!("{id}: empty event type"));
            }
            if r.metadata.name.trim().is_empty() {
                issues.push(format!("{id}: empty handler name"));
            }
            if r.metadata.timeout.is_some_and(|t| t.is_zero()) {
                issues.push(format!("{id}: zero timeout override"));
            }
            if r.metadata.retry_count == Some(0) {
                issues.push(format!("{id}: zero retry count override"));
            }
            match (r.info.enabled, r.subscription.is_some()) {
                (true, false) => issues.push(format!("{id}: enabled but not subscribed")),
                (false, true) => issues.push(format!("{id}: disabled but still subscribed")),
                _ => {}
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(EventError::validation(issues.join("; ")))
        }
    }

    /// 逐条尝试注册，失败项汇总为一个错误；成功项保持注册
    pub fn batch_register_handlers(
        &self,
        registrations: Vec<HandlerRegistration>,
    ) -> Result<Vec<HandlerId>> {
        let mut ids = Vec::with_capacity(registrations.len());
        let mut failures = Vec::new();

        for reg in registrations {
            let name = reg
                .metadata
                .as_ref()
                .map(|m| m.name.clone())
                .unwrap_or_else(|| reg.handler.handler_name().to_string());
            match self.register_handler(&reg.event_type, reg.handler, reg.metadata, reg.info) {
                Ok(id) => ids.push(id),
                Err(err) => failures.push(format!("{}/{name}: {err}", reg.event_type)),
            }
        }

        if failures.is_empty() {
            Ok(ids)
        } else {
            Err(EventError::BatchRegistration { failures })
        }
    }
}

mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => crate::serde_ext::duration_ms::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Named(&'static str);

    #[async_trait]
    impl EventHandler for Named {
        fn handler_name(&self) -> &str {
            self.0
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 记录订阅调用的总线替身，可配置为订阅失败
    #[derive(Default)]
    struct SpyBus {
        fail_subscribe: bool,
        next: Mutex<u64>,
        active: Mutex<Vec<(String, SubscriptionId)>>,
    }

    impl EventBus for SpyBus {
        fn publish(&self, _event: Event) -> Result<()> {
            Ok(())
        }

        fn subscribe_with(
            &self,
            event_type: &str,
            _handler: Arc<dyn EventHandler>,
            _options: SubscribeOptions,
        ) -> Result<SubscriptionId> {
            if self.fail_subscribe {
                return Err(EventError::persistence("bus down"));
            }
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let id = SubscriptionId::new(*next);
            self.active
                .lock()
                .unwrap()
                .push((event_type.to_string(), id));
            Ok(id)
        }

        fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()> {
            let mut active = self.active.lock().unwrap();
            let before = active.len();
            active.retain(|(t, id)| !(t == event_type && *id == subscription));
            if active.len() == before {
                return Err(EventError::not_found("subscription"));
            }
            Ok(())
        }
    }

    fn registry() -> (Arc<SpyBus>, HandlerRegistry) {
        let bus = Arc::new(SpyBus::default());
        (bus.clone(), HandlerRegistry::new(bus))
    }

    #[test]
    fn register_applies_defaults_and_subscribes() {
        let (bus, registry) = registry();
        let id = registry
            .register_handler("vote.cast", Arc::new(Named("stats")), None, None)
            .unwrap();

        let info = registry.handler_info(id).unwrap();
        assert_eq!(info.name, "stats");
        assert!(info.enabled);
        assert!(info.kind.ends_with("Named"));

        let listed = registry.list_handlers_by_event_type("vote.cast");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata.priority, DEFAULT_HANDLER_PRIORITY);
        assert!(listed[0].subscribed);
        assert_eq!(bus.active.lock().unwrap().len(), 1);
    }

    #[test]
    fn same_handler_twice_for_same_type_is_duplicate() {
        let (_bus, registry) = registry();
        let h: Arc<dyn EventHandler> = Arc::new(Named("stats"));
        registry
            .register_handler("vote.cast", h.clone(), None, None)
            .unwrap();

        let err = registry
            .register_handler("vote.cast", h.clone(), None, None)
            .unwrap_err();
        assert!(err.is_duplicate());
        // 不同类型允许
        assert!(registry.register_handler("page.view", h, None, None).is_ok());
    }

    #[test]
    fn failed_subscription_leaves_no_registration() {
        let bus = Arc::new(SpyBus {
            fail_subscribe: true,
            ..Default::default()
        });
        let registry = HandlerRegistry::new(bus);

        assert!(registry
            .register_handler("vote.cast", Arc::new(Named("stats")), None, None)
            .is_err());
        assert_eq!(registry.handler_count(), 0);
        assert!(registry.list_event_types().is_empty());
    }

    #[test]
    fn disable_and_enable_toggle_subscription_only() {
        let (bus, registry) = registry();
        let metadata = HandlerMetadata::builder()
            .name("notifier")
            .priority(10)
            .retry_count(5)
            .build();
        let id = registry
            .register_handler("vote.cast", Arc::new(Named("n")), Some(metadata), None)
            .unwrap();

        registry.disable_handler(id).unwrap();
        assert!(bus.active.lock().unwrap().is_empty());
        assert!(!registry.handler_info(id).unwrap().enabled);
        assert_eq!(registry.registry_stats().disabled_handlers, 1);

        registry.enable_handler(id).unwrap();
        assert_eq!(bus.active.lock().unwrap().len(), 1);
        let listed = registry.list_handlers();
        assert_eq!(listed[0].metadata.name, "notifier");
        assert_eq!(listed[0].metadata.priority, 10);
        assert!(registry.validate_handlers().is_ok());
    }

    #[test]
    fn stale_id_is_not_found_after_slot_reuse() {
        let (_bus, registry) = registry();
        let a: Arc<dyn EventHandler> = Arc::new(Named("a"));
        let old = registry
            .register_handler("t", a.clone(), None, None)
            .unwrap();
        registry.unregister_handler("t", &a).unwrap();

        let new = registry
            .register_handler("t", Arc::new(Named("b")), None, None)
            .unwrap();
        assert_ne!(old, new);
        assert!(registry.handler_info(old).unwrap_err().is_not_found());
        assert!(registry.unregister(old).unwrap_err().is_not_found());
        assert_eq!(registry.handler_info(new).unwrap().name, "b");
        assert!(registry
            .unregister_handler("t", &a)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn disabled_registration_does_not_subscribe() {
        let (bus, registry) = registry();
        let info = HandlerInfo::builder().name("quiet").enabled(false).build();
        registry
            .register_handler("t", Arc::new(Named("quiet")), None, Some(info))
            .unwrap();
        assert!(bus.active.lock().unwrap().is_empty());
        assert_eq!(registry.registry_stats().enabled_handlers, 0);
    }

    #[test]
    fn validate_reports_zero_overrides() {
        let (_bus, registry) = registry();
        let metadata = HandlerMetadata::builder()
            .name("bad")
            .timeout(Duration::ZERO)
            .build();
        registry
            .register_handler("t", Arc::new(Named("bad")), Some(metadata), None)
            .unwrap();

        let err = registry.validate_handlers().unwrap_err();
        assert!(err.to_string().contains("zero timeout override"));
        // 校验不修改状态
        assert_eq!(registry.handler_count(), 1);
    }

    #[test]
    fn batch_register_aggregates_failures() {
        let (_bus, registry) = registry();
        let dup: Arc<dyn EventHandler> = Arc::new(Named("dup"));
        let regs = vec![
            HandlerRegistration::builder()
                .event_type("a")
                .handler(dup.clone())
                .build(),
            HandlerRegistration::builder()
                .event_type("a")
                .handler(dup.clone())
                .build(),
            HandlerRegistration::builder()
                .event_type("")
                .handler(Arc::new(Named("empty")) as Arc<dyn EventHandler>)
                .build(),
            HandlerRegistration::builder()
                .event_type("b")
                .handler(Arc::new(Named("ok")) as Arc<dyn EventHandler>)
                .build(),
        ];

        match registry.batch_register_handlers(regs).unwrap_err() {
            EventError::BatchRegistration { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].starts_with("a/dup"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.handler_count(), 2);
        assert_eq!(registry.list_event_types(), vec!["a", "b"]);
        let stats = registry.registry_stats();
        assert_eq!(stats.total_handlers, 2);
        assert_eq!(stats.handlers_by_type.get("a"), Some(&1));
    }
}
