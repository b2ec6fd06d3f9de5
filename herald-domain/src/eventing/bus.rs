//! 事件总线（EventBus）协议
//!
//! 生产者唯一入口为非阻塞的 `publish`；订阅以 `SubscriptionId` 标识，
//! 注册表与测试替身都只依赖本协议。
//!
use crate::error::EventResult as Result;
use crate::event::Event;
use crate::eventing::EventHandler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 通配事件类型：订阅后接收所有类型的事件
pub const WILDCARD_EVENT_TYPE: &str = "*";

/// 订阅标识，单调递增，缺省同时作为全局订阅顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// 单个订阅的覆盖参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// 覆盖全局处理超时
    pub timeout: Option<Duration>,
    /// 覆盖全局最大尝试次数
    pub max_retries: Option<u32>,
    /// 分发顺序键，缺省取订阅标识；重新订阅时传入原值可保持原有次序
    pub order: Option<u64>,
}

/// 事件总线：发布与订阅管理
pub trait EventBus: Send + Sync {
    /// 非阻塞发布；队列满时返回容量错误，关闭中返回 ShuttingDown
    fn publish(&self, event: Event) -> Result<()>;

    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) -> Result<SubscriptionId> {
        self.subscribe_with(event_type, handler, SubscribeOptions::default())
    }

    fn subscribe_with(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId>;

    fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()>;
}

impl<T> EventBus for Arc<T>
where
    T: EventBus + ?Sized,
{
    fn publish(&self, event: Event) -> Result<()> {
        (**self).publish(event)
    }

    fn subscribe_with(
        &self,
        event_type: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId> {
        (**self).subscribe_with(event_type, handler, options)
    }

    fn unsubscribe(&self, event_type: &str, subscription: SubscriptionId) -> Result<()> {
        (**self).unsubscribe(event_type, subscription)
    }
}
