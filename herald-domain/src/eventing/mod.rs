//! 事件子系统（eventing）
//!
//! 提供进程内事件发布/订阅与处理的基础抽象与运行时：
//! - `EventBus`：统一发布/订阅接口；
//! - `EventHandler`：对事件进行消费处理；
//! - `EventDispatcher`：有界队列 + 工作者池 + 重试队列，隔离执行各处理器；
//! - `HandlerRegistry`：处理器注册、启停与查询；
//! - `DeliveryMarker`：每次处理尝试结果的上报接口。
//!
pub mod bus;
pub mod dispatcher;
pub mod handler;
pub mod marker;
pub mod metrics;
pub mod registry;

pub use bus::{EventBus, SubscribeOptions, SubscriptionId, WILDCARD_EVENT_TYPE};
pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use handler::EventHandler;
pub use marker::DeliveryMarker;
pub use metrics::{DispatcherMetrics, EventTypeStats, MetricsSnapshot};
pub use registry::{
    HandlerId, HandlerInfo, HandlerMetadata, HandlerRegistration, HandlerRegistry,
    RegisteredHandler, RegistryStats,
};
