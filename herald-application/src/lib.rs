//! herald 应用层
//!
//! 在领域库之上提供开箱即用的装配：
//! - `EventManager`：一次性构建存储、缓存、分发器、注册表与重放器；
//! - 标准处理器（日志、按类型统计）与处理器组合器；
//! - 事件类型目录与强类型载荷；
//! - tracing 初始化。
//!
pub mod combinators;
pub mod error;
pub mod event_types;
pub mod manager;
pub mod payloads;
pub mod standard_handlers;
pub mod telemetry;

pub use combinators::{
    AsyncEventHandler, ChainEventHandler, ConditionalEventHandler, EventCondition,
    EventTypeFilter, PayloadCondition, TimeWindowCondition,
};
pub use error::{AppError, AppResult};
pub use manager::{EventManager, EventManagerConfig, HealthReport};
pub use standard_handlers::{LoggingEventHandler, MetricsEventHandler, TypeMetrics};
pub use telemetry::{LogFormat, init_tracing};
