//! 持久化（persist）
//!
//! 定义事件存储与快速访问缓存的协议及实现：
//! - 事件存储（`EventStore`）：持久记录每条分发的事件及其投递状态，是重放与失败排查的事实来源；
//! - 键值存储边界（`KeyValueStore`）与最近事件缓存（`RecentEventCache`）；
//! - 持久化处理器（`PersistentEventHandler`）与基于存储的投递标记（`StoreDeliveryMarker`）。
//!
//! 内存实现用于测试与单进程场景，Postgres 实现位于 `infra-sqlx` 特性之后。
//!
mod delivery_marker;
mod event_record;
mod event_store;
mod kv;
mod kv_inmemory;
mod persistent_handler;
mod recent_cache;
mod store_inmemory;
#[cfg(feature = "infra-sqlx")]
mod store_postgres;

pub use delivery_marker::StoreDeliveryMarker;
pub use event_record::{EventRecord, EventStatus};
pub use event_store::{EventStore, EventStoreConfig};
pub use kv::KeyValueStore;
pub use kv_inmemory::InMemoryKeyValueStore;
pub use persistent_handler::{PERSISTENT_HANDLER_NAME, PersistentEventHandler};
pub use recent_cache::{
    EVENT_TYPES_KEY, RECENT_EVENTS_KEY, RecentCacheConfig, RecentEventCache, event_type_key,
};
pub use store_inmemory::InMemoryEventStore;
#[cfg(feature = "infra-sqlx")]
pub use store_postgres::{PgEventStore, SCHEMA};
