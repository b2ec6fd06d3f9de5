//! 事件分发、持久化与重放领域库（herald-domain）
//!
//! 提供进程内事件驱动骨架的通用构件：
//! - 事件模型（`event`）与统一错误（`error`）
//! - 事件系统（`eventing`）：总线协议、分发器、处理器注册表与指标
//! - 持久化（`persist`）：事件存储、快速访问缓存与持久化处理器
//! - 重放（`replay`）：按时间窗口与批次将历史事件重新注入分发器
//!
//! 存储后端仅以接口形式出现，内存实现用于测试与单进程场景，
//! Postgres 实现位于 `infra-sqlx` 特性之后。
//!
//! 典型用法：
//! 1. 构建 `EventDispatcher` 并 `start`；
//! 2. 用 `HandlerRegistry` 注册处理器（含 `PersistentEventHandler`）；
//! 3. 生产者调用 `publish`；
//! 4. 需要时通过 `EventReplayer` 重放历史或失败事件。
//!
pub mod error;
pub mod event;
pub mod eventing;
pub mod persist;
pub mod replay;
pub mod serde_ext;
