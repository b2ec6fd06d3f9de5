//! 投递标记（DeliveryMarker）
//!
//! 分发器在每次处理尝试结束后上报结果：全部处理器成功时 `mark_processed`，
//! 任一处理器失败时 `mark_failed`。标记失败只记录日志，不影响分发。
//!
use crate::error::EventResult as Result;
use crate::event::Event;
use async_trait::async_trait;

#[async_trait]
pub trait DeliveryMarker: Send + Sync {
    async fn mark_processed(&self, event: &Event) -> Result<()>;

    async fn mark_failed(&self, event: &Event, reason: &str) -> Result<()>;
}
