//! 基于事件存储的投递标记（StoreDeliveryMarker）
//!
//! 将分发器的每次处理结果映射到 `mark_as_processed` / `mark_as_failed`；
//! 未落库的事件（如未注册持久化处理器）直接忽略。
//!
use super::EventStore;
use crate::error::EventResult as Result;
use crate::event::Event;
use crate::eventing::DeliveryMarker;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct StoreDeliveryMarker {
    store: Arc<dyn EventStore>,
}

impl StoreDeliveryMarker {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    fn ignore_missing(event: &Event, result: Result<()>) -> Result<()> {
        match result {
            Err(err) if err.is_not_found() => {
                debug!(event_id = event.event_id(), "event not stored, skip marking");
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl DeliveryMarker for StoreDeliveryMarker {
    async fn mark_processed(&self, event: &Event) -> Result<()> {
        let result = self.store.mark_as_processed(event.event_id()).await;
        Self::ignore_missing(event, result)
    }

    async fn mark_failed(&self, event: &Event, reason: &str) -> Result<()> {
        let result = self.store.mark_as_failed(event.event_id(), reason).await;
        Self::ignore_missing(event, result)
    }
}
