//! 持久化事件处理器（PersistentEventHandler）
//!
//! 作为普通处理器订阅事件：先写事件存储（失败即处理失败，交由分发器重试），
//! 再写最近事件缓存（失败只记录日志）。重试时事件 ID 已存在视为已写入。
//!
use super::{EventStore, RecentEventCache};
use crate::event::Event;
use crate::eventing::EventHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const PERSISTENT_HANDLER_NAME: &str = "persistent_event_handler";

pub struct PersistentEventHandler {
    store: Arc<dyn EventStore>,
    cache: Option<RecentEventCache>,
}

impl PersistentEventHandler {
    pub fn new(store: Arc<dyn EventStore>, cache: Option<RecentEventCache>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl EventHandler for PersistentEventHandler {
    fn handler_name(&self) -> &str {
        PERSISTENT_HANDLER_NAME
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        match self.store.store(event).await {
            Ok(_) => {}
            Err(err) if err.is_duplicate() => {
                debug!(event_id = event.event_id(), "event already stored");
                return Ok(());
            }
            Err(err) => {
                error!(
                    event_type = event.event_type(),
                    event_id = event.event_id(),
                    error = %err,
                    "failed to store event"
                );
                return Err(err.into());
            }
        }

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.store_recent_event(event).await {
                warn!(
                    event_type = event.event_type(),
                    error = %err,
                    "failed to store event to recent cache"
                );
            }
        }
        Ok(())
    }
}
