//! 事件处理器（EventHandler）
//!
//! 单方法能力接口：统计、通知、持久化、指标等处理器对分发器而言完全同构。
//!
use crate::event::Event;
use async_trait::async_trait;

/// 事件处理器：处理一条事件，失败时返回错误以触发重试
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// 处理器名称（用于日志、失败标记与注册表默认信息）
    fn handler_name(&self) -> &str;

    /// 处理器种类，默认取实现类型名
    fn handler_kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// 处理事件
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}
