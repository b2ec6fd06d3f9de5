//! 键值存储边界（KeyValueStore）
//!
//! 快速访问缓存所需的最小操作集：列表头部写入、裁剪、范围读取，
//! 集合写入/成员/基数，以及按键过期。语义对齐常见的 Redis 命令。
//!
use crate::error::EventResult as Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 写入列表头部，返回写入后的列表长度
    async fn list_push(&self, key: &str, value: String) -> Result<usize>;

    /// 仅保留下标 `[start, stop]`（闭区间）内的元素
    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<()>;

    /// 读取下标 `[start, stop]`（闭区间）内的元素
    async fn list_range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>>;

    /// 加入集合，返回是否为新成员
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn set_len(&self, key: &str) -> Result<usize>;

    /// 设置过期时间，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[async_trait]
impl<T> KeyValueStore for Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    async fn list_push(&self, key: &str, value: String) -> Result<usize> {
        (**self).list_push(key, value).await
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<()> {
        (**self).list_trim(key, start, stop).await
    }

    async fn list_range(&self, key: &str, start: usize, stop: usize) -> Result<Vec<String>> {
        (**self).list_range(key, start, stop).await
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        (**self).set_add(key, member).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        (**self).set_members(key).await
    }

    async fn set_len(&self, key: &str) -> Result<usize> {
        (**self).set_len(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        (**self).expire(key, ttl).await
    }
}
