//! 流存储（StreamStore）协议
//!
//! 描述带消费组语义的流式消息存储需要提供的最小原语集合：
//! 组创建、按组阻塞读取、确认、待确认列表、认领、消费者列表与删除、发布。
//!
//! 存储本身即是“锁”：认领与确认在存储侧原子完成，Worker 进程内不持有任何共享状态。
//!
use crate::error::EventResult as Result;
use crate::event::FieldMap;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

mod inmemory;
#[cfg(feature = "redis")]
mod redis_store;

pub use inmemory::InMemoryStreamStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStreamStore;

/// 只读取从未投递给任何消费者的新条目
pub const NEW_ENTRIES: &str = ">";
/// 从当前消费者自身待确认集合的起点读取
pub const OWN_PENDING: &str = "0";
/// 消费组从流的最新位置开始
pub const LATEST: &str = "$";

/// 单个流的读取游标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCursor {
    pub stream: String,
    pub cursor: String,
}

impl StreamCursor {
    pub fn new(stream: impl Into<String>, cursor: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            cursor: cursor.into(),
        }
    }
}

/// 阻塞读取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBlock {
    NoWait,
    For(Duration),
    Forever,
}

/// 流中的一条条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: FieldMap,
}

/// 一次读取中单个流返回的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBatch {
    pub stream: String,
    pub entries: Vec<StreamEntry>,
}

/// 待确认条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

/// 消费者描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: u64,
    pub idle: Duration,
}

#[async_trait]
pub trait StreamStore: Send + Sync {
    /// 流是否存在（不存在不视为错误）
    async fn stream_exists(&self, stream: &str) -> Result<bool>;

    /// 创建消费组；组已存在时返回 `EventError::GroupExists`
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<()>;

    /// 以消费组身份读取多个流
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[StreamCursor],
        count: Option<usize>,
        block: ReadBlock,
    ) -> Result<Vec<StreamBatch>>;

    /// 确认条目，返回实际被确认的数量
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64>;

    /// 按条目 ID 升序列出待确认条目
    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>>;

    /// 认领空闲时间不少于 `min_idle` 的条目，返回成功认领的条目 ID
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<String>>;

    /// 列出消费组内的消费者
    async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>>;

    /// 删除消费者，返回随之丢弃的待确认条目数量
    async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64>;

    /// 发布条目；`max_len` 为近似的保留上限
    async fn publish(&self, stream: &str, fields: &FieldMap, max_len: Option<usize>)
    -> Result<String>;
}

#[async_trait]
impl<T> StreamStore for Arc<T>
where
    T: StreamStore + ?Sized,
{
    async fn stream_exists(&self, stream: &str) -> Result<bool> {
        (**self).stream_exists(stream).await
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<()> {
        (**self)
            .create_group(stream, group, start, create_stream)
            .await
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[StreamCursor],
        count: Option<usize>,
        block: ReadBlock,
    ) -> Result<Vec<StreamBatch>> {
        (**self)
            .read_group(group, consumer, cursors, count, block)
            .await
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64> {
        (**self).ack(stream, group, id).await
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        (**self).pending(stream, group, count).await
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<String>> {
        (**self)
            .claim(stream, group, consumer, min_idle, ids)
            .await
    }

    async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>> {
        (**self).consumers(stream, group).await
    }

    async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64> {
        (**self).delete_consumer(stream, group, consumer).await
    }

    async fn publish(
        &self,
        stream: &str,
        fields: &FieldMap,
        max_len: Option<usize>,
    ) -> Result<String> {
        (**self).publish(stream, fields, max_len).await
    }
}
