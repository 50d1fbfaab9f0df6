//! 事件处理器（EventHandler）
//!
//! 处理器接收完整的事件（含 `data` 字段表），返回值被分发循环丢弃；
//! 失败只记录日志，不会经由待确认机制重试。
//!
use crate::event::{Event, EventData};
use async_trait::async_trait;
use std::future::Future;

/// 事件处理器：处理某个 (stream, action) 上的事件
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于日志与审计）
    fn handler_name(&self) -> &str;
    /// 处理事件
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// 以闭包实现的处理器，闭包接收事件数据
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event.data().clone()).await
    }
}
