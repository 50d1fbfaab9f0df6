//! 处理器注册表（HandlerRegistry）
//!
//! 以 (stream, action) 为键；重复注册时后写覆盖先写。
//! 注册表在 Worker 构建时移交，之后只读。
//!
use super::handler::{EventHandler, FnHandler};
use crate::event::EventData;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    by_stream: BTreeMap<String, HashMap<String, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器
    pub fn register(
        &mut self,
        stream: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> &mut Self {
        self.by_stream
            .entry(stream.into())
            .or_default()
            .insert(action.into(), handler);
        self
    }

    /// 以闭包注册处理器，处理器名称为 `stream.action`
    pub fn register_fn<F, Fut>(
        &mut self,
        stream: impl Into<String>,
        action: impl Into<String>,
        f: F,
    ) -> &mut Self
    where
        F: Fn(EventData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let stream = stream.into();
        let action = action.into();
        let handler = Arc::new(FnHandler::new(format!("{stream}.{action}"), f));
        self.register(stream, action, handler)
    }

    pub fn lookup(&self, stream: &str, action: &str) -> Option<Arc<dyn EventHandler>> {
        self.by_stream
            .get(stream)
            .and_then(|actions| actions.get(action))
            .cloned()
    }

    /// 所有已注册的流（有序、去重）
    pub fn streams(&self) -> Vec<String> {
        self.by_stream.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_stream.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use futures_util::future::{Ready, ready};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        counter: &Arc<AtomicUsize>,
        by: usize,
    ) -> impl Fn(EventData) -> Ready<anyhow::Result<()>> + Send + Sync + 'static {
        let counter = counter.clone();
        move |_| {
            counter.fetch_add(by, Ordering::Relaxed);
            ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry
            .register_fn("bar", "update", counting(&hits, 1))
            .register_fn("bar", "update", counting(&hits, 100));
        assert_eq!(registry.len(), 1);

        let handler = registry.lookup("bar", "update").unwrap();
        assert_eq!(handler.handler_name(), "bar.update");
        handler
            .handle(&Event::new("bar", "update", EventData::new()))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn lookup_and_streams() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        registry
            .register_fn("test", "initiate", counting(&hits, 1))
            .register_fn("foo", "update", counting(&hits, 1))
            .register_fn("foo", "delete", counting(&hits, 1));

        assert!(registry.lookup("foo", "update").is_some());
        assert!(registry.lookup("foo", "create").is_none());
        assert!(registry.lookup("bar", "update").is_none());
        assert_eq!(registry.streams(), vec!["foo".to_string(), "test".to_string()]);
        assert_eq!(registry.len(), 3);
    }
}
