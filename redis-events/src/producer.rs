//! 事件生产者（Producer）
//!
//! 绑定到一个流，负责把 `(action, data)` 编码为信封并发布，
//! 保留上限交由存储在写入时近似裁剪。
//!
use crate::error::{EventError, EventResult as Result};
use crate::event::{Event, EventData};
use crate::store::StreamStore;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn StreamStore>,
    stream: String,
    max_len: Option<usize>,
}

impl Producer {
    pub fn new(store: Arc<dyn StreamStore>, stream: impl Into<String>) -> Self {
        Self {
            store,
            stream: stream.into(),
            max_len: None,
        }
    }

    /// 设置近似保留上限
    pub fn with_max_len(mut self, max_len: Option<usize>) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// 发布事件，返回存储分配的条目 ID
    pub async fn send_event(&self, action: &str, data: EventData) -> Result<String> {
        self.publish(&Event::new(self.stream.clone(), action, data))
            .await
    }

    /// 先执行业务动作，成功后再把 `(action, data)` 发布到本流
    ///
    /// 动作失败时不发布任何事件，原样返回动作的错误；发布失败转换为 `E`。
    pub async fn emit_after<T, E, Fut>(
        &self,
        action: &str,
        data: EventData,
        work: Fut,
    ) -> std::result::Result<T, E>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<EventError>,
    {
        let output = work.await?;
        self.send_event(action, data).await?;
        Ok(output)
    }

    /// 发布任意流上的事件
    pub async fn publish(&self, event: &Event) -> Result<String> {
        let fields = event.encode()?;
        let id = self
            .store
            .publish(event.stream(), &fields, self.max_len)
            .await?;
        debug!(stream = event.stream(), action = event.action(), entry_id = %id, "event published");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStreamStore;
    use serde_json::json;

    #[tokio::test]
    async fn send_event_encodes_envelope_and_trims() {
        let store = Arc::new(InMemoryStreamStore::new());
        let producer = Producer::new(store.clone(), "bar").with_max_len(Some(2));

        let mut data = EventData::new();
        data.insert("test".into(), json!(true));
        for _ in 0..3 {
            producer.send_event("update", data.clone()).await.unwrap();
        }
        assert_eq!(store.len("bar"), 2);

        let mut bad = EventData::new();
        bad.insert("action".into(), json!("sneaky"));
        assert!(producer.send_event("update", bad).await.is_err());
        assert_eq!(store.len("bar"), 2);
    }

    #[tokio::test]
    async fn emit_after_publishes_only_when_work_succeeds() {
        let store = Arc::new(InMemoryStreamStore::new());
        let producer = Producer::new(store.clone(), "bar");
        let mut data = EventData::new();
        data.insert("test".into(), json!(true));

        let failed: anyhow::Result<()> = producer
            .emit_after("update", data.clone(), async {
                Err(anyhow::anyhow!("bar action failed"))
            })
            .await;
        assert!(failed.is_err());
        assert!(store.is_empty("bar"));

        let done = producer
            .emit_after("update", data, async { anyhow::Ok(7) })
            .await
            .unwrap();
        assert_eq!(done, 7);
        assert_eq!(store.len("bar"), 1);
    }
}
