//! 空闲消费者清理（IdleConsumerPruner）
//!
//! 删除空闲超过 `worker_timeout` 的消费者登记，保持消费组元数据有界。
//! 仍持有待确认条目的消费者暂不删除：存储在删除消费者时会一并丢弃其待确认条目，
//! 先由回收器认领走，下一轮再清理。自身永远不会被清理。
//!
use super::identity::WorkerIdentity;
use crate::error::EventResult as Result;
use crate::store::StreamStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct IdleConsumerPruner {
    store: Arc<dyn StreamStore>,
    identity: WorkerIdentity,
    worker_timeout: Duration,
}

impl IdleConsumerPruner {
    pub fn new(
        store: Arc<dyn StreamStore>,
        identity: WorkerIdentity,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            worker_timeout,
        }
    }

    /// 返回被删除的 (stream, consumer)
    pub async fn prune(&self, streams: &[String]) -> Result<Vec<(String, String)>> {
        let group = self.identity.group();
        let mut removed = Vec::new();

        for stream in streams {
            for consumer in self.store.consumers(stream, group).await? {
                if consumer.name == self.identity.consumer() || consumer.idle <= self.worker_timeout
                {
                    continue;
                }
                if consumer.pending > 0 {
                    debug!(
                        stream = %stream,
                        group,
                        consumer = %consumer.name,
                        pending = consumer.pending,
                        "idle consumer still owns pending entries, deferring removal"
                    );
                    continue;
                }

                self.store
                    .delete_consumer(stream, group, &consumer.name)
                    .await?;
                info!(
                    stream = %stream,
                    group,
                    consumer = %consumer.name,
                    idle_ms = consumer.idle.as_millis() as u64,
                    "removed idle consumer"
                );
                removed.push((stream.clone(), consumer.name));
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FieldMap;
    use crate::store::{InMemoryStreamStore, LATEST, NEW_ENTRIES, ReadBlock, StreamCursor};
    use crate::worker::reclaimer::PendingReclaimer;

    async fn touch(store: &InMemoryStreamStore, consumer: &str) {
        store
            .read_group(
                "g",
                consumer,
                &[StreamCursor::new("bar", NEW_ENTRIES)],
                None,
                ReadBlock::NoWait,
            )
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn removes_only_idle_consumers_without_pending() {
        let store = Arc::new(InMemoryStreamStore::new());
        store.create_group("bar", "g", LATEST, true).await.unwrap();

        touch(&store, "g-idle").await;
        let mut fields = FieldMap::new();
        fields.insert("action".into(), "update".into());
        store.publish("bar", &fields, None).await.unwrap();
        touch(&store, "g-holding").await;

        tokio::time::advance(Duration::from_secs(31)).await;
        touch(&store, "g-active").await;
        touch(&store, "g-self").await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let pruner = IdleConsumerPruner::new(
            store.clone(),
            WorkerIdentity::new("g", "g-self"),
            Duration::from_secs(60),
        );
        let removed = pruner.prune(&["bar".to_string()]).await.unwrap();
        assert_eq!(removed, vec![("bar".to_string(), "g-idle".to_string())]);

        let names: Vec<String> = store
            .consumers("bar", "g")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["g-active", "g-holding", "g-self"]);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_idle_holder_until_its_entry_is_reclaimed() {
        let store = Arc::new(InMemoryStreamStore::new());
        store.create_group("bar", "g", LATEST, true).await.unwrap();
        let streams = ["bar".to_string()];
        let me = WorkerIdentity::new("g", "g-self");

        touch(&store, "g-idle").await;
        let mut fields = FieldMap::new();
        fields.insert("action".into(), "update".into());
        let id = store.publish("bar", &fields, None).await.unwrap();
        touch(&store, "g-holding").await;

        // 待确认超时（120s）长于消费者超时（30s）
        let reclaimer =
            PendingReclaimer::new(store.clone(), me.clone(), Duration::from_secs(120), 100);
        let pruner = IdleConsumerPruner::new(store.clone(), me, Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(reclaimer.reclaim(&streams).await.unwrap().is_empty());
        let removed = pruner.prune(&streams).await.unwrap();
        assert_eq!(removed, vec![("bar".to_string(), "g-idle".to_string())]);
        let pending = store.pending("bar", "g", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].consumer, "g-holding");

        tokio::time::advance(Duration::from_secs(70)).await;
        let batches = reclaimer.reclaim(&streams).await.unwrap();
        assert_eq!(batches[0].entries[0].id, id);
        let removed = pruner.prune(&streams).await.unwrap();
        assert_eq!(removed, vec![("bar".to_string(), "g-holding".to_string())]);
        let pending = store.pending("bar", "g", 10).await.unwrap();
        assert_eq!(pending[0].consumer, "g-self");
    }
}
