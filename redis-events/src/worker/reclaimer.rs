//! 待确认条目回收器（PendingReclaimer）
//!
//! 每个回收周期对每个订阅流：
//! 1. 按条目 ID 升序查询消费组的待确认列表（最多 `page_size` 条）；
//! 2. 把其他消费者持有且空闲达到 `pending_event_timeout` 的条目认领给自己，
//!    空闲阈值由存储原子地判定，多个 Worker 并发认领时每条只有一个赢家；
//! 3. 以游标 `0` 非阻塞地重读自己名下的待确认条目，交还分发循环处理。
//!
//! 这样投递进度不依赖新流量：崩溃 Worker 遗留的条目在一个回收周期内即可恢复。
//!
use super::identity::WorkerIdentity;
use crate::error::EventResult as Result;
use crate::store::{OWN_PENDING, ReadBlock, StreamBatch, StreamCursor, StreamStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct PendingReclaimer {
    store: Arc<dyn StreamStore>,
    identity: WorkerIdentity,
    pending_event_timeout: Duration,
    page_size: usize,
}

impl PendingReclaimer {
    pub fn new(
        store: Arc<dyn StreamStore>,
        identity: WorkerIdentity,
        pending_event_timeout: Duration,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            identity,
            pending_event_timeout,
            page_size: page_size.max(1),
        }
    }

    /// 认领指定流上超时的条目；返回本次认领的条目 ID 以及自己是否持有待确认条目
    pub async fn claim_stalled(&self, stream: &str) -> Result<(Vec<String>, bool)> {
        let group = self.identity.group();
        let me = self.identity.consumer();

        let pending = self.store.pending(stream, group, self.page_size).await?;
        if pending.is_empty() {
            return Ok((Vec::new(), false));
        }

        let owns_pending = pending.iter().any(|p| p.consumer == me);
        let candidates: Vec<String> = pending
            .into_iter()
            .filter(|p| p.consumer != me)
            .map(|p| p.id)
            .collect();
        if candidates.is_empty() {
            return Ok((Vec::new(), owns_pending));
        }

        let claimed = self
            .store
            .claim(stream, group, me, self.pending_event_timeout, &candidates)
            .await?;
        if !claimed.is_empty() {
            info!(
                stream,
                group,
                consumer = me,
                claimed = claimed.len(),
                "claimed stalled pending entries"
            );
        }
        let owns_pending = owns_pending || !claimed.is_empty();
        Ok((claimed, owns_pending))
    }

    /// 执行一个回收周期，返回需要重新分发的条目
    pub async fn reclaim(&self, streams: &[String]) -> Result<Vec<StreamBatch>> {
        let mut cursors = Vec::new();
        for stream in streams {
            let (_, owns_pending) = self.claim_stalled(stream).await?;
            if owns_pending {
                cursors.push(StreamCursor::new(stream.clone(), OWN_PENDING));
            }
        }
        if cursors.is_empty() {
            return Ok(Vec::new());
        }

        self.store
            .read_group(
                self.identity.group(),
                self.identity.consumer(),
                &cursors,
                Some(self.page_size),
                ReadBlock::NoWait,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::FieldMap;
    use crate::store::{InMemoryStreamStore, LATEST, NEW_ENTRIES};

    async fn deliver_to(store: &InMemoryStreamStore, consumer: &str) -> String {
        let mut fields = FieldMap::new();
        fields.insert("action".into(), "update".into());
        let id = store.publish("bar", &fields, None).await.unwrap();
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
        id
    }

    #[tokio::test(start_paused = true)]
    async fn only_stalled_entries_of_others_are_reclaimed() {
        let store = Arc::new(InMemoryStreamStore::new());
        store.create_group("bar", "g", LATEST, true).await.unwrap();
        let stalled = deliver_to(&store, "g-dead").await;

        let reclaimer = PendingReclaimer::new(
            store.clone(),
            WorkerIdentity::new("g", "g-live"),
            Duration::from_secs(30),
            1000,
        );
        let streams = vec!["bar".to_string()];

        assert!(reclaimer.reclaim(&streams).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = deliver_to(&store, "g-busy").await;

        let batches = reclaimer.reclaim(&streams).await.unwrap();
        assert_eq!(batches.len(), 1);
        let ids: Vec<&str> = batches[0].entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![stalled.as_str()]);

        let pending = store.pending("bar", "g", 10).await.unwrap();
        let owner = |id: &str| {
            pending
                .iter()
                .find(|p| p.id == id)
                .map(|p| p.consumer.clone())
        };
        assert_eq!(owner(&stalled).as_deref(), Some("g-live"));
        assert_eq!(owner(&fresh).as_deref(), Some("g-busy"));
    }
}
