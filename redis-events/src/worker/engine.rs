//! Worker：消费组引导、阻塞读取与分发循环
//!
//! 状态流转：引导 → 就绪 →（读取 ⇄ 分发）→ 就绪 → …
//! - 启动时为每个订阅流幂等创建消费组，失败即终止；
//! - 每轮先执行回收周期，再清理空闲消费者（按 `prune_interval`），然后以 `>` 游标阻塞读取新条目；
//! - 对有处理器的条目先确认再调用：处理失败不会经由待确认机制重试；
//! - 无处理器的动作与无法解码的条目同样被确认，避免永久滞留在待确认列表；
//! - 瞬时存储错误按指数退避重试；取消信号中断阻塞读取，但会等待进行中的处理器返回。
//!
use super::bootstrap::ensure_groups;
use super::identity::WorkerIdentity;
use super::pruner::IdleConsumerPruner;
use super::reclaimer::PendingReclaimer;
use super::registry::HandlerRegistry;
use crate::config::WorkerConfig;
use crate::error::{EventError, EventResult as Result};
use crate::event::{Event, FieldMap};
use crate::store::{NEW_ENTRIES, ReadBlock, StreamBatch, StreamCursor, StreamEntry, StreamStore};
use bon::bon;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 单条条目的分发结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已确认，处理器成功返回
    Handled,
    /// 已确认，处理器返回错误或 panic（不会重试）
    HandlerFailed,
    /// 没有注册处理器，已确认
    Unhandled,
    /// 无法解码，已确认（配置了死信流时先转存）
    Undecodable,
    /// 确认或转存失败，条目留在待确认列表等待下次回收
    Deferred,
}

/// 一批条目的分发统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: usize,
    pub handler_failed: usize,
    pub unhandled: usize,
    pub undecodable: usize,
    pub deferred: usize,
}

impl DispatchStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::HandlerFailed => self.handler_failed += 1,
            DispatchOutcome::Unhandled => self.unhandled += 1,
            DispatchOutcome::Undecodable => self.undecodable += 1,
            DispatchOutcome::Deferred => self.deferred += 1,
        }
    }

    fn merge(&mut self, other: DispatchStats) {
        self.handled += other.handled;
        self.handler_failed += other.handler_failed;
        self.unhandled += other.unhandled;
        self.undecodable += other.undecodable;
        self.deferred += other.deferred;
    }

    /// 调用过处理器的条目数
    pub fn invoked(&self) -> usize {
        self.handled + self.handler_failed
    }

    pub fn total(&self) -> usize {
        self.invoked() + self.unhandled + self.undecodable + self.deferred
    }
}

pub struct Worker {
    store: Arc<dyn StreamStore>,
    registry: HandlerRegistry,
    identity: WorkerIdentity,
    config: WorkerConfig,
    streams: Vec<String>,
    reclaimer: PendingReclaimer,
    pruner: IdleConsumerPruner,
}

#[bon]
impl Worker {
    #[builder]
    pub fn new(
        store: Arc<dyn StreamStore>,
        #[builder(into)] group: String,
        handlers: HandlerRegistry,
        // 缺省时生成 `<group>-<ulid>`
        #[builder(into)]
        consumer: Option<String>,
        #[builder(default)] config: WorkerConfig,
    ) -> Self {
        let identity = match consumer {
            Some(consumer) => WorkerIdentity::new(group, consumer),
            None => WorkerIdentity::generate(group),
        };
        let reclaimer = PendingReclaimer::new(
            store.clone(),
            identity.clone(),
            config.pending_event_timeout,
            config.page_size,
        );
        let pruner =
            IdleConsumerPruner::new(store.clone(), identity.clone(), config.worker_timeout);

        Self {
            streams: handlers.streams(),
            store,
            registry: handlers,
            identity,
            config,
            reclaimer,
            pruner,
        }
    }
}

impl Worker {
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    /// 启动 Worker，返回可用于关闭/等待的句柄
    pub fn start(self: Arc<Self>) -> WorkerHandle {
        let token = CancellationToken::new();
        let task = {
            let token = token.clone();
            tokio::spawn(async move { self.run(token).await })
        };
        WorkerHandle {
            token,
            task: Some(task),
        }
    }

    /// 为所有订阅流创建消费组
    pub async fn bootstrap(&self) -> Result<()> {
        ensure_groups(self.store.as_ref(), &self.streams, self.identity.group()).await
    }

    /// 执行一次回收周期并分发认领到的条目
    pub async fn reclaim_pending(&self) -> Result<DispatchStats> {
        let batches = self.reclaimer.reclaim(&self.streams).await?;
        Ok(self.dispatch_batches(batches, None).await)
    }

    /// 执行一次空闲消费者清理，返回删除的消费者数量
    pub async fn prune_idle_consumers(&self) -> Result<usize> {
        Ok(self.pruner.prune(&self.streams).await?.len())
    }

    /// 读取一批新条目并分发
    pub async fn read_and_dispatch(&self, block: ReadBlock) -> Result<DispatchStats> {
        let batches = self.read_new(block).await?;
        Ok(self.dispatch_batches(batches, None).await)
    }

    /// 主循环：引导后持续读取与分发，直到 `token` 被取消
    ///
    /// 只有启动失败会返回错误；运行期的瞬时错误按退避策略重试。
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        if self.streams.is_empty() {
            warn!(worker = %self.identity, "no handlers registered, nothing to consume");
        }
        self.bootstrap().await?;
        info!(worker = %self.identity, streams = ?self.streams, "worker ready");

        let mut failures: u32 = 0;
        let mut last_prune: Option<Instant> = None;

        while !token.is_cancelled() {
            match self.cycle(&token, &mut last_prune).await {
                Ok(()) => failures = 0,
                Err(e) if e.is_transient() => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.retry.delay(failures);
                    warn!(
                        worker = %self.identity,
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "stream store error, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if matches!(e, EventError::NoGroup { .. })
                        && let Err(e) = self.bootstrap().await
                    {
                        warn!(worker = %self.identity, error = %e, "re-bootstrap failed");
                    }
                }
                Err(e) => {
                    error!(worker = %self.identity, error = %e, "worker stopped on fatal error");
                    return Err(e);
                }
            }
        }

        info!(worker = %self.identity, "worker stopped");
        Ok(())
    }

    async fn cycle(&self, token: &CancellationToken, last_prune: &mut Option<Instant>) -> Result<()> {
        // 每次分发之后立即回收，积压不依赖新流量唤醒
        let reclaimed = self.reclaimer.reclaim(&self.streams).await?;
        self.dispatch_batches(reclaimed, Some(token)).await;
        if token.is_cancelled() {
            return Ok(());
        }

        // 回收之后再清理：空闲消费者名下超时的条目此时已被认领
        if last_prune.is_none_or(|at| at.elapsed() >= self.config.prune_interval) {
            self.prune_idle_consumers().await?;
            *last_prune = Some(Instant::now());
        }

        let batches = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            read = self.read_new(ReadBlock::For(self.config.block_interval)) => read?,
        };
        self.dispatch_batches(batches, Some(token)).await;
        Ok(())
    }

    async fn read_new(&self, block: ReadBlock) -> Result<Vec<StreamBatch>> {
        if self.streams.is_empty() {
            if let ReadBlock::For(d) = block {
                tokio::time::sleep(d).await;
            }
            return Ok(Vec::new());
        }

        let cursors: Vec<StreamCursor> = self
            .streams
            .iter()
            .map(|s| StreamCursor::new(s.clone(), NEW_ENTRIES))
            .collect();
        self.store
            .read_group(
                self.identity.group(),
                self.identity.consumer(),
                &cursors,
                Some(self.config.page_size),
                block,
            )
            .await
    }

    async fn dispatch_batches(
        &self,
        batches: Vec<StreamBatch>,
        token: Option<&CancellationToken>,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();
        for batch in batches {
            let mut per_stream = DispatchStats::default();
            for entry in batch.entries {
                // 未处理的条目留在自己名下，由后续回收周期接手
                if token.is_some_and(CancellationToken::is_cancelled) {
                    stats.merge(per_stream);
                    return stats;
                }
                per_stream.record(self.dispatch(&batch.stream, entry).await);
            }
            stats.merge(per_stream);
        }
        stats
    }

    /// 解码 → 查找 → 确认 → 调用
    pub async fn dispatch(&self, stream: &str, entry: StreamEntry) -> DispatchOutcome {
        let event = match Event::decode(stream, &entry.id, &entry.fields) {
            Ok(event) => event,
            Err(e) => {
                warn!(stream, entry_id = %entry.id, error = %e, "undecodable entry");
                if self.dead_letter(stream, &entry, &e).await.is_err() {
                    return DispatchOutcome::Deferred;
                }
                return self.ack_or_defer(stream, &entry.id, DispatchOutcome::Undecodable).await;
            }
        };

        let Some(handler) = self.registry.lookup(stream, event.action()) else {
            debug!(stream, entry_id = %entry.id, action = event.action(), "no handler registered");
            return self.ack_or_defer(stream, &entry.id, DispatchOutcome::Unhandled).await;
        };

        // 先确认再调用
        if self.ack_or_defer(stream, &entry.id, DispatchOutcome::Handled).await
            == DispatchOutcome::Deferred
        {
            return DispatchOutcome::Deferred;
        }

        info!(
            stream,
            entry_id = %entry.id,
            action = event.action(),
            handler = handler.handler_name(),
            "dispatching event"
        );
        match AssertUnwindSafe(handler.handle(&event)).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                error!(
                    stream,
                    entry_id = %entry.id,
                    handler = handler.handler_name(),
                    error = %format!("{e:#}"),
                    "event handler failed"
                );
                DispatchOutcome::HandlerFailed
            }
            Err(_) => {
                error!(
                    stream,
                    entry_id = %entry.id,
                    handler = handler.handler_name(),
                    "event handler panicked"
                );
                DispatchOutcome::HandlerFailed
            }
        }
    }

    async fn ack_or_defer(
        &self,
        stream: &str,
        id: &str,
        outcome: DispatchOutcome,
    ) -> DispatchOutcome {
        match self.store.ack(stream, self.identity.group(), id).await {
            Ok(_) => outcome,
            Err(e) => {
                warn!(stream, entry_id = id, error = %e, "ack failed, entry stays pending");
                DispatchOutcome::Deferred
            }
        }
    }

    async fn dead_letter(&self, stream: &str, entry: &StreamEntry, err: &EventError) -> Result<()> {
        let Some(dlq) = &self.config.dead_letter_stream else {
            return Ok(());
        };

        let mut fields: FieldMap = entry.fields.clone();
        fields.insert("source_stream".to_string(), stream.to_string());
        fields.insert("source_id".to_string(), entry.id.clone());
        fields.insert("error".to_string(), err.to_string());

        match self.store.publish(dlq, &fields, None).await {
            Ok(id) => {
                info!(stream, entry_id = %entry.id, dead_letter = %dlq, dead_letter_id = %id, "entry dead-lettered");
                Ok(())
            }
            Err(e) => {
                warn!(stream, entry_id = %entry.id, error = %e, "dead-letter publish failed");
                Err(e)
            }
        }
    }
}

/// Worker 运行句柄：用于优雅关闭与等待任务结束
pub struct WorkerHandle {
    token: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// 取消令牌，可交给外部信号（如 ctrl-c）触发
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 等待 Worker 退出；返回启动失败等致命错误
    pub async fn join(mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await.map_err(|e| EventError::Task {
            reason: e.to_string(),
        })?
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use crate::store::InMemoryStreamStore;
    use serde_json::json;

    fn entry(id: &str, pairs: &[(&str, &str)]) -> StreamEntry {
        StreamEntry {
            id: id.to_string(),
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn stats_accounting() {
        let mut stats = DispatchStats::default();
        stats.record(DispatchOutcome::Handled);
        stats.record(DispatchOutcome::HandlerFailed);
        stats.record(DispatchOutcome::Unhandled);
        let mut other = DispatchStats::default();
        other.record(DispatchOutcome::Deferred);
        stats.merge(other);
        assert_eq!(stats.invoked(), 2);
        assert_eq!(stats.total(), 4);
    }

    #[tokio::test]
    async fn undecodable_entry_is_dead_lettered_and_acked() {
        let store = Arc::new(InMemoryStreamStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register_fn("bar", "update", |_| async { anyhow::Ok(()) });
        let config = WorkerConfig {
            dead_letter_stream: Some("bar.dead".into()),
            ..WorkerConfig::default()
        };
        let worker = Worker::builder()
            .store(store.clone())
            .group("foo")
            .handlers(handlers)
            .config(config)
            .build();
        worker.bootstrap().await.unwrap();

        let mut fields = FieldMap::new();
        fields.insert("test".into(), json!(true).to_string());
        store.publish("bar", &fields, None).await.unwrap();

        let stats = worker.read_and_dispatch(ReadBlock::NoWait).await.unwrap();
        assert_eq!(stats.undecodable, 1);
        assert_eq!(stats.invoked(), 0);
        assert_eq!(store.len("bar.dead"), 1);
        assert!(store.pending("bar", "foo", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let store = Arc::new(InMemoryStreamStore::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register_fn("bar", "explode", |data: EventData| async move {
            if data.is_empty() {
                panic!("boom");
            }
            anyhow::Ok(())
        });
        let worker = Worker::builder()
            .store(store.clone())
            .group("foo")
            .handlers(handlers)
            .build();
        worker.bootstrap().await.unwrap();

        let outcome = worker
            .dispatch("bar", entry("1-0", &[("action", "explode")]))
            .await;
        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
    }
}
