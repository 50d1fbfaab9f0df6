/// Worker（内存版）示例
/// 展示 Producer -> Stream -> Worker -> Handlers 的闭环，
/// 以及崩溃消费者遗留的待确认事件如何被同组 Worker 认领并重新分发
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use redis_events::store::{InMemoryStreamStore, NEW_ENTRIES, ReadBlock, StreamCursor, StreamStore};
use redis_events::worker::EventHandler;
use redis_events::{Event, EventData, HandlerRegistry, Producer, Worker, WorkerConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ============================================================================
// 示例处理器（EventHandler）
// ============================================================================

struct PrintHandler {
    name: &'static str,
    fail_on: Option<&'static str>,
}

#[async_trait]
impl EventHandler for PrintHandler {
    fn handler_name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        if let Some(bad) = self.fail_on
            && event.data().contains_key(bad)
        {
            anyhow::bail!("{} refuses events carrying `{bad}`", self.name);
        }
        println!(
            "handler={} stream={} action={} id={} data={}",
            self.name,
            event.stream(),
            event.action(),
            event.event_id().unwrap_or("-"),
            serde_json::Value::Object(event.data().clone())
        );
        Ok(())
    }
}

fn data(value: serde_json::Value) -> EventData {
    match value {
        serde_json::Value::Object(map) => map,
        _ => EventData::new(),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redis_events=info")),
        )
        .init();

    println!("=== Worker（内存版）示例 ===\n");
    let store = Arc::new(InMemoryStreamStore::new());

    // Handlers
    let mut handlers = HandlerRegistry::new();
    handlers
        .register(
            "bar",
            "update",
            Arc::new(PrintHandler {
                name: "printer",
                fail_on: None,
            }),
        )
        .register(
            "bar",
            "delete",
            Arc::new(PrintHandler {
                name: "sometimes_fail",
                fail_on: Some("forbidden"),
            }),
        );

    // Worker
    let worker = Arc::new(
        Worker::builder()
            .store(store.clone())
            .group("foo")
            .handlers(handlers)
            .config(WorkerConfig {
                pending_event_timeout: Duration::from_millis(500),
                block_interval: Duration::from_millis(200),
                ..WorkerConfig::default()
            })
            .build(),
    );
    worker.bootstrap().await?;

    let producer = Producer::new(store.clone(), "bar");

    // 模拟另一个消费者读取后崩溃
    producer.send_event("update", data(json!({"n": 1}))).await?;
    let orphaned = store
        .read_group(
            "foo",
            "foo-crashed",
            &[StreamCursor::new("bar", NEW_ENTRIES)],
            None,
            ReadBlock::NoWait,
        )
        .await?;
    let orphaned: usize = orphaned.iter().map(|b| b.entries.len()).sum();
    println!("✅ foo-crashed 读取 {orphaned} 条事件后崩溃，未确认");

    let handle = worker.clone().start();
    println!("✅ Worker 已启动: {}", worker.identity());

    // 演示在运行中继续发布事件
    tokio::time::sleep(Duration::from_millis(300)).await;
    producer.send_event("update", data(json!({"test": true}))).await?;
    producer
        .send_event("delete", data(json!({"forbidden": 1})))
        .await?;
    producer.send_event("archive", EventData::new()).await?;
    println!("✅ 追加事件: update, delete(处理失败), archive(无处理器)");

    tokio::time::sleep(Duration::from_secs(2)).await;
    handle.shutdown();
    handle.join().await?;

    let pending = store.pending("bar", "foo", 100).await?;
    println!("\n✅ 优雅关闭完成，剩余待确认条目: {}", pending.len());
    Ok(())
}
