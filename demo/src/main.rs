//! foo / bar / test 三个服务的事件编排演示
//!
//! 1. `test` 向 `test` 流发布 `initiate`；
//! 2. `bar` 服务处理 `test.initiate`，执行 bar 动作并向 `bar` 流发布 `update {test: true}`；
//! 3. `foo` 服务处理 `bar.update`。
//!
//! 跨进程运行时依次启动 `demo bar`、`demo foo`，再执行 `demo test`（需要 Redis）；
//! `demo all --in-memory` 在单进程内用内存存储跑完整链路。
use anyhow::Result as AnyResult;
use clap::{Parser, Subcommand};
use redis_events::store::{InMemoryStreamStore, RedisStreamStore, StreamStore};
use redis_events::{EventData, HandlerRegistry, Producer, Settings, Worker};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "demo", about = "redis-events service choreography")]
struct Cli {
    #[command(subcommand)]
    role: Role,
    /// 使用进程内存储而不是 Redis
    #[arg(long)]
    in_memory: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Role {
    /// 运行 foo 服务的 Worker
    Foo,
    /// 运行 bar 服务的 Worker
    Bar,
    /// 发布一次 `test.initiate`
    Test,
    /// 在同一进程内运行 foo、bar 并发布 `test.initiate`
    All,
}

struct Demo {
    store: Arc<dyn StreamStore>,
    settings: Settings,
}

impl Demo {
    fn producer(&self, stream: &str) -> Producer {
        Producer::new(self.store.clone(), stream).with_max_len(self.settings.stream_max_len)
    }

    fn worker(&self, group: &str, handlers: HandlerRegistry) -> Arc<Worker> {
        Arc::new(
            Worker::builder()
                .store(self.store.clone())
                .group(group)
                .handlers(handlers)
                .config(self.settings.worker_config())
                .build(),
        )
    }

    fn foo_worker(&self) -> Arc<Worker> {
        let mut handlers = HandlerRegistry::new();
        handlers.register_fn("bar", "update", |data: EventData| async move {
            info!(test = ?data.get("test"), "foo handled event from bar");
            anyhow::Ok(())
        });
        self.worker("foo", handlers)
    }

    fn bar_worker(&self) -> Arc<Worker> {
        let bar = self.producer("bar");
        let mut handlers = HandlerRegistry::new();
        handlers
            .register_fn("foo", "update", |_| async {
                info!("bar handled event from foo");
                anyhow::Ok(())
            })
            .register_fn("test", "initiate", move |_| {
                let bar = bar.clone();
                async move {
                    info!("bar handled event from test");
                    bar_action(&bar).await
                }
            });
        self.worker("bar", handlers)
    }

    async fn initiate(&self) -> AnyResult<()> {
        let id = self
            .producer("test")
            .send_event("initiate", EventData::new())
            .await?;
        info!(entry_id = %id, "test.initiate published");
        Ok(())
    }
}

/// bar 服务的业务动作：完成工作后发布 `bar.update`
async fn bar_action(bar: &Producer) -> AnyResult<()> {
    let mut data = EventData::new();
    data.insert("test".to_string(), json!(true));
    bar.emit_after("update", data, async {
        info!("bar action");
        anyhow::Ok(())
    })
    .await
}

/// 启动 Worker 并等待 ctrl-c 后优雅关闭
async fn serve(workers: Vec<Arc<Worker>>) -> AnyResult<()> {
    let handles: Vec<_> = workers.into_iter().map(Worker::start).collect();
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    for handle in &handles {
        handle.shutdown();
    }
    for handle in handles {
        handle.join().await?;
    }
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> AnyResult<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("redis_events=info,demo=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let store: Arc<dyn StreamStore> = if cli.in_memory {
        Arc::new(InMemoryStreamStore::new())
    } else {
        info!(url = %settings.redis_url, "connecting to redis");
        Arc::new(RedisStreamStore::connect(&settings.redis_url).await?)
    };
    let demo = Demo { store, settings };

    match cli.role {
        Role::Foo => serve(vec![demo.foo_worker()]).await,
        Role::Bar => serve(vec![demo.bar_worker()]).await,
        Role::Test => demo.initiate().await,
        Role::All => {
            let workers = vec![demo.foo_worker(), demo.bar_worker()];
            // 先建好消费组，随后发布的事件才会被投递
            for worker in &workers {
                worker.bootstrap().await?;
            }
            demo.initiate().await?;
            serve(workers).await
        }
    }
}
