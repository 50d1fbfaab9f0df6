//! 基于流式存储消费组的事件分发库（redis-events）
//!
//! 各服务为 (stream, action) 注册处理器，Worker 负责：
//! - 为订阅的流幂等创建消费组；
//! - 阻塞读取新事件、先确认再调用处理器；
//! - 认领崩溃或停滞的同组 Worker 遗留的待确认事件并重新分发；
//! - 清理长时间空闲的消费者登记。
//!
//! 投递语义为至少一次：处理器可能看到重复事件，但不会丢失事件。
//! 处理器失败不会被重试（确认发生在调用之前），需要补偿时由处理器自行发布事件。
//!
//! 存储通过 `store::StreamStore` 抽象，内置内存实现与 Redis Streams 实现（`redis` 特性）。
//!
//! 典型用法：
//! 1. 构建 `HandlerRegistry` 并注册处理器；
//! 2. 选择 `StreamStore` 实现，构建 `Worker`；
//! 3. `Worker::start` 启动，通过 `WorkerHandle` 关闭与等待；
//! 4. 生产方使用 `Producer` 发布事件。
//!
pub mod config;
pub mod error;
pub mod event;
pub mod producer;
pub mod store;
pub mod worker;

pub use config::{RetryPolicy, Settings, WorkerConfig};
pub use error::{EventError, EventResult};
pub use event::{Event, EventData, FieldMap};
pub use producer::Producer;
pub use worker::{HandlerRegistry, Worker, WorkerHandle};
