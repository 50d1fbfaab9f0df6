//! 事件分发 Worker
//!
//! 提供可靠投递协议的各个组成部分与编排：
//! - `HandlerRegistry`：(stream, action) → 处理器；
//! - `bootstrap`：幂等创建消费组；
//! - `PendingReclaimer`：认领并重新分发超时未确认的条目；
//! - `IdleConsumerPruner`：清理长时间空闲的消费者登记；
//! - `Worker`：阻塞读取、确认与调用的主循环，以及关闭用的 `WorkerHandle`。
//!
//! 同一进程内严格串行；横向扩展依靠同组多个进程，协调完全交给存储的原子认领与确认。
//!
pub mod bootstrap;
pub mod engine;
pub mod handler;
pub mod identity;
pub mod pruner;
pub mod reclaimer;
pub mod registry;

pub use engine::{DispatchOutcome, DispatchStats, Worker, WorkerHandle};
pub use handler::{EventHandler, FnHandler};
pub use identity::WorkerIdentity;
pub use pruner::IdleConsumerPruner;
pub use reclaimer::PendingReclaimer;
pub use registry::HandlerRegistry;
