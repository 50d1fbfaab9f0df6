//! 消费组引导
//!
//! 为每个订阅的流幂等地创建消费组，起点为流的最新位置（`$`），
//! 新 Worker 不会重放它本不该看到的历史事件。
//!
use crate::error::{EventError, EventResult as Result};
use crate::store::{LATEST, StreamStore};
use tracing::{debug, info};

/// 确保消费组存在；本次新建时返回 `true`
///
/// 组已存在是重启时的常态，直接忽略；其它失败均视为启动失败。
pub async fn ensure_group(store: &dyn StreamStore, stream: &str, group: &str) -> Result<bool> {
    let bootstrap_err = |e: EventError| EventError::Bootstrap {
        stream: stream.to_string(),
        group: group.to_string(),
        reason: e.to_string(),
    };

    let exists = store.stream_exists(stream).await.map_err(bootstrap_err)?;
    match store.create_group(stream, group, LATEST, !exists).await {
        Ok(()) => {
            info!(stream, group, created_stream = !exists, "consumer group created");
            Ok(true)
        }
        Err(EventError::GroupExists { .. }) => {
            debug!(stream, group, "consumer group already exists");
            Ok(false)
        }
        Err(e) => Err(bootstrap_err(e)),
    }
}

/// 对多个流执行 `ensure_group`，遇到第一个失败即返回
pub async fn ensure_groups(store: &dyn StreamStore, streams: &[String], group: &str) -> Result<()> {
    for stream in streams {
        ensure_group(store, stream, group).await?;
    }
    Ok(())
}
