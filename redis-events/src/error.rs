//! 统一错误定义
//!
//! 按关注点划分：事件编解码、流存储、Worker 生命周期与配置，
//! 便于存储实现层统一转换为 `EventError`。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventError {
    // --- 编解码 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("missing reserved field `action`: stream={stream}, entry_id={entry_id}")]
    MissingAction { stream: String, entry_id: String },
    #[error("reserved field `{field}` used as event data: stream={stream}")]
    ReservedField { stream: String, field: String },
    #[error("malformed field: stream={stream}, entry_id={entry_id}, field={field}, reason={reason}")]
    MalformedField {
        stream: String,
        entry_id: String,
        field: String,
        reason: String,
    },

    // --- 流存储 ---
    #[error("consumer group already exists: stream={stream}, group={group}")]
    GroupExists { stream: String, group: String },
    #[error("no such consumer group: stream={stream}, group={group}")]
    NoGroup { stream: String, group: String },
    #[error("stream store connection error: {reason}")]
    Connection { reason: String },
    #[error("stream store error: {reason}")]
    Store { reason: String },

    // --- Worker ---
    #[error("bootstrap failed: stream={stream}, group={group}, reason={reason}")]
    Bootstrap {
        stream: String,
        group: String,
        reason: String,
    },
    #[error("event handler error: handler={handler}, reason={reason}")]
    Handler { handler: String, reason: String },
    #[error("worker task error: {reason}")]
    Task { reason: String },

    // --- 配置 ---
    #[error("invalid config: {key}={value}, reason={reason}")]
    Config {
        key: String,
        value: String,
        reason: String,
    },
}

impl EventError {
    pub fn store(reason: impl Into<String>) -> Self {
        EventError::Store {
            reason: reason.into(),
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        EventError::Connection {
            reason: reason.into(),
        }
    }

    /// 是否为可重试的瞬时错误（网络抖动、存储暂不可用等）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventError::Connection { .. } | EventError::Store { .. } | EventError::NoGroup { .. }
        )
    }

    /// 是否为单条事件的解码错误（仅影响该事件本身）
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            EventError::MissingAction { .. }
                | EventError::MalformedField { .. }
                | EventError::Serde { .. }
        )
    }
}

/// 统一 Result 类型别名
pub type EventResult<T> = Result<T, EventError>;

// ---- 基础设施转换 ----
// 允许在 Redis 实现中直接使用 `?` 将 RedisError 转换为 EventError

#[cfg(feature = "redis")]
impl From<redis::RedisError> for EventError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            EventError::Connection {
                reason: err.to_string(),
            }
        } else {
            EventError::Store {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EventError::store("LOADING").is_transient());
        assert!(EventError::connection("reset by peer").is_transient());
        assert!(
            !EventError::Bootstrap {
                stream: "bar".into(),
                group: "foo".into(),
                reason: "WRONGTYPE".into(),
            }
            .is_transient()
        );

        let missing = EventError::MissingAction {
            stream: "bar".into(),
            entry_id: "1-0".into(),
        };
        assert!(missing.is_decode());
        assert!(!missing.is_transient());
    }
}
