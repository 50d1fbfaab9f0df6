//! Redis Streams 存储实现（RedisStreamStore）
//!
//! 以原始命令（XGROUP / XREADGROUP / XACK / XPENDING / XCLAIM / XINFO / XADD）
//! 实现 `StreamStore`，连接由 `ConnectionManager` 复用并在断线后自动重连。
//!
use super::{
    ConsumerInfo, PendingEntry, ReadBlock, StreamBatch, StreamCursor, StreamEntry, StreamStore,
};
use crate::error::{EventError, EventResult as Result};
use crate::event::FieldMap;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// XREADGROUP 原始回复：[[stream, [[id, [k, v, ...] | nil], ...]], ...] | nil
type ReadReply = Option<Vec<(String, Vec<(String, Option<Vec<(Vec<u8>, Vec<u8>)>>)>)>>;

#[derive(Clone)]
pub struct RedisStreamStore {
    conn: ConnectionManager,
}

impl RedisStreamStore {
    /// 连接 Redis；地址不可达时返回连接错误
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url, "connected to redis");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        Ok(cmd.query_async(&mut conn).await?)
    }

    /// 针对某个消费组的命令：`NOGROUP` 回复转换为 `EventError::NoGroup`
    async fn query_group<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
        stream: &str,
        group: &str,
    ) -> Result<T> {
        let mut conn = self.conn.clone();
        let r: redis::RedisResult<T> = cmd.query_async(&mut conn).await;
        r.map_err(|e| group_error(e, stream, group))
    }
}

/// 服务端错误码；未知错误码（如 `NOGROUP`）既可能出现在 `code()`，也可能只出现在描述前缀
fn has_code(err: &RedisError, code: &str) -> bool {
    err.code() == Some(code) || err.to_string().starts_with(code)
}

fn group_error(err: RedisError, stream: &str, group: &str) -> EventError {
    if has_code(&err, "NOGROUP") {
        EventError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    } else if has_code(&err, "BUSYGROUP") {
        EventError::GroupExists {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    } else {
        err.into()
    }
}

fn to_fields(raw: Option<Vec<(Vec<u8>, Vec<u8>)>>) -> FieldMap {
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| {
            (
                String::from_utf8_lossy(&k).into_owned(),
                String::from_utf8_lossy(&v).into_owned(),
            )
        })
        .collect()
}

fn field<T: redis::FromRedisValue>(info: &HashMap<String, Value>, key: &str) -> Result<T> {
    let value = info
        .get(key)
        .ok_or_else(|| EventError::store(format!("XINFO CONSUMERS reply missing `{key}`")))?;
    Ok(redis::from_redis_value(value)?)
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn stream_exists(&self, stream: &str) -> Result<bool> {
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(stream);
        let n: i64 = self.query(&cmd).await?;
        Ok(n > 0)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<()> {
        // XGROUP CREATE <stream> <group> <start> [MKSTREAM]
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg(start);
        if create_stream {
            cmd.arg("MKSTREAM");
        }
        self.query_group(&cmd, stream, group).await
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[StreamCursor],
        count: Option<usize>,
        block: ReadBlock,
    ) -> Result<Vec<StreamBatch>> {
        if cursors.is_empty() {
            return Ok(Vec::new());
        }

        // XREADGROUP GROUP <group> <consumer> [COUNT n] [BLOCK ms] STREAMS <k...> <id...>
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        if let Some(count) = count {
            cmd.arg("COUNT").arg(count.max(1));
        }
        match block {
            ReadBlock::NoWait => {}
            ReadBlock::For(d) => {
                cmd.arg("BLOCK").arg((d.as_millis() as u64).max(1));
            }
            ReadBlock::Forever => {
                cmd.arg("BLOCK").arg(0);
            }
        }
        cmd.arg("STREAMS");
        for c in cursors {
            cmd.arg(&c.stream);
        }
        for c in cursors {
            cmd.arg(&c.cursor);
        }

        // 组或流被删除时返回 NoGroup，交由 Worker 重新引导
        let streams = cursors
            .iter()
            .map(|c| c.stream.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let reply: ReadReply = self.query_group(&cmd, &streams, group).await?;
        Ok(reply
            .unwrap_or_default()
            .into_iter()
            .map(|(stream, entries)| StreamBatch {
                stream,
                entries: entries
                    .into_iter()
                    .map(|(id, raw)| StreamEntry {
                        id,
                        fields: to_fields(raw),
                    })
                    .collect(),
            })
            .filter(|b| !b.entries.is_empty())
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(id);
        self.query_group(&cmd, stream, group).await
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        // XPENDING <stream> <group> - + <count>
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count.max(1));
        let rows: Vec<(String, String, u64, u64)> =
            self.query_group(&cmd, stream, group).await?;
        Ok(rows
            .into_iter()
            .map(|(id, consumer, idle_ms, deliveries)| PendingEntry {
                id,
                consumer,
                idle: Duration::from_millis(idle_ms),
                delivery_count: deliveries,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM <stream> <group> <consumer> <min-idle-time> <id...>
        // 不使用 JUSTID，以便投递次数被累加
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64);
        for id in ids {
            cmd.arg(id);
        }
        let reply: Vec<Value> = self.query_group(&cmd, stream, group).await?;
        Ok(reply
            .iter()
            .filter_map(|v| redis::from_redis_value::<(String, Value)>(v).ok())
            .map(|(id, _)| id)
            .collect())
    }

    async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>> {
        let mut cmd = redis::cmd("XINFO");
        cmd.arg("CONSUMERS").arg(stream).arg(group);
        let rows: Vec<HashMap<String, Value>> =
            self.query_group(&cmd, stream, group).await?;
        rows.iter()
            .map(|info| {
                Ok(ConsumerInfo {
                    name: field(info, "name")?,
                    pending: field(info, "pending")?,
                    idle: Duration::from_millis(field(info, "idle")?),
                })
            })
            .collect()
    }

    async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("DELCONSUMER").arg(stream).arg(group).arg(consumer);
        self.query_group(&cmd, stream, group).await
    }

    async fn publish(
        &self,
        stream: &str,
        fields: &FieldMap,
        max_len: Option<usize>,
    ) -> Result<String> {
        // XADD <stream> [MAXLEN ~ n] * <k v ...>
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(max_len) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*");
        for (k, v) in fields {
            cmd.arg(k).arg(v);
        }
        self.query(&cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    fn reply_error(code: &'static str, detail: &str) -> RedisError {
        RedisError::from((ErrorKind::ExtensionError, code, detail.to_string()))
    }

    #[test]
    fn nogroup_reply_maps_to_no_group() {
        let err = reply_error(
            "NOGROUP",
            "No such key 'bar' or consumer group 'foo' in XPENDING command",
        );
        match group_error(err, "bar", "foo") {
            EventError::NoGroup { stream, group } => {
                assert_eq!(stream, "bar");
                assert_eq!(group, "foo");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn busygroup_reply_maps_to_group_exists() {
        let err = reply_error("BUSYGROUP", "Consumer Group name already exists");
        assert!(matches!(
            group_error(err, "bar", "foo"),
            EventError::GroupExists { .. }
        ));
    }

    #[test]
    fn other_replies_keep_store_classification() {
        let err = reply_error(
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value",
        );
        let mapped = group_error(err, "bar", "foo");
        assert!(matches!(mapped, EventError::Store { .. }));
        assert!(mapped.is_transient());
    }
}
