//! 内存版流存储（InMemoryStreamStore）
//!
//! 在进程内完整模拟消费组语义，满足 `StreamStore` 协议：
//! - `>` 游标只投递从未投递过的条目，并记入读取者的待确认列表；
//! - 其它游标读取读取者自身的待确认条目（条目已被裁剪时返回空字段表）；
//! - 认领要求条目空闲时间达到阈值，并重置空闲计时、累加投递次数；
//! - 空闲时间基于 `tokio::time::Instant`，测试中可以暂停并推进时钟。
//!
//! 典型用途：测试环境、示例与本地开发。
//!
use super::{
    ConsumerInfo, LATEST, PendingEntry, ReadBlock, StreamBatch, StreamCursor, StreamEntry,
    StreamStore, NEW_ENTRIES,
};
use crate::error::{EventError, EventResult as Result};
use crate::event::FieldMap;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
struct EntryId {
    ms: u64,
    seq: u64,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EventError::store(format!("invalid stream id: {s}"));
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self {
                ms: ms.parse().map_err(|_| invalid())?,
                seq: seq.parse().map_err(|_| invalid())?,
            }),
            None => Ok(Self {
                ms: s.parse().map_err(|_| invalid())?,
                seq: 0,
            }),
        }
    }
}

struct PendingRecord {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

struct Group {
    last_delivered: EntryId,
    pel: BTreeMap<EntryId, PendingRecord>,
    consumers: HashMap<String, Instant>,
}

impl Group {
    fn touch(&mut self, consumer: &str, now: Instant) {
        self.consumers.insert(consumer.to_string(), now);
    }
}

#[derive(Default)]
struct Stream {
    entries: BTreeMap<EntryId, FieldMap>,
    last_id: EntryId,
    groups: HashMap<String, Group>,
}

impl Stream {
    fn next_id(&mut self) -> EntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let id = if now_ms > self.last_id.ms {
            EntryId { ms: now_ms, seq: 0 }
        } else {
            EntryId {
                ms: self.last_id.ms,
                seq: self.last_id.seq + 1,
            }
        };
        self.last_id = id;
        id
    }
}

/// 进程内流存储
#[derive(Default)]
pub struct InMemoryStreamStore {
    streams: Mutex<HashMap<String, Stream>>,
    appended: Notify,
}

impl InMemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 流中当前保留的条目数
    pub fn len(&self, stream: &str) -> usize {
        self.lock()
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Stream>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn no_group(stream: &str, group: &str) -> EventError {
        EventError::NoGroup {
            stream: stream.to_string(),
            group: group.to_string(),
        }
    }

    fn try_read(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[StreamCursor],
        count: Option<usize>,
    ) -> Result<Vec<StreamBatch>> {
        let mut streams = self.lock();
        let now = Instant::now();
        let limit = count.unwrap_or(usize::MAX);
        let mut batches = Vec::new();

        for cursor in cursors {
            let stream = streams
                .get_mut(&cursor.stream)
                .ok_or_else(|| Self::no_group(&cursor.stream, group))?;
            let Stream {
                entries, groups, ..
            } = stream;
            let grp = groups
                .get_mut(group)
                .ok_or_else(|| Self::no_group(&cursor.stream, group))?;
            grp.touch(consumer, now);

            let mut out = Vec::new();
            if cursor.cursor == NEW_ENTRIES {
                let fresh: Vec<(EntryId, FieldMap)> = entries
                    .range(grp.last_delivered..)
                    .filter(|(id, _)| **id > grp.last_delivered)
                    .take(limit)
                    .map(|(id, fields)| (*id, fields.clone()))
                    .collect();
                for (id, fields) in fresh {
                    grp.last_delivered = id;
                    grp.pel.insert(
                        id,
                        PendingRecord {
                            consumer: consumer.to_string(),
                            delivered_at: now,
                            delivery_count: 1,
                        },
                    );
                    out.push(StreamEntry {
                        id: id.to_string(),
                        fields,
                    });
                }
            } else {
                let after: EntryId = cursor.cursor.parse()?;
                for (id, _) in grp
                    .pel
                    .iter()
                    .filter(|(id, rec)| **id > after && rec.consumer == consumer)
                    .take(limit)
                {
                    out.push(StreamEntry {
                        id: id.to_string(),
                        fields: entries.get(id).cloned().unwrap_or_default(),
                    });
                }
            }

            if !out.is_empty() {
                batches.push(StreamBatch {
                    stream: cursor.stream.clone(),
                    entries: out,
                });
            }
        }

        Ok(batches)
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn stream_exists(&self, stream: &str) -> Result<bool> {
        Ok(self.lock().contains_key(stream))
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<()> {
        let mut streams = self.lock();
        if !streams.contains_key(stream) {
            if !create_stream {
                return Err(EventError::store(format!(
                    "the stream `{stream}` does not exist"
                )));
            }
            streams.insert(stream.to_string(), Stream::default());
        }
        let Some(s) = streams.get_mut(stream) else {
            return Err(EventError::store(format!("the stream `{stream}` does not exist")));
        };

        if s.groups.contains_key(group) {
            return Err(EventError::GroupExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }

        let last_delivered = if start == LATEST {
            s.last_id
        } else {
            start.parse()?
        };
        s.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pel: BTreeMap::new(),
                consumers: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[StreamCursor],
        count: Option<usize>,
        block: ReadBlock,
    ) -> Result<Vec<StreamBatch>> {
        // 只有全部为 `>` 游标时才阻塞
        let may_block = cursors.iter().all(|c| c.cursor == NEW_ENTRIES);
        let deadline = Instant::now()
            + match block {
                ReadBlock::For(d) => d,
                _ => Duration::ZERO,
            };

        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batches = self.try_read(group, consumer, cursors, count)?;
            if !batches.is_empty() || !may_block {
                return Ok(batches);
            }

            match block {
                ReadBlock::NoWait => return Ok(batches),
                ReadBlock::For(_) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                ReadBlock::Forever => notified.await,
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<u64> {
        let id: EntryId = id.parse()?;
        let mut streams = self.lock();
        let grp = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        Ok(grp.pel.remove(&id).map_or(0, |_| 1))
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let streams = self.lock();
        let grp = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        let now = Instant::now();
        Ok(grp
            .pel
            .iter()
            .take(count)
            .map(|(id, rec)| PendingEntry {
                id: id.to_string(),
                consumer: rec.consumer.clone(),
                idle: now.duration_since(rec.delivered_at),
                delivery_count: rec.delivery_count,
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
        let ids = ids
            .iter()
            .map(|id| id.parse::<EntryId>())
            .collect::<Result<Vec<_>>>()?;
        let mut streams = self.lock();
        let grp = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        let now = Instant::now();
        grp.touch(consumer, now);

        let mut claimed = Vec::new();
        for id in ids {
            if let Some(rec) = grp.pel.get_mut(&id)
                && now.duration_since(rec.delivered_at) >= min_idle
            {
                rec.consumer = consumer.to_string();
                rec.delivered_at = now;
                rec.delivery_count += 1;
                claimed.push(id.to_string());
            }
        }
        Ok(claimed)
    }

    async fn consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>> {
        let streams = self.lock();
        let grp = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        let now = Instant::now();
        let mut out: Vec<ConsumerInfo> = grp
            .consumers
            .iter()
            .map(|(name, seen)| ConsumerInfo {
                name: name.clone(),
                pending: grp.pel.values().filter(|r| &r.consumer == name).count() as u64,
                idle: now.duration_since(*seen),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64> {
        let mut streams = self.lock();
        let grp = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| Self::no_group(stream, group))?;
        if grp.consumers.remove(consumer).is_none() {
            return Ok(0);
        }
        let before = grp.pel.len();
        grp.pel.retain(|_, rec| rec.consumer != consumer);
        Ok((before - grp.pel.len()) as u64)
    }

    async fn publish(
        &self,
        stream: &str,
        fields: &FieldMap,
        max_len: Option<usize>,
    ) -> Result<String> {
        if fields.is_empty() {
            return Err(EventError::store("wrong number of arguments for 'xadd'"));
        }

        let id = {
            let mut streams = self.lock();
            let s = streams.entry(stream.to_string()).or_default();
            let id = s.next_id();
            s.entries.insert(id, fields.clone());
            if let Some(max_len) = max_len {
                while s.entries.len() > max_len {
                    s.entries.pop_first();
                }
            }
            id
        };

        self.appended.notify_waiters();
        Ok(id.to_string())
    }
}
