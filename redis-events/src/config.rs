//! 配置
//!
//! - `WorkerConfig`：Worker 的超时、轮询与重试参数；
//! - `RetryPolicy`：瞬时错误的指数退避；
//! - `Settings`：从环境变量加载的进程级配置。
//!
use crate::error::{EventError, EventResult as Result};
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_PENDING_EVENT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_STREAM_MAX_LEN: usize = 1000;

/// Worker 配置
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// 待确认条目空闲多久后可被认领
    pub pending_event_timeout: Duration,
    /// 消费者空闲多久后从消费组中移除
    pub worker_timeout: Duration,
    /// 单次阻塞读取的最长等待时间
    pub block_interval: Duration,
    /// 单次读取/待确认查询的条目上限
    pub page_size: usize,
    /// 空闲消费者清理的间隔
    pub prune_interval: Duration,
    /// 瞬时错误的重试策略
    pub retry: RetryPolicy,
    /// 无法解码的条目转存的死信流（为空则仅记录日志）
    pub dead_letter_stream: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pending_event_timeout: DEFAULT_PENDING_EVENT_TIMEOUT,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            block_interval: Duration::from_secs(2),
            page_size: 1000,
            prune_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            dead_letter_stream: None,
        }
    }
}

/// 指数退避
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次（从 1 开始）连续失败后的等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// 进程级配置
#[derive(Clone, Debug)]
pub struct Settings {
    pub redis_url: String,
    pub pending_event_timeout: Duration,
    pub worker_timeout: Duration,
    /// 发布时的近似保留上限；`None` 表示不裁剪
    pub stream_max_len: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            pending_event_timeout: DEFAULT_PENDING_EVENT_TIMEOUT,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            stream_max_len: Some(DEFAULT_STREAM_MAX_LEN),
        }
    }
}

impl Settings {
    /// 读取 `REDIS_URL`、`PENDING_MESSAGE_TIMEOUT`、`WORKER_TIMEOUT`、`STREAM_MAXLEN`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => parse::<u64>(key, &raw).map(Duration::from_millis),
                None => Ok(default),
            }
        };

        let stream_max_len = match lookup("STREAM_MAXLEN") {
            Some(raw) => match parse::<usize>("STREAM_MAXLEN", &raw)? {
                0 => None,
                n => Some(n),
            },
            None => defaults.stream_max_len,
        };

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            pending_event_timeout: millis(
                "PENDING_MESSAGE_TIMEOUT",
                defaults.pending_event_timeout,
            )?,
            worker_timeout: millis("WORKER_TIMEOUT", defaults.worker_timeout)?,
            stream_max_len,
        })
    }

    /// 以本配置的超时覆盖默认 Worker 配置
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            pending_event_timeout: self.pending_event_timeout,
            worker_timeout: self.worker_timeout,
            ..WorkerConfig::default()
        }
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| EventError::Config {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let s = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s.redis_url, DEFAULT_REDIS_URL);
        assert_eq!(s.pending_event_timeout, Duration::from_secs(30));
        assert_eq!(s.worker_timeout, Duration::from_secs(30));
        assert_eq!(s.stream_max_len, Some(1000));
    }

    #[test]
    fn overrides_and_disabled_trimming() {
        let s = Settings::from_lookup(lookup(&[
            ("REDIS_URL", "redis://cache:6380"),
            ("PENDING_MESSAGE_TIMEOUT", "5000"),
            ("WORKER_TIMEOUT", " 3600000 "),
            ("STREAM_MAXLEN", "0"),
        ]))
        .unwrap();
        assert_eq!(s.redis_url, "redis://cache:6380");
        assert_eq!(s.pending_event_timeout, Duration::from_secs(5));
        assert_eq!(s.worker_timeout, Duration::from_secs(3600));
        assert_eq!(s.stream_max_len, None);

        let cfg = s.worker_config();
        assert_eq!(cfg.pending_event_timeout, Duration::from_secs(5));
        assert_eq!(cfg.page_size, 1000);
    }

    #[test]
    fn invalid_number_is_config_error() {
        let err = Settings::from_lookup(lookup(&[("WORKER_TIMEOUT", "soon")])).unwrap_err();
        match err {
            EventError::Config { key, value, .. } => {
                assert_eq!(key, "WORKER_TIMEOUT");
                assert_eq!(value, "soon");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(5), Duration::from_secs(1));
        assert_eq!(policy.delay(60), Duration::from_secs(1));
    }
}
