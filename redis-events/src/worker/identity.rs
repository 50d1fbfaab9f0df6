use std::fmt;
use ulid::Ulid;

/// Worker 身份：消费组名 + 组内唯一的消费者名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    group: String,
    consumer: String,
}

impl WorkerIdentity {
    /// 每次进程启动生成一次：`<group>-<ulid>`
    pub fn generate(group: impl Into<String>) -> Self {
        let group = group.into();
        let consumer = format!("{group}-{}", Ulid::new());
        Self { group, consumer }
    }

    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_consumers_are_unique_within_group() {
        let a = WorkerIdentity::generate("foo");
        let b = WorkerIdentity::generate("foo");
        assert_eq!(a.group(), "foo");
        assert!(a.consumer().starts_with("foo-"));
        assert_ne!(a.consumer(), b.consumer());
    }
}
