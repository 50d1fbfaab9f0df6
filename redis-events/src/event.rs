//! 事件信封（Event）与线上编解码
//!
//! 线上形态为字段表（field map）：
//! - 保留字段 `action` 以纯文本保存动作名；
//! - 其余字段均以 JSON 文本保存，解码后恢复为原始 JSON 类型（数字、布尔、嵌套结构等）。
//!
//! `action` 永远不会出现在 `data` 中：解码时从信封中取出，编码时重新写入。
//!
use crate::error::{EventError, EventResult};
use bon::Builder;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 保留字段：动作名
pub const ACTION_FIELD: &str = "action";

/// 线上字段表
pub type FieldMap = BTreeMap<String, String>;

/// 事件数据
pub type EventData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct Event {
    /// 所属流
    #[builder(into)]
    stream: String,
    /// 动作名
    #[builder(into)]
    action: String,
    /// 由流存储在发布时分配；待发布的事件为空
    event_id: Option<String>,
    /// 事件数据
    #[builder(default)]
    data: EventData,
}

impl Event {
    pub fn new(stream: impl Into<String>, action: impl Into<String>, data: EventData) -> Self {
        Self {
            stream: stream.into(),
            action: action.into(),
            event_id: None,
            data,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn data(&self) -> &EventData {
        &self.data
    }

    pub fn into_data(self) -> EventData {
        self.data
    }

    /// 将事件数据反序列化为调用方定义的强类型结构
    pub fn data_as<T: DeserializeOwned>(&self) -> EventResult<T> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }

    /// 编码为线上字段表
    pub fn encode(&self) -> EventResult<FieldMap> {
        let mut fields = FieldMap::new();
        for (key, value) in &self.data {
            if key == ACTION_FIELD {
                return Err(EventError::ReservedField {
                    stream: self.stream.clone(),
                    field: key.clone(),
                });
            }
            fields.insert(key.clone(), serde_json::to_string(value)?);
        }
        fields.insert(ACTION_FIELD.to_string(), self.action.clone());
        Ok(fields)
    }

    /// 从流条目解码；缺失 `action` 或字段不是合法 JSON 时返回解码错误
    pub fn decode(stream: &str, entry_id: &str, fields: &FieldMap) -> EventResult<Self> {
        let action = fields
            .get(ACTION_FIELD)
            .ok_or_else(|| EventError::MissingAction {
                stream: stream.to_string(),
                entry_id: entry_id.to_string(),
            })?;

        let mut data = EventData::new();
        for (key, raw) in fields {
            if key == ACTION_FIELD {
                continue;
            }
            let value: Value =
                serde_json::from_str(raw).map_err(|e| EventError::MalformedField {
                    stream: stream.to_string(),
                    entry_id: entry_id.to_string(),
                    field: key.clone(),
                    reason: e.to_string(),
                })?;
            data.insert(key.clone(), value);
        }

        Ok(Self {
            stream: stream.to_string(),
            action: action.clone(),
            event_id: Some(entry_id.to_string()),
            data,
        })
    }
}
