//! 消息信封模型
//!
//! 定义票务系统投递到通知队列的消息格式：活动信息、接收人信息、
//! 消息类型判别符与时间戳。解码遵循上游生产者的宽松约定：
//! 缺失或为 null 的字段取默认值（字符串为空，嵌套对象为各字段皆空），未知字段忽略。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TicketError;

// ---------------------------------------------------------------------------
// 消息类型判别符
// ---------------------------------------------------------------------------

/// 集中管理所有消息类型判别符，防止字符串散落在各处导致拼写不一致
pub mod message_types {
    pub const CREATE_EMAIL: &str = "create-email";
    pub const CREATE_SMS: &str = "create-sms";
}

// ---------------------------------------------------------------------------
// NotificationChannel
// ---------------------------------------------------------------------------

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Email,
    Sms,
}

impl NotificationChannel {
    /// 根据消息类型判别符查找目标渠道，未知类型返回 None
    pub fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            message_types::CREATE_EMAIL => Some(Self::Email),
            message_types::CREATE_SMS => Some(Self::Sms),
            _ => None,
        }
    }

    /// 该渠道下用于标识接收人的字段（邮箱或手机号）
    pub fn recipient_of<'a>(&self, recipient: &'a Recipient) -> &'a str {
        match self {
            Self::Email => &recipient.email,
            Self::Sms => &recipient.phone,
        }
    }

    /// 小写形式，用作指标标签
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Event / Recipient
// ---------------------------------------------------------------------------

/// 活动信息，所有字段均为展示用字符串，不做解析与校验
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub time: String,
    #[serde(deserialize_with = "null_as_default")]
    pub location: String,
    #[serde(deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price: String,
}

/// 接收人信息
///
/// 不做格式校验，非法邮箱或手机号原样交给发送器，由传输层报错。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recipient {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone: String,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// 通知消息信封
///
/// 由单条队列消息解码而来，解码后不可变，仅由处理它的任务独占持有。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    #[serde(deserialize_with = "null_as_default")]
    pub event: Event,
    /// 线上格式中字段名为 `user`
    #[serde(rename = "user", deserialize_with = "null_as_default")]
    pub recipient: Recipient,
    /// 消息类型判别符，决定投递渠道
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub message_type: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// 构造新消息，时间戳取当前时间
    pub fn new(
        message_type: impl Into<String>,
        event: Event,
        recipient: Recipient,
    ) -> Self {
        Self {
            event,
            recipient,
            message_type: message_type.into(),
            timestamp: Some(Utc::now()),
        }
    }

    /// 从队列消息体解码
    pub fn decode(payload: &[u8]) -> Result<Self, TicketError> {
        serde_json::from_slice(payload).map_err(|e| TicketError::Deserialization(e.to_string()))
    }

    /// 编码为队列消息体
    pub fn encode(&self) -> Result<Vec<u8>, TicketError> {
        serde_json::to_vec(self).map_err(|e| TicketError::Serialization(e.to_string()))
    }

    /// 消息类型对应的渠道
    pub fn channel(&self) -> Option<NotificationChannel> {
        NotificationChannel::from_message_type(&self.message_type)
    }
}

/// 将 JSON null 视为默认值，与上游生产者的宽松约定保持一致
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
