//! 通知服务错误类型
//!
//! 定义投递、路由和消息反序列化等场景的错误分类。
//! 所有变体都在单条消息范围内恢复，只记录日志，不会中断消费循环。

use thiserror::Error;
use ticket_shared::error::TicketError;

#[derive(Debug, Error)]
pub enum NotificationError {
    /// 渠道外部调用失败（网络、认证、收件人被拒等），不重试
    #[error("通知发送失败: 渠道={channel}, 原因={reason}")]
    DeliveryFailed { channel: String, reason: String },

    /// 消息类型不在已知判别符集合中
    #[error("不支持的消息类型: {message_type}")]
    UnsupportedType { message_type: String },

    /// 渠道已知但未注册发送器（通常是配置未启用该渠道）
    #[error("渠道未注册发送器: {channel}")]
    NotifierNotRegistered { channel: String },

    #[error("通知反序列化失败: {0}")]
    Deserialization(String),

    #[error(transparent)]
    Shared(#[from] TicketError),
}

impl NotificationError {
    pub fn delivery(channel: impl ToString, reason: impl ToString) -> Self {
        Self::DeliveryFailed {
            channel: channel.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 是否属于路由失败（未调用任何发送器）
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType { .. } | Self::NotifierNotRegistered { .. }
        )
    }
}
