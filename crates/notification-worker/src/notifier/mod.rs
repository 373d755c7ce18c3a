//! 多渠道通知发送器
//!
//! 通过 `Notifier` trait 抽象发送行为，邮件与短信渠道提供独立实现。
//! 分发器只依赖该 trait，新增渠道时只需实现同一 trait 并在启动时注册。

mod email;
mod sms;

use async_trait::async_trait;
use ticket_shared::events::{Envelope, NotificationChannel};

use crate::error::NotificationError;

pub use email::{EmailNotifier, SmtpEmailNotifier};
pub use sms::SmsNotifier;

/// 发送回执
///
/// 外部渠道返回的消息标识用于追踪投递状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub channel: NotificationChannel,
    pub message_id: Option<String>,
}

/// 通知发送器 trait，各渠道实现具体的推送逻辑
///
/// 每次调用只尝试发送一次，内部不做重试。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 将信封中的活动信息发送给接收人
    async fn send(&self, envelope: &Envelope) -> Result<SendReceipt, NotificationError>;

    /// 该发送器支持的渠道
    fn channel(&self) -> NotificationChannel;
}
