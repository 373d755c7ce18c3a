//! 邮件发送器
//!
//! 基于 lettre 的异步 SMTP 传输。传输实例在启动时根据配置构建一次，
//! 内部连接池可被并发任务共享。

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use ticket_shared::config::SmtpConfig;
use ticket_shared::error::TicketError;
use ticket_shared::events::{Envelope, NotificationChannel};
use tracing::debug;
use uuid::Uuid;

use super::{Notifier, SendReceipt};
use crate::error::NotificationError;
use crate::templates::NotificationTemplateEngine;

/// 隐式 TLS 的 SMTPS 端口，其余端口使用 STARTTLS
const SMTPS_PORT: u16 = 465;

/// 邮件发送器，对传输层泛型以便测试注入 stub 传输
pub struct EmailNotifier<T> {
    transport: T,
    from: Mailbox,
}

/// 生产环境使用的 SMTP 邮件发送器
pub type SmtpEmailNotifier = EmailNotifier<AsyncSmtpTransport<Tokio1Executor>>;

impl SmtpEmailNotifier {
    /// 根据 SMTP 配置构建发送器
    ///
    /// 端口 465 使用隐式 TLS，其余端口使用 STARTTLS；`tls = false` 时使用明文连接。
    /// 配置了用户名时才附带认证信息。
    pub fn from_config(config: &SmtpConfig) -> Result<Self, NotificationError> {
        let builder = if !config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        } else if config.port == SMTPS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(transport_init_error)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(transport_init_error)?
        };

        let mut builder = builder
            .port(config.port)
            .timeout(config.timeout_seconds.map(Duration::from_secs));

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Self::new(builder.build(), &config.from_email)
    }
}

fn transport_init_error(e: lettre::transport::smtp::Error) -> NotificationError {
    NotificationError::Shared(TicketError::Internal(format!("SMTP 传输初始化失败: {e}")))
}

impl<T> EmailNotifier<T> {
    /// 发件地址在启动时解析，非法地址直接拒绝启动
    pub fn new(transport: T, from_email: &str) -> Result<Self, NotificationError> {
        let from = from_email.parse::<Mailbox>().map_err(|e| {
            NotificationError::Shared(TicketError::Internal(format!(
                "发件地址无效: {from_email}: {e}"
            )))
        })?;
        Ok(Self { transport, from })
    }

    /// 生成 Message-ID，同时作为发送回执的消息标识
    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::now_v7(), self.from.email.domain())
    }

    fn build_message(
        &self,
        envelope: &Envelope,
        message_id: &str,
    ) -> Result<Message, NotificationError> {
        let recipient = &envelope.recipient;
        let address = recipient.email.parse::<Address>().map_err(|e| {
            NotificationError::delivery(
                NotificationChannel::Email,
                format!("收件地址无效 '{}': {e}", recipient.email),
            )
        })?;
        let name = (!recipient.name.is_empty()).then(|| recipient.name.clone());

        Message::builder()
            .message_id(Some(message_id.to_string()))
            .from(self.from.clone())
            .to(Mailbox::new(name, address))
            .subject(NotificationTemplateEngine::email_subject(envelope))
            .header(ContentType::TEXT_HTML)
            .body(NotificationTemplateEngine::email_body(envelope))
            .map_err(|e| NotificationError::delivery(NotificationChannel::Email, e))
    }
}

#[async_trait]
impl<T> Notifier for EmailNotifier<T>
where
    T: AsyncTransport + Send + Sync,
    T::Error: std::fmt::Display,
{
    async fn send(&self, envelope: &Envelope) -> Result<SendReceipt, NotificationError> {
        let message_id = self.new_message_id();
        let message = self.build_message(envelope, &message_id)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotificationError::delivery(NotificationChannel::Email, e))?;

        debug!(
            channel = "EMAIL",
            recipient = %envelope.recipient.email,
            message_id = %message_id,
            "SMTP 服务器已接收邮件"
        );

        Ok(SendReceipt {
            channel: NotificationChannel::Email,
            message_id: Some(message_id),
        })
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }
}
