//! 通知分发器
//!
//! 按消息类型把信封路由到对应渠道的发送器，并把所有结果归一为 `DispatchOutcome`。
//! 分发器不向调用方抛出错误，路由失败和投递失败都作为结果返回。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ticket_shared::events::{Envelope, NotificationChannel};
use ticket_shared::observability::metrics as app_metrics;
use tracing::info;

use crate::error::NotificationError;
use crate::notifier::{Notifier, SendReceipt};

/// 单条信封的分发结果
#[derive(Debug)]
pub enum DispatchOutcome {
    /// 发送器已成功提交
    Delivered(SendReceipt),
    /// 发送器调用失败
    Failed {
        channel: NotificationChannel,
        error: NotificationError,
    },
    /// 未调用任何发送器：类型未知或渠道未注册
    Unroutable(NotificationError),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }

    /// 指标与日志中使用的结果标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "delivered",
            Self::Failed { .. } => "failed",
            Self::Unroutable(_) => "unroutable",
        }
    }
}

/// 通知分发器
///
/// 渠道到发送器的映射在启动时注册完成，之后只读，可通过 `Arc` 在任务间共享。
#[derive(Default)]
pub struct Dispatcher {
    notifiers: HashMap<NotificationChannel, Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按发送器声明的渠道注册，同一渠道重复注册时后者覆盖前者
    pub fn register(&mut self, notifier: Arc<dyn Notifier>) {
        let channel = notifier.channel();
        if self.notifiers.insert(channel, notifier).is_some() {
            info!(channel = %channel, "渠道发送器已被替换");
        } else {
            info!(channel = %channel, "渠道发送器已注册");
        }
    }

    pub fn has_channel(&self, channel: NotificationChannel) -> bool {
        self.notifiers.contains_key(&channel)
    }

    /// 已注册的渠道列表
    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.notifiers.keys().copied().collect()
    }

    /// 分发一条信封，每次调用最多触发一次发送
    pub async fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        let Some(channel) = envelope.channel() else {
            let outcome = DispatchOutcome::Unroutable(NotificationError::UnsupportedType {
                message_type: envelope.message_type.clone(),
            });
            app_metrics::record_dispatch("none", outcome.label(), 0.0);
            return outcome;
        };

        let Some(notifier) = self.notifiers.get(&channel) else {
            let outcome = DispatchOutcome::Unroutable(NotificationError::NotifierNotRegistered {
                channel: channel.to_string(),
            });
            app_metrics::record_dispatch(channel.as_label(), outcome.label(), 0.0);
            return outcome;
        };

        let start = Instant::now();
        let outcome = match notifier.send(envelope).await {
            Ok(receipt) => DispatchOutcome::Delivered(receipt),
            Err(error) => DispatchOutcome::Failed { channel, error },
        };
        app_metrics::record_dispatch(
            channel.as_label(),
            outcome.label(),
            start.elapsed().as_secs_f64(),
        );

        outcome
    }
}
