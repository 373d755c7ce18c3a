//! 通知消费者
//!
//! 从 AMQP 队列消费信封，解码后交给分发器，并为每条消息记录一条结果日志。
//! 每条消息在独立任务中处理，任何单条消息的失败都不会中断消费循环。

use std::sync::Arc;

use futures::future::BoxFuture;
use ticket_shared::amqp::{AmqpConsumer, ConsumeStats, ConsumerMessage};
use ticket_shared::config::AmqpConfig;
use ticket_shared::error::TicketError;
use ticket_shared::events::Envelope;
use ticket_shared::observability::metrics as app_metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::NotificationError;

/// 单条队列消息的最终结果
#[derive(Debug)]
pub enum MessageOutcome {
    /// 负载无法解码为信封，消息被跳过
    Undecodable(NotificationError),
    /// 已解码并完成分发
    Dispatched(DispatchOutcome),
}

impl MessageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Dispatched(outcome) if outcome.is_success())
    }
}

/// 通知消费者
pub struct NotificationConsumer {
    consumer: AmqpConsumer,
    dispatcher: Arc<Dispatcher>,
}

impl NotificationConsumer {
    pub fn new(consumer: AmqpConsumer, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            consumer,
            dispatcher,
        }
    }

    /// 连接 broker 并声明队列，失败视为启动致命错误
    pub async fn connect(
        config: &AmqpConfig,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, NotificationError> {
        let consumer = AmqpConsumer::connect(config).await?;
        Ok(Self::new(consumer, dispatcher))
    }

    /// 启动消费循环，直到收到 shutdown 信号或订阅结束
    pub async fn run(
        self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumeStats, NotificationError> {
        info!(
            queue = %self.consumer.queue(),
            channels = ?self.dispatcher.channels(),
            "通知消费者已启动"
        );

        let stats = self
            .consumer
            .start(shutdown, message_handler(self.dispatcher))
            .await?;

        info!(received = stats.received, "通知消费者已停止");
        Ok(stats)
    }
}

/// 构造消费循环使用的 handler，每条消息得到一个可独立 spawn 的 future
pub fn message_handler(
    dispatcher: Arc<Dispatcher>,
) -> impl Fn(ConsumerMessage) -> BoxFuture<'static, ()> {
    move |msg| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            process_message(&dispatcher, &msg).await;
        })
    }
}

/// 处理单条队列消息：解码、分发、记录结果
///
/// 拆分为独立函数，测试中无需 broker 即可直接调用。
pub async fn process_message(dispatcher: &Dispatcher, msg: &ConsumerMessage) -> MessageOutcome {
    app_metrics::record_message_received(&msg.queue);

    let envelope = match Envelope::decode(&msg.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            app_metrics::record_decode_failure(&msg.queue);
            let err = match e {
                TicketError::Deserialization(reason) => NotificationError::Deserialization(reason),
                other => NotificationError::from(other),
            };
            error!(
                queue = %msg.queue,
                delivery_tag = msg.delivery_tag,
                error = %err,
                "消息解码失败，已跳过"
            );
            return MessageOutcome::Undecodable(err);
        }
    };

    let outcome = dispatcher.dispatch(&envelope).await;
    log_outcome(&envelope, msg, &outcome);
    MessageOutcome::Dispatched(outcome)
}

fn log_outcome(envelope: &Envelope, msg: &ConsumerMessage, outcome: &DispatchOutcome) {
    let recipient = envelope
        .channel()
        .map(|channel| channel.recipient_of(&envelope.recipient))
        .unwrap_or_default();

    match outcome {
        DispatchOutcome::Delivered(receipt) => info!(
            delivery_tag = msg.delivery_tag,
            channel = %receipt.channel,
            recipient = %recipient,
            event = %envelope.event.name,
            message_id = ?receipt.message_id,
            "通知已发送"
        ),
        DispatchOutcome::Failed { channel, error } => error!(
            delivery_tag = msg.delivery_tag,
            channel = %channel,
            recipient = %recipient,
            event = %envelope.event.name,
            error = %error,
            "通知发送失败"
        ),
        DispatchOutcome::Unroutable(error) => warn!(
            delivery_tag = msg.delivery_tag,
            message_type = %envelope.message_type,
            recipient = %recipient,
            event = %envelope.event.name,
            error = %error,
            "消息无法路由，已跳过"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{MockNotifier, SendReceipt};
    use ticket_shared::events::NotificationChannel;

    fn make_message(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            queue: "tickets-queue".to_string(),
            delivery_tag: 1,
            routing_key: "tickets-queue".to_string(),
            redelivered: false,
            payload: payload.to_vec(),
            timestamp: None,
        }
    }

    fn email_dispatcher(sends: usize) -> Dispatcher {
        let mut email = MockNotifier::new();
        email
            .expect_channel()
            .return_const(NotificationChannel::Email);
        email.expect_send().times(sends).returning(|envelope| {
            assert_eq!(envelope.recipient.email, "a@b.com");
            Ok(SendReceipt {
                channel: NotificationChannel::Email,
                message_id: Some("<1@b.com>".to_string()),
            })
        });

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(email));
        dispatcher
    }

    #[tokio::test]
    async fn test_process_valid_message() {
        let dispatcher = email_dispatcher(1);
        let msg = make_message(
            br#"{"event":{"name":"Launch"},"user":{"email":"a@b.com"},"type":"create-email","timestamp":"2024-01-01T00:00:00Z"}"#,
        );

        let outcome = process_message(&dispatcher, &msg).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_process_undecodable_message() {
        let dispatcher = email_dispatcher(0);
        let msg = make_message(b"not valid json");

        let outcome = process_message(&dispatcher, &msg).await;
        match outcome {
            MessageOutcome::Undecodable(NotificationError::Deserialization(reason)) => {
                assert!(!reason.is_empty())
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_process_unknown_type() {
        let dispatcher = email_dispatcher(0);
        let msg = make_message(br#"{"user":{"email":"a@b.com"},"type":"create-fax"}"#);

        let outcome = process_message(&dispatcher, &msg).await;
        assert!(!outcome.is_success());
        assert!(matches!(
            outcome,
            MessageOutcome::Dispatched(DispatchOutcome::Unroutable(ref e)) if e.is_routing_failure()
        ));
    }

    #[tokio::test]
    async fn test_message_handler_runs_to_completion() {
        let handler = message_handler(Arc::new(email_dispatcher(1)));
        let msg = make_message(br#"{"user":{"email":"a@b.com"},"type":"create-email"}"#);

        tokio::spawn(handler(msg)).await.unwrap();
    }
}
