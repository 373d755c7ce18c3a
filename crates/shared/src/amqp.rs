//! AMQP 基础设施封装
//!
//! 将 lapin 的底层 API 封装为业务友好的 Consumer/Publisher 抽象，
//! 统一队列声明、消息所有权转换、错误映射和关闭语义。
//! 消费循环本身与 lapin 解耦，任何消息流都可以驱动，便于在无 broker 的环境下测试。

use std::future::Future;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::AmqpConfig;
use crate::error::TicketError;

/// AMQP 正常关闭的 reply code
const REPLY_SUCCESS: u16 = 200;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 AMQP 消息的统一表示
///
/// 将 lapin 的 `Delivery` 转换为只保留业务所需字段的结构体，
/// 使消息可以安全地移动到独立任务中处理。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub queue: String,
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub payload: Vec<u8>,
    /// 生产者设置的 AMQP timestamp 属性（Unix 秒）
    pub timestamp: Option<u64>,
}

impl ConsumerMessage {
    fn from_delivery(queue: &str, delivery: Delivery) -> Self {
        Self {
            queue: queue.to_string(),
            delivery_tag: delivery.delivery_tag,
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            timestamp: *delivery.properties.timestamp(),
            payload: delivery.data,
        }
    }
}

/// 订阅得到的消息流
pub type MessageStream = BoxStream<'static, Result<ConsumerMessage, TicketError>>;

// ---------------------------------------------------------------------------
// 消费循环
// ---------------------------------------------------------------------------

/// 消费循环退出时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    /// 成功接收并交给 handler 的消息数
    pub received: u64,
    /// 订阅流返回的接收错误数
    pub receive_errors: u64,
    /// handler 任务 panic 的次数
    pub panicked: u64,
}

impl ConsumeStats {
    fn record_join(&mut self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            if e.is_panic() {
                self.panicked += 1;
            }
            error!(error = %e, "消息处理任务异常退出");
        }
    }
}

/// 驱动消费循环
///
/// 每条消息在独立的 tokio 任务中处理，慢速投递不会阻塞后续消息的接收，
/// 因此完成顺序不保证与接收顺序一致。
///
/// 使用 `tokio::select!` 同时监听关闭信号、已完成任务和消息流：
/// - 关闭信号变为 `true` 或消息流结束时退出循环；
/// - 关闭信号发送端被释放时只停止监听信号，循环继续直到消息流结束；
/// - 接收错误只记录日志，不中断循环；
/// - 退出前等待所有已派发的任务完成。
pub async fn consume_loop<S, F, Fut>(
    stream: S,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> ConsumeStats
where
    S: Stream<Item = Result<ConsumerMessage, TicketError>>,
    F: Fn(ConsumerMessage) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    futures::pin_mut!(stream);

    let mut stats = ConsumeStats::default();
    let mut in_flight = JoinSet::new();
    let mut shutdown_open = true;

    if *shutdown.borrow() {
        info!("启动前已收到关闭信号，消费循环不启动");
        return stats;
    }

    info!("消费循环已启动");

    loop {
        tokio::select! {
            // 偏向关闭信号，保证收到关闭时能尽快退出
            biased;

            changed = shutdown.changed(), if shutdown_open => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!("收到关闭信号，消费循环退出");
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => {
                        warn!("关闭信号发送端已释放，继续消费直到消息流结束");
                        shutdown_open = false;
                    }
                }
            }

            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                stats.record_join(joined);
            }

            next = stream.next() => {
                let Some(next) = next else {
                    warn!("消息流已结束");
                    break;
                };

                match next {
                    Ok(msg) => {
                        debug!(
                            queue = %msg.queue,
                            routing_key = %msg.routing_key,
                            delivery_tag = msg.delivery_tag,
                            redelivered = msg.redelivered,
                            published_at = ?msg.timestamp,
                            "收到队列消息"
                        );
                        stats.received += 1;
                        in_flight.spawn(handler(msg));
                    }
                    Err(e) => {
                        stats.receive_errors += 1;
                        error!(error = %e, error_code = e.code(), "接收队列消息出错");
                    }
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "等待处理中的消息完成");
    }
    while let Some(joined) = in_flight.join_next().await {
        stats.record_join(joined);
    }

    info!(
        received = stats.received,
        receive_errors = stats.receive_errors,
        panicked = stats.panicked,
        "消费循环已停止"
    );
    stats
}

// ---------------------------------------------------------------------------
// AmqpConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 AMQP 消费者
///
/// 持有连接和通道，负责声明队列并以自动确认模式订阅：
/// 消息在投递时即视为已消费，处理结果不影响确认（至多一次语义）。
pub struct AmqpConsumer {
    connection: Connection,
    channel: Channel,
    queue: String,
    consumer_tag: String,
}

impl AmqpConsumer {
    /// 建立连接、打开通道并声明队列
    ///
    /// 任何一步失败都返回 `TicketError::Amqp`，由启动流程视为致命错误。
    pub async fn connect(config: &AmqpConfig) -> Result<Self, TicketError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(config.consumer_tag.clone().into());
        let connection = Connection::connect(&config.url, properties).await?;
        let channel = connection.create_channel().await?;

        let consumer = Self {
            connection,
            channel,
            queue: config.queue.clone(),
            consumer_tag: config.consumer_tag.clone(),
        };
        consumer.declare_queue().await?;

        info!(queue = %consumer.queue, "AMQP 消费者已初始化");
        Ok(consumer)
    }

    /// 幂等声明持久化队列，参数一致时重复声明是安全的
    pub async fn declare_queue(&self) -> Result<(), TicketError> {
        declare_durable_queue(&self.channel, &self.queue).await
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 以自动确认模式订阅队列，返回拥有所有权的消息流
    pub async fn subscribe(&self) -> Result<MessageStream, TicketError> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue,
                &self.consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue, consumer_tag = %self.consumer_tag, "已订阅 AMQP 队列");

        let queue = self.queue.clone();
        Ok(consumer
            .map(move |delivery| {
                delivery
                    .map(|d| ConsumerMessage::from_delivery(&queue, d))
                    .map_err(TicketError::from)
            })
            .boxed())
    }

    /// 订阅队列并运行消费循环，直到收到关闭信号或订阅结束
    pub async fn start<F, Fut>(
        self,
        shutdown: watch::Receiver<bool>,
        handler: F,
    ) -> Result<ConsumeStats, TicketError>
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stream = self.subscribe().await?;
        let stats = consume_loop(stream, shutdown, handler).await;
        self.close().await;
        Ok(stats)
    }

    /// 关闭通道和连接，失败只记录日志
    pub async fn close(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "consumer shutdown").await {
            warn!(error = %e, "关闭 AMQP 通道失败");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "consumer shutdown").await {
            warn!(error = %e, "关闭 AMQP 连接失败");
        }
    }
}

// ---------------------------------------------------------------------------
// AmqpPublisher
// ---------------------------------------------------------------------------

/// 面向业务的 AMQP 生产者
///
/// 通过默认交换机按队列名路由发布持久化消息，与票务前端的投递方式一致。
pub struct AmqpPublisher {
    connection: Connection,
    channel: Channel,
}

impl AmqpPublisher {
    pub async fn connect(config: &AmqpConfig) -> Result<Self, TicketError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        info!("AMQP 生产者已初始化");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// 声明目标队列，便于在消费者启动前发布
    pub async fn declare_queue(&self, queue: &str) -> Result<(), TicketError> {
        declare_durable_queue(&self.channel, queue).await
    }

    /// 发送原始字节消息
    pub async fn send(&self, queue: &str, payload: &[u8]) -> Result<(), TicketError> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2)
                    .with_timestamp(u64::try_from(Utc::now().timestamp()).unwrap_or_default()),
            )
            .await?
            .await?;

        debug!(queue, bytes = payload.len(), "消息已发布");
        Ok(())
    }

    /// 将值序列化为 JSON 后发送
    ///
    /// 序列化与网络发送拆分为两步，便于独立定位故障原因。
    pub async fn send_json<T: Serialize>(&self, queue: &str, value: &T) -> Result<(), TicketError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| TicketError::Serialization(e.to_string()))?;

        self.send(queue, &payload).await
    }

    pub async fn close(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "publisher shutdown").await {
            warn!(error = %e, "关闭 AMQP 通道失败");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "publisher shutdown").await {
            warn!(error = %e, "关闭 AMQP 连接失败");
        }
    }
}

async fn declare_durable_queue(channel: &Channel, queue: &str) -> Result<(), TicketError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    debug!(queue, "队列已声明");
    Ok(())
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
