//! 通知工作者服务
//!
//! 从 AMQP 队列消费订阅确认信封，按消息类型路由到邮件或短信发送器。
//! 每条消息只尝试投递一次，失败只记录日志，不中断消费。

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod startup;
pub mod templates;
