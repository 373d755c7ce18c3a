//! 共享库
//!
//! 包含通知工作者共用的配置、错误处理、消息信封模型、AMQP 队列封装与可观测性基础设施。

pub mod amqp;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
