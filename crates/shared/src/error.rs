//! 统一错误处理模块
//!
//! 定义通知系统中共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum TicketError {
    // ==================== 消息队列错误 ====================
    #[error("AMQP 错误: {0}")]
    Amqp(#[from] lapin::Error),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 编解码错误 ====================
    #[error("消息反序列化失败: {0}")]
    Deserialization(String),

    #[error("消息序列化失败: {0}")]
    Serialization(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

impl TicketError {
    /// 获取错误码，作为结构化日志字段输出
    pub fn code(&self) -> &'static str {
        match self {
            Self::Amqp(_) => "AMQP_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
