//! 启动装配
//!
//! 加载配置并按配置注册渠道发送器。配置错误与发送器初始化失败都是启动致命错误，
//! 不会退回默认配置运行。

use std::sync::Arc;

use ticket_shared::config::AppConfig;
use ticket_shared::error::TicketError;
use tracing::warn;

use crate::dispatcher::Dispatcher;
use crate::error::NotificationError;
use crate::notifier::{SmsNotifier, SmtpEmailNotifier};

/// 从配置文件与进程环境变量加载配置
pub fn load_config(service_name: &str) -> Result<AppConfig, NotificationError> {
    AppConfig::load(service_name).map_err(|e| TicketError::from(e).into())
}

/// 与 `load_config` 相同，环境变量通过 `lookup` 取值
pub fn load_config_with<F>(service_name: &str, lookup: F) -> Result<AppConfig, NotificationError>
where
    F: Fn(&str) -> Option<String>,
{
    AppConfig::load_with(service_name, lookup).map_err(|e| TicketError::from(e).into())
}

/// 按配置注册渠道发送器，缺少必填配置的渠道不注册
pub fn build_dispatcher(config: &AppConfig) -> Result<Dispatcher, NotificationError> {
    let mut dispatcher = Dispatcher::new();

    if config.smtp.is_configured() {
        dispatcher.register(Arc::new(SmtpEmailNotifier::from_config(&config.smtp)?));
    } else {
        warn!("smtp.host 未配置，邮件渠道未启用");
    }

    if config.sms.is_configured() {
        dispatcher.register(Arc::new(SmsNotifier::from_config(&config.sms)?));
    } else {
        warn!("sms.account_sid 未配置，短信渠道未启用");
    }

    Ok(dispatcher)
}
