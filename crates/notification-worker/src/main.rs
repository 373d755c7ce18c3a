//! 通知工作者服务
//!
//! 消费 `tickets-queue` 中的订阅确认信封，发送邮件或短信通知。

use std::sync::Arc;

use anyhow::{Context, Result};
use notification_worker::consumer::NotificationConsumer;
use notification_worker::startup::{build_dispatcher, load_config};
use ticket_shared::observability;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(SERVICE_NAME).context("加载配置失败")?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Starting notification-worker...");

    let dispatcher = Arc::new(build_dispatcher(&config).context("初始化通知渠道失败")?);

    // broker 连接或队列声明失败时直接退出
    let consumer = NotificationConsumer::connect(&config.amqp, dispatcher).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let stats = consumer.run(shutdown_rx).await?;
    info!(
        received = stats.received,
        receive_errors = stats.receive_errors,
        panicked = stats.panicked,
        "notification-worker stopped"
    );

    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
