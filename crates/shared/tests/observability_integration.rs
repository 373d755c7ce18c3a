//! 可观测性模块集成测试
//!
//! 全局 recorder 与日志订阅器每个进程只能安装一次，因此初始化场景集中在单个测试中。

use ticket_shared::observability::metrics::{
    get_handle, record_decode_failure, record_dispatch, record_message_received,
};
use ticket_shared::observability::{self, ObservabilityConfig};

#[tokio::test]
async fn test_init_exports_recorded_metrics() {
    let config = ObservabilityConfig {
        metrics_port: 0,
        ..Default::default()
    }
    .with_service_name("observability-it");

    let _guard = observability::init(&config).await.unwrap();

    record_message_received("tickets-queue");
    record_message_received("tickets-queue");
    record_decode_failure("tickets-queue");
    record_dispatch("email", "delivered", 0.12);
    record_dispatch("sms", "failed", 0.4);

    let rendered = get_handle().expect("初始化后应存在 handle").render();

    assert!(rendered.contains("queue_messages_received_total{queue=\"tickets-queue\"} 2"));
    assert!(rendered.contains("queue_decode_failures_total{queue=\"tickets-queue\"} 1"));
    assert!(rendered.contains("notifications_dispatched_total"));
    assert!(rendered.contains("outcome=\"delivered\""));
    assert!(rendered.contains("outcome=\"failed\""));
    assert!(rendered.contains("notification_send_duration_seconds"));
    assert!(rendered.contains("service_starts_total{service=\"observability-it\"} 1"));
}

#[test]
fn test_partial_config_uses_defaults() {
    let config: ObservabilityConfig =
        serde_json::from_str(r#"{"json_logs": true, "metrics_port": 9464}"#).unwrap();

    assert!(config.json_logs);
    assert_eq!(config.metrics_port, 9464);
    assert!(config.metrics_enabled);
    assert_eq!(config.log_level, "info");
}
