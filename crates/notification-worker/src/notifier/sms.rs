//! 短信发送器
//!
//! 调用短信服务商（Twilio 兼容）的消息创建接口：
//! `POST {api_base_url}/2010-04-01/Accounts/{account_sid}/Messages.json`，
//! 以 HTTP Basic 认证携带账号 SID 与 Auth Token。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use ticket_shared::config::SmsConfig;
use ticket_shared::error::TicketError;
use ticket_shared::events::{Envelope, NotificationChannel};
use tracing::debug;

use super::{Notifier, SendReceipt};
use crate::error::NotificationError;
use crate::templates::NotificationTemplateEngine;

/// 服务商返回的消息资源，只取需要的字段
#[derive(Debug, Deserialize)]
struct MessageResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

/// 服务商错误响应
#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// 短信发送器
///
/// `reqwest::Client` 内部是 Arc 包装的连接池，可被并发任务共享。
pub struct SmsNotifier {
    client: reqwest::Client,
    endpoint: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl SmsNotifier {
    /// 根据短信配置构建发送器，超时由 HTTP 客户端负责
    pub fn from_config(config: &SmsConfig) -> Result<Self, NotificationError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| {
            NotificationError::Shared(TicketError::Internal(format!("HTTP 客户端初始化失败: {e}")))
        })?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &SmsConfig) -> Self {
        let endpoint = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            config.api_base_url.trim_end_matches('/'),
            config.account_sid
        );

        Self {
            client,
            endpoint,
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        }
    }

    /// 将非 2xx 响应转换为投递错误，尽量保留服务商给出的错误码与描述
    async fn rejection(response: reqwest::Response) -> NotificationError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let reason = match serde_json::from_str::<ProviderError>(&body) {
            Ok(ProviderError {
                code,
                message: Some(message),
            }) => match code {
                Some(code) => format!("HTTP {status}: {message} (code {code})"),
                None => format!("HTTP {status}: {message}"),
            },
            _ => format!("HTTP {status}: {body}"),
        };

        NotificationError::delivery(NotificationChannel::Sms, reason)
    }
}

#[async_trait]
impl Notifier for SmsNotifier {
    async fn send(&self, envelope: &Envelope) -> Result<SendReceipt, NotificationError> {
        let body = NotificationTemplateEngine::sms_body(envelope);
        let params = [
            ("To", envelope.recipient.phone.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", body.as_str()),
        ];

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| NotificationError::delivery(NotificationChannel::Sms, e))?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let resource: MessageResource = response
            .json()
            .await
            .map_err(|e| NotificationError::delivery(NotificationChannel::Sms, e))?;

        debug!(
            channel = "SMS",
            recipient = %envelope.recipient.phone,
            sid = %resource.sid,
            status = ?resource.status,
            "短信服务商已受理"
        );

        Ok(SendReceipt {
            channel: NotificationChannel::Sms,
            message_id: Some(resource.sid),
        })
    }

    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode, header};
    use axum::{Form, Json, Router, routing::post};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use ticket_shared::events::{Event, Recipient, message_types};

    type Captured = Arc<Mutex<Vec<(Option<String>, HashMap<String, String>)>>>;

    /// 启动一个模拟短信服务商，返回 base URL 与收到的请求
    async fn spawn_provider(status: StatusCode, reply: serde_json::Value) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();

        let app = Router::new().route(
            "/2010-04-01/Accounts/AC123/Messages.json",
            post(
                move |headers: HeaderMap, Form(form): Form<HashMap<String, String>>| {
                    let sink = sink.clone();
                    let reply = reply.clone();
                    async move {
                        let auth = headers
                            .get(header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        sink.lock().push((auth, form));
                        (status, Json(reply))
                    }
                },
            ),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), captured)
    }

    fn make_config(base_url: &str) -> SmsConfig {
        SmsConfig {
            account_sid: "AC123".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15550000000".to_string(),
            api_base_url: base_url.to_string(),
            timeout_seconds: Some(5),
        }
    }

    fn make_envelope() -> Envelope {
        Envelope::new(
            message_types::CREATE_SMS,
            Event {
                name: "Launch".to_string(),
                ..Default::default()
            },
            Recipient {
                name: "Eli".to_string(),
                email: String::new(),
                phone: "+15551234567".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_sms_send() {
        let (base_url, captured) = spawn_provider(
            StatusCode::CREATED,
            serde_json::json!({"sid": "SM0001", "status": "queued"}),
        )
        .await;
        let notifier = SmsNotifier::from_config(&make_config(&base_url)).unwrap();

        let receipt = notifier.send(&make_envelope()).await.unwrap();
        assert_eq!(receipt.channel, NotificationChannel::Sms);
        assert_eq!(receipt.message_id.as_deref(), Some("SM0001"));

        let requests = captured.lock();
        assert_eq!(requests.len(), 1);
        let (auth, form) = &requests[0];
        // base64("AC123:secret")
        assert_eq!(auth.as_deref(), Some("Basic QUMxMjM6c2VjcmV0"));
        assert_eq!(form["To"], "+15551234567");
        assert_eq!(form["From"], "+15550000000");
        assert_eq!(
            form["Body"],
            "Hello Eli!\n\n Your subscription for the event Launch was confirmed successfully!"
        );
    }

    #[tokio::test]
    async fn test_sms_provider_rejection() {
        let (base_url, _captured) = spawn_provider(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "code": 21211,
                "message": "The 'To' number is not a valid phone number.",
                "status": 400
            }),
        )
        .await;
        let notifier = SmsNotifier::from_config(&make_config(&base_url)).unwrap();

        let err = notifier.send(&make_envelope()).await.unwrap_err();
        match err {
            NotificationError::DeliveryFailed { channel, reason } => {
                assert_eq!(channel, "SMS");
                assert!(reason.contains("400"));
                assert!(reason.contains("code 21211"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sms_unreachable_provider() {
        // 绑定后立即释放端口，保证连接被拒绝
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier = SmsNotifier::from_config(&make_config(&format!("http://{addr}"))).unwrap();
        let err = notifier.send(&make_envelope()).await.unwrap_err();
        assert!(matches!(err, NotificationError::DeliveryFailed { .. }));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = make_config("https://api.twilio.com/");
        let notifier = SmsNotifier::with_client(reqwest::Client::new(), &config);
        assert_eq!(
            notifier.endpoint,
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
        assert_eq!(notifier.channel(), NotificationChannel::Sms);
    }
}
