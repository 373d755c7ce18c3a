//! 通知模板
//!
//! 根据消息信封生成邮件主题、HTML 正文和短信正文。
//! 模板为固定文案，只做字段插值；邮件正文中的插值做 HTML 转义。

use ticket_shared::events::Envelope;

/// 通知模板引擎
pub struct NotificationTemplateEngine;

impl NotificationTemplateEngine {
    /// 邮件主题，包含活动名称
    pub fn email_subject(envelope: &Envelope) -> String {
        format!("Subscription Confirmation - {}", envelope.event.name)
    }

    /// 邮件 HTML 正文，列出活动详情
    pub fn email_body(envelope: &Envelope) -> String {
        let event = &envelope.event;
        format!(
            r#"<html>
<body>
    <h2>Hello {name}!</h2>
    <p>Your subscription for the event was confirmed successfully!</p>

    <h3>Event Details:</h3>
    <ul>
        <li><strong>Name:</strong> {event_name}</li>
        <li><strong>Date:</strong> {date}</li>
        <li><strong>Time:</strong> {time}</li>
        <li><strong>Location:</strong> {location}</li>
        <li><strong>Address:</strong> {address}</li>
        <li><strong>Price:</strong> {price}</li>
    </ul>

    <p><strong>Description:</strong> {description}</p>

    <p>Thank you for subscribing!</p>
</body>
</html>
"#,
            name = escape_html(&envelope.recipient.name),
            event_name = escape_html(&event.name),
            date = escape_html(&event.date),
            time = escape_html(&event.time),
            location = escape_html(&event.location),
            address = escape_html(&event.address),
            price = escape_html(&event.price),
            description = escape_html(&event.description),
        )
    }

    /// 短信纯文本正文
    pub fn sms_body(envelope: &Envelope) -> String {
        format!(
            "Hello {}!\n\n Your subscription for the event {} was confirmed successfully!",
            envelope.recipient.name, envelope.event.name
        )
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
