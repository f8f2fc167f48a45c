use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Telegram,
    Whatsapp,
    Discord,
    Slack,
    Email,
    Webhook,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Telegram => "telegram",
            Channel::Whatsapp => "whatsapp",
            Channel::Discord => "discord",
            Channel::Slack => "slack",
            Channel::Email => "email",
            Channel::Webhook => "webhook",
        }
    }

    pub fn all() -> [Channel; 6] {
        [
            Channel::Telegram,
            Channel::Whatsapp,
            Channel::Discord,
            Channel::Slack,
            Channel::Email,
            Channel::Webhook,
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = GatewayErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Channel::Telegram),
            "whatsapp" => Ok(Channel::Whatsapp),
            "discord" => Ok(Channel::Discord),
            "slack" => Ok(Channel::Slack),
            "email" => Ok(Channel::Email),
            "webhook" => Ok(Channel::Webhook),
            other => Err(GatewayErrorKind::InvalidInput(format!(
                "unknown channel '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Failed,
    Retrying,
    Dead,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Retrying => "retrying",
            MessageStatus::Dead => "dead",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = GatewayErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "failed" => Ok(MessageStatus::Failed),
            "retrying" => Ok(MessageStatus::Retrying),
            "dead" => Ok(MessageStatus::Dead),
            other => Err(GatewayErrorKind::InvalidInput(format!(
                "unknown status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Priority {
    Low = 0,
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        p as i32
    }
}

impl TryFrom<i32> for Priority {
    type Error = GatewayErrorKind;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            5 => Ok(Priority::Normal),
            8 => Ok(Priority::High),
            10 => Ok(Priority::Critical),
            other => Err(GatewayErrorKind::InvalidInput(format!(
                "unknown priority '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing)]
    pub inline_bytes: Option<Vec<u8>>,
    #[serde(default)]
    pub size: u64,
}

impl Attachment {
    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("filename".into(), Value::String(self.filename.clone()));
        m.insert(
            "content_type".into(),
            Value::String(self.content_type.clone()),
        );
        m.insert(
            "url".into(),
            self.url.clone().map(Value::String).unwrap_or(Value::Null),
        );
        m.insert("size".into(), Value::from(self.size));
        m
    }
}

fn attachment_from_map(data: &Map<String, Value>) -> Attachment {
    Attachment {
        filename: data.get("filename").and_then(Value::as_str).unwrap_or_default().to_string(),
        content_type: data.get("content_type").and_then(Value::as_str).unwrap_or_default().to_string(),
        url: data.get("url").and_then(Value::as_str).map(str::to_string),
        inline_bytes: None,
        size: data.get("size").and_then(Value::as_u64).unwrap_or(0),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_id")]
    pub id: String,
    pub from_channel: Channel,
    pub to_channel: Channel,
    pub content: String,
    pub target: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_status")]
    pub status: MessageStatus,
    #[serde(default, rename = "template")]
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_vars: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_status() -> MessageStatus {
    MessageStatus::Pending
}

fn default_max_retries() -> u32 {
    3
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Message {
    pub fn new(from_channel: Channel, to_channel: Channel, content: impl Into<String>, target: impl Into<String>) -> Self {
        Message {
            id: new_id(),
            from_channel,
            to_channel,
            content: content.into(),
            target: target.into(),
            attachments: Vec::new(),
            metadata: Map::new(),
            priority: Priority::Normal,
            status: MessageStatus::Pending,
            template_name: None,
            template_vars: Map::new(),
            created_at: Utc::now(),
            sent_at: None,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
        }
    }

    /// Ingress DTO contract: build a `Message` from a loosely-typed JSON map,
    /// the same shape the REST and CLI layers accept.
    pub fn from_map(data: &Map<String, Value>) -> Result<Self, GatewayErrorKind> {
        let from_channel = parse_channel_field(data, "from_channel")?;
        let to_channel = parse_channel_field(data, "to_channel")?;
        let content = data
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let target = data
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let id = data
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(new_id);

        let metadata = data
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let template_vars = data
            .get("template_vars")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let priority = match data.get("priority") {
            Some(Value::Number(n)) => Priority::try_from(n.as_i64().unwrap_or(5) as i32)?,
            _ => Priority::Normal,
        };

        let status = match data.get("status").and_then(Value::as_str) {
            Some(s) => s.parse()?,
            None => MessageStatus::Pending,
        };

        let max_retries = data
            .get("max_retries")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(3);

        let attachments = data
            .get("attachments")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_object())
                    .map(attachment_from_map)
                    .collect()
            })
            .unwrap_or_default();

        let created_at = data
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let sent_at = data
            .get("sent_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        let retry_count = data
            .get("retry_count")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(0);

        let last_error = data
            .get("last_error")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Message {
            id,
            from_channel,
            to_channel,
            content,
            target,
            attachments,
            metadata,
            priority,
            status,
            template_name: data
                .get("template")
                .and_then(Value::as_str)
                .map(str::to_string),
            template_vars,
            created_at,
            sent_at,
            retry_count,
            max_retries,
            last_error,
        })
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("id".into(), Value::String(self.id.clone()));
        m.insert(
            "from_channel".into(),
            Value::String(self.from_channel.as_str().to_string()),
        );
        m.insert(
            "to_channel".into(),
            Value::String(self.to_channel.as_str().to_string()),
        );
        m.insert("content".into(), Value::String(self.content.clone()));
        m.insert("target".into(), Value::String(self.target.clone()));
        m.insert(
            "attachments".into(),
            Value::Array(self.attachments.iter().map(|a| Value::Object(a.to_map())).collect()),
        );
        m.insert("metadata".into(), Value::Object(self.metadata.clone()));
        m.insert("priority".into(), Value::from(self.priority as i32));
        m.insert(
            "status".into(),
            Value::String(self.status.as_str().to_string()),
        );
        m.insert(
            "template".into(),
            self.template_name
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        m.insert("template_vars".into(), Value::Object(self.template_vars.clone()));
        m.insert(
            "created_at".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        m.insert(
            "sent_at".into(),
            self.sent_at
                .map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        m.insert("retry_count".into(), Value::from(self.retry_count));
        m.insert("max_retries".into(), Value::from(self.max_retries));
        m.insert(
            "last_error".into(),
            self.last_error
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        m
    }
}

fn parse_channel_field(data: &Map<String, Value>, field: &str) -> Result<Channel, GatewayErrorKind> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayErrorKind::InvalidInput(format!("missing field '{field}'")))?
        .parse()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub success: bool,
    pub message_id: String,
    pub channel: Channel,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl SendResult {
    pub fn ok(message_id: impl Into<String>, channel: Channel, response: Value) -> Self {
        SendResult {
            success: true,
            message_id: message_id.into(),
            channel,
            response: Some(response),
            error: None,
            retry_count: 0,
        }
    }

    pub fn err(message_id: impl Into<String>, channel: Channel, error: impl Into<String>) -> Self {
        SendResult {
            success: false,
            message_id: message_id.into(),
            channel,
            response: None,
            error: Some(error.into()),
            retry_count: 0,
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("success".into(), Value::Bool(self.success));
        m.insert("message_id".into(), Value::String(self.message_id.clone()));
        m.insert(
            "channel".into(),
            Value::String(self.channel.as_str().to_string()),
        );
        m.insert("response".into(), self.response.clone().unwrap_or(Value::Null));
        m.insert(
            "error".into(),
            self.error.clone().map(Value::String).unwrap_or(Value::Null),
        );
        m.insert("retry_count".into(), Value::from(self.retry_count));
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_map() {
        let mut msg = Message::new(Channel::Webhook, Channel::Telegram, "hello", "123");
        msg.metadata.insert("k".into(), Value::String("v".into()));
        msg.template_vars.insert("name".into(), Value::String("Ada".into()));
        msg.max_retries = 7;
        msg.retry_count = 2;
        msg.attachments.push(Attachment {
            filename: "report.pdf".into(),
            content_type: "application/pdf".into(),
            url: Some("http://x/report.pdf".into()),
            inline_bytes: None,
            size: 1024,
        });
        let map = msg.to_map();
        let back = Message::from_map(&map).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.content, msg.content);
        assert_eq!(back.to_channel, msg.to_channel);
        assert_eq!(back.metadata.get("k"), msg.metadata.get("k"));
        assert_eq!(back.template_vars.get("name"), msg.template_vars.get("name"));
        assert_eq!(back.max_retries, 7);
        assert_eq!(back.retry_count, 2);
        assert_eq!(back.attachments.len(), 1);
        assert_eq!(back.attachments[0].filename, "report.pdf");
        assert_eq!(back.attachments[0].size, 1024);
    }

    #[test]
    fn rejects_unknown_channel() {
        let mut data = Map::new();
        data.insert("from_channel".into(), Value::String("webhook".into()));
        data.insert("to_channel".into(), Value::String("carrier_pigeon".into()));
        data.insert("content".into(), Value::String("hi".into()));
        data.insert("target".into(), Value::String("x".into()));
        let err = Message::from_map(&data).unwrap_err();
        assert_eq!(err.token(), "invalid_input");
    }
}
