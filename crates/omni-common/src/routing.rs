use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::message::{Channel, Message};

/// A routing rule. `condition` and `transform` are boxed closures rather than
/// an enum of predicate kinds — mirrors the source's plain `Callable` fields,
/// generalized to Rust's `Fn` traits.
pub struct RoutingRule {
    pub name: String,
    pub condition: Box<dyn Fn(&Message) -> bool + Send + Sync>,
    pub target_channel: Channel,
    pub priority: i32,
    pub transform: Option<Box<dyn Fn(Message) -> Message + Send + Sync>>,
    pub enabled: bool,
}

impl RoutingRule {
    pub fn new(
        name: impl Into<String>,
        condition: impl Fn(&Message) -> bool + Send + Sync + 'static,
        target_channel: Channel,
    ) -> Self {
        RoutingRule {
            name: name.into(),
            condition: Box::new(condition),
            target_channel,
            priority: 0,
            transform: None,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_transform(mut self, transform: impl Fn(Message) -> Message + Send + Sync + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// A predicate that panics is swallowed, not propagated: a misbehaving
    /// rule should not take down routing for every other message.
    pub fn matches(&self, message: &Message) -> bool {
        if !self.enabled {
            return false;
        }
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.condition)(message)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub message: Message,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl DeadLetterEntry {
    pub fn new(message: Message, error: impl Into<String>, retry_count: u32) -> Self {
        DeadLetterEntry {
            message,
            error: error.into(),
            failed_at: Utc::now(),
            retry_count,
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("message".into(), Value::Object(self.message.to_map()));
        m.insert("error".into(), Value::String(self.error.clone()));
        m.insert(
            "failed_at".into(),
            Value::String(self.failed_at.to_rfc3339()),
        );
        m.insert("retry_count".into(), Value::from(self.retry_count));
        m
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntrySummary {
    pub message_id: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub retry_count: u32,
}
