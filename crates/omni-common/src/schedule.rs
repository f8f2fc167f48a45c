use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub id: String,
    pub message_data: Map<String, Value>,
    pub scheduled_at: DateTime<Utc>,
    pub recurring: bool,
    pub interval_seconds: i64,
    pub max_runs: u32,
    pub run_count: u32,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<String>,
}

impl ScheduleEntry {
    pub fn new(
        id: impl Into<String>,
        message_data: Map<String, Value>,
        scheduled_at: DateTime<Utc>,
        recurring: bool,
        interval_seconds: i64,
        max_runs: u32,
    ) -> Self {
        ScheduleEntry {
            id: id.into(),
            message_data,
            scheduled_at,
            recurring,
            interval_seconds,
            max_runs,
            run_count: 0,
            status: ScheduleStatus::Pending,
            created_at: Utc::now(),
            last_run_at: None,
            last_result: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && now >= self.scheduled_at
    }

    /// Advances run bookkeeping after an execution attempt. Recurring
    /// entries with runs remaining roll `scheduled_at` forward by
    /// `interval_seconds`; everything else completes.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.run_count += 1;
        self.last_run_at = Some(now);
        if self.recurring && (self.max_runs == 0 || self.run_count < self.max_runs) {
            self.scheduled_at = self.scheduled_at + Duration::seconds(self.interval_seconds);
        } else {
            self.status = ScheduleStatus::Completed;
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("id".into(), Value::String(self.id.clone()));
        m.insert("message_data".into(), Value::Object(self.message_data.clone()));
        m.insert(
            "scheduled_at".into(),
            Value::String(self.scheduled_at.to_rfc3339()),
        );
        m.insert("recurring".into(), Value::Bool(self.recurring));
        m.insert("interval_seconds".into(), Value::from(self.interval_seconds));
        m.insert("max_runs".into(), Value::from(self.max_runs));
        m.insert("run_count".into(), Value::from(self.run_count));
        m.insert(
            "status".into(),
            Value::String(self.status.as_str().to_string()),
        );
        m.insert(
            "created_at".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        m.insert(
            "last_run_at".into(),
            self.last_run_at
                .map(|t| Value::String(t.to_rfc3339()))
                .unwrap_or(Value::Null),
        );
        m.insert(
            "last_result".into(),
            self.last_result
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurring_entry_advances_and_completes_after_max_runs() {
        let now = Utc::now();
        let mut entry = ScheduleEntry::new("e1", Map::new(), now, true, 60, 2);
        entry.advance(now);
        assert_eq!(entry.run_count, 1);
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.scheduled_at, now + Duration::seconds(60));

        entry.advance(now);
        assert_eq!(entry.run_count, 2);
        assert_eq!(entry.status, ScheduleStatus::Completed);
    }

    #[test]
    fn one_shot_entry_completes_after_first_run() {
        let now = Utc::now();
        let mut entry = ScheduleEntry::new("e2", Map::new(), now, false, 0, 0);
        entry.advance(now);
        assert_eq!(entry.status, ScheduleStatus::Completed);
    }
}
