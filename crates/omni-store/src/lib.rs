//! SQLite-backed persistence for messages, delivery events, and scheduled
//! entries. Owns three tables — `messages`, `delivery_events`,
//! `scheduled_messages` — and exposes the store contract the dispatch
//! engine treats as opaque (spec §4.H). A `sqlx::Pool<Sqlite>` is
//! internally synchronized, so `MessageStore` is `Clone` + `Send + Sync`
//! without any additional locking, matching `fc-queue::sqlite::SqliteQueue`'s
//! use of a shared pool rather than a per-thread connection.

mod error;

pub use error::StoreError;

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct MessageStore {
    pool: Pool<Sqlite>,
}

impl MessageStore {
    /// Opens (creating if absent) the SQLite database at `path` and runs
    /// schema migration. Pass `"sqlite::memory:"` for ephemeral test stores.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = MessageStore { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                from_channel TEXT NOT NULL,
                to_channel TEXT NOT NULL,
                content TEXT,
                target TEXT NOT NULL,
                template TEXT,
                template_vars TEXT,
                metadata TEXT,
                priority INTEGER DEFAULT 5,
                status TEXT DEFAULT 'pending',
                retry_count INTEGER DEFAULT 0,
                max_retries INTEGER DEFAULT 3,
                last_error TEXT,
                created_at TEXT NOT NULL,
                sent_at TEXT,
                updated_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS delivery_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                event TEXT NOT NULL,
                channel TEXT,
                details TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_messages (
                id TEXT PRIMARY KEY,
                message_data TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status TEXT DEFAULT 'pending',
                executed_at TEXT,
                result TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_msg_status ON messages(status)",
            "CREATE INDEX IF NOT EXISTS idx_msg_channel ON messages(to_channel)",
            "CREATE INDEX IF NOT EXISTS idx_msg_created ON messages(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_msg_target ON messages(target)",
            "CREATE INDEX IF NOT EXISTS idx_events_msg ON delivery_events(message_id)",
            "CREATE INDEX IF NOT EXISTS idx_sched_status ON scheduled_messages(status)",
            "CREATE INDEX IF NOT EXISTS idx_sched_at ON scheduled_messages(scheduled_at)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Upsert by id. `msg` is the `Message::to_map()` shape.
    pub async fn save_message(&self, msg: &Map<String, Value>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let get_str = |k: &str| msg.get(k).and_then(Value::as_str).unwrap_or_default().to_string();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO messages
            (id, from_channel, to_channel, content, target, template, template_vars,
             metadata, priority, status, retry_count, max_retries, last_error,
             created_at, sent_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(get_str("id"))
        .bind(get_str("from_channel"))
        .bind(get_str("to_channel"))
        .bind(get_str("content"))
        .bind(get_str("target"))
        .bind(msg.get("template").and_then(Value::as_str))
        .bind(serde_json::to_string(msg.get("template_vars").unwrap_or(&Value::Null)).unwrap_or_default())
        .bind(serde_json::to_string(msg.get("metadata").unwrap_or(&Value::Null)).unwrap_or_default())
        .bind(msg.get("priority").and_then(Value::as_i64).unwrap_or(5))
        .bind(msg.get("status").and_then(Value::as_str).unwrap_or("pending"))
        .bind(msg.get("retry_count").and_then(Value::as_i64).unwrap_or(0))
        .bind(msg.get("max_retries").and_then(Value::as_i64).unwrap_or(3))
        .bind(msg.get("last_error").and_then(Value::as_str))
        .bind(msg.get("created_at").and_then(Value::as_str).unwrap_or(&now))
        .bind(msg.get("sent_at").and_then(Value::as_str))
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stamps `sent_at` only on transition to `sent`, and only if not
    /// already set — `COALESCE(?, sent_at)` exactly as the source does.
    pub async fn update_status(&self, message_id: &str, status: &str, error: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        match error {
            Some(err) => {
                sqlx::query("UPDATE messages SET status=?, last_error=?, updated_at=? WHERE id=?")
                    .bind(status)
                    .bind(err)
                    .bind(&now)
                    .bind(message_id)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                let sent_at = if status == "sent" { Some(now.clone()) } else { None };
                sqlx::query(
                    "UPDATE messages SET status=?, sent_at=COALESCE(?, sent_at), updated_at=? WHERE id=?",
                )
                .bind(status)
                .bind(sent_at)
                .bind(&now)
                .bind(message_id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn log_event(
        &self,
        message_id: &str,
        event: &str,
        channel: Option<&str>,
        details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO delivery_events (message_id, event, channel, details, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(event)
        .bind(channel)
        .bind(details)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| message_row_to_value(&r)))
    }

    pub async fn get_events(&self, message_id: &str) -> Result<Vec<Value>> {
        let rows = sqlx::query("SELECT * FROM delivery_events WHERE message_id = ? ORDER BY timestamp")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(event_row_to_value).collect())
    }

    /// Conjunctive filter over the optional fields, descending `created_at`.
    #[allow(clippy::too_many_arguments)]
    pub async fn query_messages(
        &self,
        channel: Option<&str>,
        status: Option<&str>,
        target: Option<&str>,
        since: Option<&str>,
        until: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Value>> {
        let mut conditions = Vec::new();
        if channel.is_some() {
            conditions.push("to_channel = ?");
        }
        if status.is_some() {
            conditions.push("status = ?");
        }
        if target.is_some() {
            conditions.push("target = ?");
        }
        if since.is_some() {
            conditions.push("created_at >= ?");
        }
        if until.is_some() {
            conditions.push("created_at <= ?");
        }
        let where_clause = if conditions.is_empty() { "1=1".to_string() } else { conditions.join(" AND ") };
        let sql = format!(
            "SELECT * FROM messages WHERE {where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );

        let mut query = sqlx::query(&sql);
        for value in [channel, status, target, since, until].into_iter().flatten() {
            query = query.bind(value);
        }
        query = query.bind(limit).bind(offset);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(message_row_to_value).collect())
    }

    pub async fn count_messages(&self, channel: Option<&str>, status: Option<&str>) -> Result<i64> {
        let mut conditions = Vec::new();
        if channel.is_some() {
            conditions.push("to_channel = ?");
        }
        if status.is_some() {
            conditions.push("status = ?");
        }
        let where_clause = if conditions.is_empty() { "1=1".to_string() } else { conditions.join(" AND ") };
        let sql = format!("SELECT COUNT(*) as cnt FROM messages WHERE {where_clause}");

        let mut query = sqlx::query(&sql);
        for value in [channel, status].into_iter().flatten() {
            query = query.bind(value);
        }
        let row = query.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>("cnt"))
    }

    /// Per-status, per-channel, per-hour-bucket breakdown plus overall
    /// success rate, over the trailing `hours` window. Hour buckets use
    /// `substr(created_at, 1, 13)` — SQLite has no native date-trunc, and
    /// the source reaches for raw SQL here rather than an ORM abstraction.
    pub async fn get_stats(&self, hours: i64) -> Result<Value> {
        let since = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();

        let status_rows = sqlx::query(
            "SELECT status, COUNT(*) as cnt FROM messages WHERE created_at >= ? GROUP BY status",
        )
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;
        let mut by_status = Map::new();
        let mut total: i64 = 0;
        let mut sent: i64 = 0;
        for row in &status_rows {
            let status: String = row.get("status");
            let cnt: i64 = row.get("cnt");
            total += cnt;
            if status == "sent" {
                sent = cnt;
            }
            by_status.insert(status, Value::from(cnt));
        }

        let channel_rows = sqlx::query(
            "SELECT to_channel, COUNT(*) as cnt FROM messages WHERE created_at >= ? GROUP BY to_channel",
        )
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;
        let by_channel: Map<String, Value> = channel_rows
            .iter()
            .map(|r| (r.get::<String, _>("to_channel"), Value::from(r.get::<i64, _>("cnt"))))
            .collect();

        let hourly_rows = sqlx::query(
            r#"
            SELECT substr(created_at, 1, 13) as hour, COUNT(*) as cnt
            FROM messages WHERE created_at >= ?
            GROUP BY hour ORDER BY hour
            "#,
        )
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;
        let by_hour: Map<String, Value> = hourly_rows
            .iter()
            .map(|r| (r.get::<String, _>("hour"), Value::from(r.get::<i64, _>("cnt"))))
            .collect();

        let success_rate = if total > 0 { (sent as f64 / total as f64 * 100.0 * 100.0).round() / 100.0 } else { 0.0 };

        Ok(serde_json::json!({
            "period_hours": hours,
            "total": total,
            "by_status": by_status,
            "by_channel": by_channel,
            "by_hour": by_hour,
            "success_rate": success_rate,
        }))
    }

    /// Upsert by id, so a recurring entry's advancing `scheduled_at` can be
    /// re-persisted on every tick without the caller tracking insert-vs-update.
    pub async fn save_scheduled(&self, schedule_id: &str, message_data: &Value, scheduled_at: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_messages (id, message_data, scheduled_at, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET scheduled_at = excluded.scheduled_at, status = 'pending'
            "#,
        )
        .bind(schedule_id)
        .bind(serde_json::to_string(message_data).unwrap_or_default())
        .bind(scheduled_at)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_due_scheduled(&self) -> Result<Vec<Value>> {
        let now = Utc::now().to_rfc3339();
        let rows = sqlx::query(
            "SELECT * FROM scheduled_messages WHERE status='pending' AND scheduled_at <= ? ORDER BY scheduled_at",
        )
        .bind(&now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(scheduled_row_to_value).collect())
    }

    pub async fn mark_scheduled_done(&self, schedule_id: &str, result: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_messages SET status='executed', executed_at=?, result=? WHERE id=?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(result)
        .bind(schedule_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_scheduled(&self, status: Option<&str>, limit: i64) -> Result<Vec<Value>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM scheduled_messages WHERE status=? ORDER BY scheduled_at LIMIT ?")
                    .bind(s)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM scheduled_messages ORDER BY scheduled_at LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(scheduled_row_to_value).collect())
    }

    pub async fn delete_scheduled(&self, schedule_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_messages WHERE id=?")
            .bind(schedule_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn message_row_to_value(row: &SqliteRow) -> Value {
    let mut m = Map::new();
    m.insert("id".into(), Value::String(row.get("id")));
    m.insert("from_channel".into(), Value::String(row.get("from_channel")));
    m.insert("to_channel".into(), Value::String(row.get("to_channel")));
    m.insert("content".into(), Value::String(row.get::<Option<String>, _>("content").unwrap_or_default()));
    m.insert("target".into(), Value::String(row.get("target")));
    m.insert("template".into(), row.get::<Option<String>, _>("template").map(Value::String).unwrap_or(Value::Null));
    m.insert(
        "template_vars".into(),
        serde_json::from_str(&row.get::<String, _>("template_vars")).unwrap_or(Value::Null),
    );
    m.insert(
        "metadata".into(),
        serde_json::from_str(&row.get::<String, _>("metadata")).unwrap_or(Value::Null),
    );
    m.insert("priority".into(), Value::from(row.get::<i64, _>("priority")));
    m.insert("status".into(), Value::String(row.get("status")));
    m.insert("retry_count".into(), Value::from(row.get::<i64, _>("retry_count")));
    m.insert("max_retries".into(), Value::from(row.get::<i64, _>("max_retries")));
    m.insert("last_error".into(), row.get::<Option<String>, _>("last_error").map(Value::String).unwrap_or(Value::Null));
    m.insert("created_at".into(), Value::String(row.get("created_at")));
    m.insert("sent_at".into(), row.get::<Option<String>, _>("sent_at").map(Value::String).unwrap_or(Value::Null));
    m.insert("updated_at".into(), row.get::<Option<String>, _>("updated_at").map(Value::String).unwrap_or(Value::Null));
    Value::Object(m)
}

fn event_row_to_value(row: &SqliteRow) -> Value {
    let mut m = Map::new();
    m.insert("id".into(), Value::from(row.get::<i64, _>("id")));
    m.insert("message_id".into(), Value::String(row.get("message_id")));
    m.insert("event".into(), Value::String(row.get("event")));
    m.insert("channel".into(), row.get::<Option<String>, _>("channel").map(Value::String).unwrap_or(Value::Null));
    m.insert("details".into(), row.get::<Option<String>, _>("details").map(Value::String).unwrap_or(Value::Null));
    m.insert("timestamp".into(), Value::String(row.get("timestamp")));
    Value::Object(m)
}

fn scheduled_row_to_value(row: &SqliteRow) -> Value {
    let mut m = Map::new();
    m.insert("id".into(), Value::String(row.get("id")));
    m.insert(
        "message_data".into(),
        serde_json::from_str(&row.get::<String, _>("message_data")).unwrap_or(Value::Null),
    );
    m.insert("scheduled_at".into(), Value::String(row.get("scheduled_at")));
    m.insert("status".into(), Value::String(row.get("status")));
    m.insert("executed_at".into(), row.get::<Option<String>, _>("executed_at").map(Value::String).unwrap_or(Value::Null));
    m.insert("result".into(), row.get::<Option<String>, _>("result").map(Value::String).unwrap_or(Value::Null));
    m.insert("created_at".into(), Value::String(row.get("created_at")));
    Value::Object(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> MessageStore {
        MessageStore::connect("sqlite::memory:").await.unwrap()
    }

    fn sample_message(id: &str, channel: &str, status: &str) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("id".into(), json!(id));
        m.insert("from_channel".into(), json!("webhook"));
        m.insert("to_channel".into(), json!(channel));
        m.insert("content".into(), json!("hello"));
        m.insert("target".into(), json!("http://x"));
        m.insert("status".into(), json!(status));
        m.insert("created_at".into(), json!(Utc::now().to_rfc3339()));
        m
    }

    #[tokio::test]
    async fn save_and_fetch_round_trips() {
        let store = store().await;
        store.save_message(&sample_message("m1", "webhook", "pending")).await.unwrap();
        let fetched = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(fetched["id"], "m1");
        assert_eq!(fetched["status"], "pending");
    }

    #[tokio::test]
    async fn update_status_stamps_sent_at_only_once() {
        let store = store().await;
        store.save_message(&sample_message("m2", "webhook", "pending")).await.unwrap();
        store.update_status("m2", "sent", None).await.unwrap();
        let first = store.get_message("m2").await.unwrap().unwrap();
        let sent_at = first["sent_at"].as_str().unwrap().to_string();

        store.update_status("m2", "delivered", None).await.unwrap();
        let second = store.get_message("m2").await.unwrap().unwrap();
        assert_eq!(second["sent_at"].as_str().unwrap(), sent_at);
    }

    #[tokio::test]
    async fn query_messages_filters_by_channel_and_status() {
        let store = store().await;
        store.save_message(&sample_message("m3", "telegram", "sent")).await.unwrap();
        store.save_message(&sample_message("m4", "webhook", "dead")).await.unwrap();

        let results = store
            .query_messages(Some("telegram"), None, None, None, None, 100, 0)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "m3");
    }

    #[tokio::test]
    async fn scheduled_entries_round_trip_and_delete() {
        let store = store().await;
        store
            .save_scheduled("s1", &json!({"channel": "webhook"}), "2020-01-01T00:00:00Z")
            .await
            .unwrap();
        let due = store.get_due_scheduled().await.unwrap();
        assert_eq!(due.len(), 1);
        assert!(store.delete_scheduled("s1").await.unwrap());
        assert!(!store.delete_scheduled("s1").await.unwrap());
    }

    #[tokio::test]
    async fn log_event_is_append_only_and_ordered() {
        let store = store().await;
        store.save_message(&sample_message("m5", "webhook", "pending")).await.unwrap();
        store.log_event("m5", "created", Some("webhook"), None).await.unwrap();
        store.log_event("m5", "sent", Some("webhook"), None).await.unwrap();
        let events = store.get_events("m5").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "created");
        assert_eq!(events[1]["event"], "sent");
    }
}
