//! Real-time delivery analytics: success rates, latency percentiles,
//! per-channel breakdown, error classification, minute-bucket trend, and
//! top-target counts. One lock guards all counters so a single `record_*`
//! call updates everything atomically.

mod export;

pub use export::AnalyticsExporter;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

struct Inner {
    window_size: Duration,
    total_sent: u64,
    total_failed: u64,
    total_retried: u64,
    channel_sent: HashMap<String, u64>,
    channel_failed: HashMap<String, u64>,
    latencies: Vec<(Instant, f64)>,
    error_counts: HashMap<String, u64>,
    minute_sent: HashMap<String, u64>,
    minute_failed: HashMap<String, u64>,
    target_counts: HashMap<String, u64>,
}

pub struct AnalyticsCollector {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LatencyStats {
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
    pub success_rate: f64,
}

impl AnalyticsCollector {
    pub fn new(window_size_secs: u64) -> Self {
        AnalyticsCollector {
            inner: Mutex::new(Inner {
                window_size: Duration::from_secs(window_size_secs),
                total_sent: 0,
                total_failed: 0,
                total_retried: 0,
                channel_sent: HashMap::new(),
                channel_failed: HashMap::new(),
                latencies: Vec::new(),
                error_counts: HashMap::new(),
                minute_sent: HashMap::new(),
                minute_failed: HashMap::new(),
                target_counts: HashMap::new(),
            }),
        }
    }

    pub fn with_default_window() -> Self {
        Self::new(3600)
    }

    pub fn record_sent(&self, channel: &str, latency_ms: f64, target: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.total_sent += 1;
        *inner.channel_sent.entry(channel.to_string()).or_insert(0) += 1;

        if latency_ms > 0.0 {
            let now = Instant::now();
            inner.latencies.push((now, latency_ms));
        }

        let minute_key = minute_bucket();
        *inner.minute_sent.entry(minute_key).or_insert(0) += 1;

        if let Some(target) = target {
            *inner.target_counts.entry(target.to_string()).or_insert(0) += 1;
        }
    }

    pub fn record_failed(&self, channel: &str, error: &str) {
        let mut inner = self.inner.lock();
        inner.total_failed += 1;
        *inner.channel_failed.entry(channel.to_string()).or_insert(0) += 1;

        if !error.is_empty() {
            let kind = classify_error(error);
            *inner.error_counts.entry(kind.to_string()).or_insert(0) += 1;
        }

        let minute_key = minute_bucket();
        *inner.minute_failed.entry(minute_key).or_insert(0) += 1;
    }

    pub fn record_retry(&self, _channel: &str) {
        self.inner.lock().total_retried += 1;
    }

    pub fn success_rate(&self, channel: Option<&str>) -> f64 {
        let inner = self.inner.lock();
        let (sent, failed) = match channel {
            Some(ch) => (
                *inner.channel_sent.get(ch).unwrap_or(&0),
                *inner.channel_failed.get(ch).unwrap_or(&0),
            ),
            None => (inner.total_sent, inner.total_failed),
        };
        let total = sent + failed;
        if total == 0 {
            0.0
        } else {
            round2(sent as f64 / total as f64 * 100.0)
        }
    }

    /// Percentile p is `sorted[floor(n*p)]`, p99 clamped to `n-1`. This
    /// underestimates tail latency for small `n` — preserved intentionally,
    /// not a bug to silently correct.
    pub fn latency_stats(&self) -> LatencyStats {
        let mut inner = self.inner.lock();
        prune_latencies(&mut inner);
        if inner.latencies.is_empty() {
            return LatencyStats::default();
        }

        let mut values: Vec<f64> = inner.latencies.iter().map(|(_, l)| *l).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = values.len();

        let pick = |p: f64| -> f64 {
            let idx = ((n as f64) * p) as usize;
            values[idx.min(n - 1)]
        };

        LatencyStats {
            avg_ms: round2(values.iter().sum::<f64>() / n as f64),
            p50_ms: round2(pick(0.5)),
            p95_ms: round2(pick(0.95)),
            p99_ms: round2(pick(0.99)),
            max_ms: round2(values[n - 1]),
            samples: n,
        }
    }

    pub fn channel_stats(&self) -> HashMap<String, ChannelStats> {
        let inner = self.inner.lock();
        let mut channels: Vec<&String> = inner.channel_sent.keys().chain(inner.channel_failed.keys()).collect();
        channels.sort();
        channels.dedup();

        channels
            .into_iter()
            .map(|ch| {
                let sent = *inner.channel_sent.get(ch).unwrap_or(&0);
                let failed = *inner.channel_failed.get(ch).unwrap_or(&0);
                let total = sent + failed;
                let success_rate = if total == 0 { 0.0 } else { round2(sent as f64 / total as f64 * 100.0) };
                (ch.clone(), ChannelStats { sent, failed, total, success_rate })
            })
            .collect()
    }

    pub fn error_breakdown(&self) -> HashMap<String, u64> {
        self.inner.lock().error_counts.clone()
    }

    pub fn trend(&self, minutes: i64) -> Value {
        let inner = self.inner.lock();
        let now = Utc::now();
        let start = now - chrono::Duration::minutes(minutes);
        let mut data = Vec::new();
        for i in 0..=minutes {
            let t = start + chrono::Duration::minutes(i);
            let key = t.format("%Y-%m-%d %H:%M").to_string();
            data.push(json!({
                "time": key,
                "sent": inner.minute_sent.get(&key).copied().unwrap_or(0),
                "failed": inner.minute_failed.get(&key).copied().unwrap_or(0),
            }));
        }
        json!({ "period_minutes": minutes, "data": data })
    }

    pub fn top_targets(&self, limit: usize) -> Vec<Value> {
        let inner = self.inner.lock();
        let mut targets: Vec<(&String, &u64)> = inner.target_counts.iter().collect();
        targets.sort_by(|a, b| b.1.cmp(a.1));
        targets
            .into_iter()
            .take(limit)
            .map(|(t, c)| json!({"target": t, "count": c}))
            .collect()
    }

    pub fn summary(&self) -> Value {
        let (total_sent, total_failed, total_retried) = {
            let inner = self.inner.lock();
            (inner.total_sent, inner.total_failed, inner.total_retried)
        };
        let by_channel: HashMap<String, Value> = self
            .channel_stats()
            .into_iter()
            .map(|(k, v)| (k, serde_json::to_value(v).unwrap()))
            .collect();

        json!({
            "total_sent": total_sent,
            "total_failed": total_failed,
            "total_retried": total_retried,
            "success_rate": self.success_rate(None),
            "latency": self.latency_stats(),
            "by_channel": by_channel,
            "errors": self.error_breakdown(),
            "top_targets": self.top_targets(5),
        })
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.total_sent = 0;
        inner.total_failed = 0;
        inner.total_retried = 0;
        inner.channel_sent.clear();
        inner.channel_failed.clear();
        inner.latencies.clear();
        inner.error_counts.clear();
        inner.minute_sent.clear();
        inner.minute_failed.clear();
        inner.target_counts.clear();
    }
}

fn prune_latencies(inner: &mut Inner) {
    let cutoff = Instant::now().checked_sub(inner.window_size);
    if let Some(cutoff) = cutoff {
        inner.latencies.retain(|(t, _)| *t >= cutoff);
    }
}

fn minute_bucket() -> String {
    Utc::now().format("%Y-%m-%d %H:%M").to_string()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Ordered substring classification — first match wins, matching the
/// source's if/elif chain exactly (so "auth timeout" classifies as
/// "timeout", not "auth_error").
fn classify_error(error: &str) -> &'static str {
    let lower = error.to_lowercase();
    if lower.contains("timeout") {
        "timeout"
    } else if lower.contains("rate") || lower.contains("429") || lower.contains("limit") {
        "rate_limited"
    } else if lower.contains("auth") || lower.contains("401") || lower.contains("403") {
        "auth_error"
    } else if lower.contains("not found") || lower.contains("404") {
        "not_found"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection_error"
    } else if lower.contains("500") || lower.contains("502") || lower.contains("503") {
        "server_error"
    } else {
        "other"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_with_no_data() {
        let c = AnalyticsCollector::with_default_window();
        assert_eq!(c.success_rate(None), 0.0);
    }

    #[test]
    fn success_rate_reflects_sent_and_failed() {
        let c = AnalyticsCollector::with_default_window();
        c.record_sent("telegram", 10.0, None);
        c.record_sent("telegram", 20.0, None);
        c.record_failed("telegram", "boom");
        assert_eq!(c.success_rate(None), 66.67);
    }

    #[test]
    fn classify_error_prefers_earlier_category_on_ambiguous_text() {
        assert_eq!(classify_error("auth timeout while connecting"), "timeout");
        assert_eq!(classify_error("401 Unauthorized"), "auth_error");
        assert_eq!(classify_error("connection refused"), "connection_error");
    }

    #[test]
    fn p99_underestimates_for_small_sample_by_design() {
        let c = AnalyticsCollector::with_default_window();
        for i in 1..=10 {
            c.record_sent("webhook", i as f64 * 10.0, None);
        }
        let stats = c.latency_stats();
        // sorted[floor(10*0.99)] = sorted[9] = 100.0 (the max, not a true p99)
        assert_eq!(stats.p99_ms, 100.0);
        assert_eq!(stats.samples, 10);
    }

    #[test]
    fn top_targets_sorted_descending_and_limited() {
        let c = AnalyticsCollector::with_default_window();
        c.record_sent("webhook", 1.0, Some("a"));
        c.record_sent("webhook", 1.0, Some("a"));
        c.record_sent("webhook", 1.0, Some("b"));
        let top = c.top_targets(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0]["target"], "a");
    }
}
