use crate::AnalyticsCollector;

pub struct AnalyticsExporter;

impl AnalyticsExporter {
    pub fn to_json(collector: &AnalyticsCollector) -> String {
        serde_json::to_string_pretty(&collector.summary()).unwrap_or_default()
    }

    pub fn to_csv(collector: &AnalyticsCollector) -> String {
        let mut lines = vec!["channel,sent,failed,total,success_rate".to_string()];
        let mut stats: Vec<_> = collector.channel_stats().into_iter().collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        for (channel, s) in stats {
            lines.push(format!("{channel},{},{},{},{}", s.sent, s.failed, s.total, s.success_rate));
        }
        lines.join("\n")
    }

    pub fn to_report(collector: &AnalyticsCollector) -> String {
        let summary = collector.summary();
        let mut lines = vec![
            "═══════════════════════════════════".to_string(),
            "  OmniMessage Analytics Report".to_string(),
            "═══════════════════════════════════".to_string(),
            format!("  Total Sent:    {}", summary["total_sent"]),
            format!("  Total Failed:  {}", summary["total_failed"]),
            format!("  Total Retried: {}", summary["total_retried"]),
            format!("  Success Rate:  {}%", summary["success_rate"]),
            String::new(),
            "── Latency ──────────────────────".to_string(),
        ];

        let lat = &summary["latency"];
        let avg = lat["avg_ms"].as_f64().unwrap_or(0.0);
        if avg > 0.0 {
            lines.push(format!("  Average:  {}ms", lat["avg_ms"]));
            lines.push(format!("  P50:      {}ms", lat["p50_ms"]));
            lines.push(format!("  P95:      {}ms", lat["p95_ms"]));
            lines.push(format!("  P99:      {}ms", lat["p99_ms"]));
        } else {
            lines.push("  No latency data".to_string());
        }

        lines.push(String::new());
        lines.push("── Channels ─────────────────────".to_string());
        if let Some(by_channel) = summary["by_channel"].as_object() {
            let mut entries: Vec<_> = by_channel.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (ch, cs) in entries {
                lines.push(format!("  {ch}: {}/{} ({}%)", cs["sent"], cs["total"], cs["success_rate"]));
            }
        }

        if let Some(errors) = summary["errors"].as_object() {
            if !errors.is_empty() {
                lines.push(String::new());
                lines.push("── Errors ───────────────────────".to_string());
                for (err, cnt) in errors {
                    lines.push(format!("  {err}: {cnt}"));
                }
            }
        }

        lines.push("═══════════════════════════════════".to_string());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_export_has_header_and_one_row_per_channel() {
        let collector = AnalyticsCollector::with_default_window();
        collector.record_sent("telegram", 10.0, None);
        collector.record_failed("telegram", "timeout");
        let csv = AnalyticsExporter::to_csv(&collector);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("channel,sent,failed,total,success_rate"));
        // f64's Display impl drops a trailing ".0", so an exact 50.0% prints as "50"
        assert_eq!(lines.next(), Some("telegram,1,1,2,50"));
    }
}
