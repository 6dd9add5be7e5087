//! 轨迹分析：从调用记录推导效率与行为指标
//!
//! `analyze` 是纯函数；`analyze_file` 负责读取 JSONL 轨迹。

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::EvalError;
use crate::trace::{self, LogEntry};

/// 浏览类操作的关键词（按 `.` / `_` 切分后的完整词匹配）
const BROWSING_KEYWORDS: [&str; 3] = ["list", "search", "library"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetrics {
    pub total_api_calls: usize,
    pub total_duration_seconds: f64,
    pub calls_per_minute: f64,
    pub avg_duration_ms: f64,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub error_rate: f64,
    pub retry_count: usize,
    pub pagination_sequences: usize,
    pub unique_tools: usize,
    pub unique_tool_list: Vec<String>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn is_browsing_operation(name: &str) -> bool {
    name.to_lowercase()
        .split(['.', '_'])
        .any(|token| BROWSING_KEYWORDS.contains(&token))
}

pub fn analyze(entries: &[LogEntry]) -> TrajectoryMetrics {
    let total = entries.len();
    if total == 0 {
        return TrajectoryMetrics::default();
    }

    let total_duration_seconds = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => {
            let millis = (last.timestamp - first.timestamp).num_milliseconds().max(0);
            millis as f64 / 1000.0
        }
        _ => 0.0,
    };
    let calls_per_minute = if total_duration_seconds > 0.0 {
        total as f64 / (total_duration_seconds / 60.0)
    } else {
        0.0
    };
    let avg_duration_ms = entries.iter().map(|e| e.duration_ms).sum::<f64>() / total as f64;

    let failed_calls = entries.iter().filter(|e| e.is_failure()).count();

    let retry_count = entries
        .windows(2)
        .filter(|w| w[0].is_failure() && !w[1].is_failure() && w[0].tool_name == w[1].tool_name)
        .count();

    let mut pagination_sequences = 0;
    let mut run = 0;
    for entry in entries {
        if is_browsing_operation(&entry.tool_name) {
            run += 1;
        } else {
            if run >= 2 {
                pagination_sequences += 1;
            }
            run = 0;
        }
    }
    if run >= 2 {
        pagination_sequences += 1;
    }

    let unique: BTreeSet<&str> = entries.iter().map(|e| e.tool_name.as_str()).collect();

    TrajectoryMetrics {
        total_api_calls: total,
        total_duration_seconds: round_to(total_duration_seconds, 2),
        calls_per_minute: round_to(calls_per_minute, 2),
        avg_duration_ms: round_to(avg_duration_ms, 2),
        successful_calls: total - failed_calls,
        failed_calls,
        error_rate: round_to(failed_calls as f64 / total as f64, 3),
        retry_count,
        pagination_sequences,
        unique_tools: unique.len(),
        unique_tool_list: unique.into_iter().map(str::to_string).collect(),
    }
}

/// 读取轨迹文件并分析；没有任何调用记录时报错
pub fn analyze_file(path: &Path) -> Result<TrajectoryMetrics, EvalError> {
    let events = trace::read_trace(path)?;
    let entries = trace::tool_calls(&events);
    if entries.is_empty() {
        return Err(EvalError::Trace(format!(
            "no operation calls in {}",
            path.display()
        )));
    }
    Ok(analyze(&entries))
}

/// 人类可读的分析报告
pub fn render_report(m: &TrajectoryMetrics) -> String {
    let mut out = String::new();
    out.push_str("Trajectory Analysis\n");
    out.push_str(&"=".repeat(50));
    out.push('\n');
    out.push_str(&format!("Total API calls:      {}\n", m.total_api_calls));
    out.push_str(&format!("Total duration:       {:.2}s\n", m.total_duration_seconds));
    out.push_str(&format!("Calls per minute:     {:.2}\n", m.calls_per_minute));
    out.push_str(&format!("Avg call duration:    {:.2}ms\n", m.avg_duration_ms));
    out.push_str(&format!(
        "Successful / failed:  {} / {}\n",
        m.successful_calls, m.failed_calls
    ));
    out.push_str(&format!("Error rate:           {:.1}%\n", m.error_rate * 100.0));
    out.push_str(&format!("Retries:              {}\n", m.retry_count));
    out.push_str(&format!("Pagination sequences: {}\n", m.pagination_sequences));
    out.push_str(&format!("Unique tools:         {}\n", m.unique_tools));
    for tool in &m.unique_tool_list {
        out.push_str(&format!("  - {tool}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn entries(calls: &[(&str, bool)]) -> Vec<LogEntry> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        calls
            .iter()
            .enumerate()
            .map(|(i, (name, success))| LogEntry {
                timestamp: start + Duration::seconds(15 * i as i64),
                tool_name: name.to_string(),
                arguments: json!({}),
                success: *success,
                duration_ms: 100.0 + i as f64,
                result: None,
                error: None,
            })
            .collect()
    }

    #[test]
    fn test_empty_is_zeroed() {
        assert_eq!(analyze(&[]), TrajectoryMetrics::default());
    }

    #[test]
    fn test_retry_same_operation() {
        let m = analyze(&entries(&[("spotify.login", false), ("spotify.login", true)]));
        assert_eq!(m.retry_count, 1);
        assert_eq!(m.failed_calls, 1);
        assert_eq!(m.error_rate, 0.5);
    }

    #[test]
    fn test_no_retry_across_operations() {
        let m = analyze(&entries(&[("spotify.login", false), ("venmo.login", true)]));
        assert_eq!(m.retry_count, 0);
    }

    #[test]
    fn test_five_operation_scenario() {
        let m = analyze(&entries(&[
            ("supervisor.show_account_passwords", true),
            ("spotify.login", false),
            ("spotify.login", true),
            ("spotify.show_playlist_library", true),
            ("spotify.show_song_library", true),
            ("spotify.like_song", true),
        ]));
        assert_eq!(m.unique_tools, 5);
        assert_eq!(m.retry_count, 1);
        assert_eq!(m.pagination_sequences, 1);
        assert_eq!(m.total_api_calls, 6);
        assert_eq!(m.total_duration_seconds, 75.0);
        assert_eq!(m.calls_per_minute, 4.8);
        assert_eq!(m.avg_duration_ms, 102.5);
        assert_eq!(m.error_rate, 0.167);
        assert_eq!(m.unique_tool_list[0], "spotify.like_song");
    }

    #[test]
    fn test_pagination_runs() {
        let m = analyze(&entries(&[
            ("spotify.search_songs", true),
            ("spotify.search_songs", true),
            ("spotify.play", true),
            ("api_docs.list_operations", true),
            ("files.show_directory_list", true),
            ("spotify.show_playlist", true),
            ("spotify.show_playlist", true),
        ]));
        assert_eq!(m.pagination_sequences, 2);
    }

    #[test]
    fn test_browsing_tokens() {
        assert!(is_browsing_operation("spotify.show_playlist_library"));
        assert!(is_browsing_operation("SPOTIFY.SEARCH_SONGS"));
        assert!(!is_browsing_operation("spotify.show_playlist"));
        assert!(!is_browsing_operation("spotify.listen"));
    }

    #[test]
    fn test_is_error_response_counts_as_failure() {
        let mut log = entries(&[("venmo.pay", true), ("venmo.pay", true)]);
        log[0].result = Some(json!({"response": {"is_error": true}}));
        let m = analyze(&log);
        assert_eq!(m.failed_calls, 1);
        assert_eq!(m.retry_count, 1);
    }

    #[test]
    fn test_analyze_file_rejects_empty_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        std::fs::write(&path, "garbage\n").unwrap();
        assert!(matches!(analyze_file(&path), Err(EvalError::Trace(_))));
    }

    #[test]
    fn test_render_report() {
        let m = analyze(&entries(&[("a.b", true)]));
        let report = render_report(&m);
        assert!(report.contains("Total API calls:      1"));
        assert!(report.contains("  - a.b"));
    }
}
