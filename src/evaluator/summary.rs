//! 评测结果与批次汇总
//!
//! BatchSummary 是逐任务结果的纯函数；JSON 与 CSV 两种导出都由同一个 BatchReport 生成。
//! 报告文件用「临时文件 + rename」原子替换，中途中断也不会留下半截文件。

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::EvalError;
use crate::evaluator::analyzer::TrajectoryMetrics;

/// 单个任务的评测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub steps: usize,
    /// 耗时（秒）
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub passes: u64,
    #[serde(default)]
    pub fails: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<TrajectoryMetrics>,
}

impl EvaluationResult {
    /// 没有跑出任何结果的失败记录
    pub fn failed(task_id: &str, time: f64, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: false,
            steps: 0,
            time,
            score: 0.0,
            passes: 0,
            fails: 0,
            total: 0,
            error: Some(error.into()),
            trajectory: None,
        }
    }

    /// 解析协调器的响应：先按 JSON，失败时从文本中抽取字段，都不行则记为聚合错误
    pub fn from_response_text(task_id: &str, text: &str, elapsed: f64) -> Self {
        if let Ok(mut parsed) = serde_json::from_str::<EvaluationResult>(text) {
            if parsed.task_id.is_empty() {
                parsed.task_id = task_id.to_string();
            }
            return parsed;
        }
        match scrape_fields(text) {
            Some(mut scraped) => {
                scraped.task_id = task_id.to_string();
                scraped.time = elapsed;
                scraped
            }
            None => {
                let preview: String = text.chars().take(200).collect();
                let err = EvalError::Aggregation(format!("unparsable coordinator response: {preview}"));
                Self::failed(task_id, elapsed, err.to_string())
            }
        }
    }
}

fn scrape_fields(text: &str) -> Option<EvaluationResult> {
    static SUCCESS: OnceLock<Regex> = OnceLock::new();
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let success_re = SUCCESS.get_or_init(|| {
        Regex::new(r#"(?i)"?\bsuccess\b"?\s*[:=]\s*"?(true|false)"#).expect("static regex")
    });
    let number_re = NUMBER.get_or_init(|| {
        Regex::new(r#"(?i)"?\b(steps|score|passes|fails|total)\b"?\s*[:=]\s*(-?[0-9]+(?:\.[0-9]+)?)"#)
            .expect("static regex")
    });

    let success = success_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().eq_ignore_ascii_case("true"));
    let mut numbers: HashMap<String, f64> = HashMap::new();
    for caps in number_re.captures_iter(text) {
        if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
            if let Ok(v) = value.as_str().parse::<f64>() {
                numbers.entry(key.as_str().to_lowercase()).or_insert(v);
            }
        }
    }
    if success.is_none() && numbers.is_empty() {
        return None;
    }
    let num = |key: &str| numbers.get(key).copied();
    let passes = num("passes").unwrap_or(0.0) as u64;
    let fails = num("fails").unwrap_or(0.0) as u64;
    Some(EvaluationResult {
        task_id: String::new(),
        success: success.unwrap_or(false),
        steps: num("steps").unwrap_or(0.0) as usize,
        time: 0.0,
        score: num("score").unwrap_or(0.0),
        passes,
        fails,
        total: num("total").map(|t| t as u64).unwrap_or(passes + fails),
        error: None,
        trajectory: None,
    })
}

/// 批次汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_tasks: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub avg_steps: f64,
    pub avg_time: f64,
    pub avg_score: f64,
    pub timestamp: String,
}

impl BatchSummary {
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            ((successful as f64 / total as f64) * 1000.0).round() / 1000.0
        };
        Self {
            total_tasks: total,
            successful,
            failed: total - successful,
            success_rate,
            avg_steps: mean(results, |r| r.steps as f64),
            avg_time: mean(results, |r| r.time),
            avg_score: mean(results, |r| r.score),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

fn mean(results: &[EvaluationResult], f: impl Fn(&EvaluationResult) -> f64) -> f64 {
    if results.is_empty() {
        0.0
    } else {
        results.iter().map(f).sum::<f64>() / results.len() as f64
    }
}

/// 导出内容：汇总 + 逐任务结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub tasks: Vec<EvaluationResult>,
}

impl BatchReport {
    pub fn new(tasks: Vec<EvaluationResult>) -> Self {
        Self {
            summary: BatchSummary::from_results(&tasks),
            tasks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(EvalError::Config(format!("unknown export format '{other}'"))),
        }
    }
}

const CSV_COLUMNS: [&str; 9] = [
    "task_id", "success", "steps", "time", "score", "passes", "fails", "total", "error",
];

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(report: &BatchReport) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push('\n');
    for r in &report.tasks {
        let row = [
            csv_escape(&r.task_id),
            r.success.to_string(),
            r.steps.to_string(),
            format!("{:.2}", r.time),
            r.score.to_string(),
            r.passes.to_string(),
            r.fails.to_string(),
            r.total.to_string(),
            csv_escape(r.error.as_deref().unwrap_or("")),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

pub fn render(report: &BatchReport, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(report)?),
        ExportFormat::Csv => Ok(render_csv(report)),
    }
}

/// 原子写入报告（临时文件 + rename）
pub fn write_report(path: &Path, report: &BatchReport, format: ExportFormat) -> Result<()> {
    let body = render(report, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("report");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    file.write_all(body.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// 终端输出的汇总表
pub fn render_summary(report: &BatchReport) -> String {
    let s = &report.summary;
    let mut out = String::new();
    out.push_str(&"=".repeat(60));
    out.push_str("\nBATCH EVALUATION SUMMARY\n");
    out.push_str(&"=".repeat(60));
    out.push('\n');
    out.push_str(&format!("Total tasks:   {}\n", s.total_tasks));
    out.push_str(&format!("Successful:    {}\n", s.successful));
    out.push_str(&format!("Failed:        {}\n", s.failed));
    out.push_str(&format!("Success rate:  {:.1}%\n", s.success_rate * 100.0));
    out.push_str(&format!("Avg steps:     {:.1}\n", s.avg_steps));
    out.push_str(&format!("Avg time:      {:.1}s\n", s.avg_time));
    out.push_str(&format!("Avg score:     {:.3}\n", s.avg_score));
    out.push_str(&"-".repeat(60));
    out.push('\n');
    for r in &report.tasks {
        let mark = if r.success { "PASS" } else { "FAIL" };
        out.push_str(&format!(
            "{mark}  {:<24} steps={:<3} time={:>7.1}s score={:.2}",
            r.task_id, r.steps, r.time, r.score
        ));
        if let Some(err) = &r.error {
            out.push_str(&format!("  ({err})"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, success: bool, steps: usize, time: f64, score: f64) -> EvaluationResult {
        EvaluationResult {
            task_id: id.into(),
            success,
            steps,
            time,
            score,
            passes: 0,
            fails: 0,
            total: 0,
            error: None,
            trajectory: None,
        }
    }

    #[test]
    fn test_summary_two_of_three() {
        let results = vec![
            result("a", true, 10, 30.0, 1.0),
            result("b", true, 20, 60.0, 1.0),
            result("c", false, 30, 90.0, 0.0),
        ];
        let s = BatchSummary::from_results(&results);
        assert_eq!(s.total_tasks, 3);
        assert_eq!(s.successful, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.success_rate, 0.667);
        assert_eq!(s.avg_steps, 20.0);
        assert_eq!(s.avg_time, 60.0);
        assert!((s.avg_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_empty_batch() {
        let s = BatchSummary::from_results(&[]);
        assert_eq!(s.total_tasks, 0);
        assert_eq!(s.success_rate, 0.0);
        assert_eq!(s.avg_steps, 0.0);
    }

    #[test]
    fn test_csv_export() {
        let mut failed = result("task,2", false, 3, 1.234, 0.0);
        failed.error = Some("said \"no\"".into());
        let report = BatchReport::new(vec![result("task_1", true, 5, 10.0, 1.0), failed]);
        let csv = render_csv(&report);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "task_id,success,steps,time,score,passes,fails,total,error");
        assert_eq!(lines[1], "task_1,true,5,10.00,1,0,0,0,");
        assert_eq!(lines[2], "\"task,2\",false,3,1.23,0,0,0,0,\"said \"\"no\"\"\"");
    }

    #[test]
    fn test_json_export_and_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/results.json");
        let report = BatchReport::new(vec![result("a", true, 1, 2.0, 1.0)]);
        write_report(&path, &report, ExportFormat::Json).unwrap();
        let back: BatchReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report);
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"task_id": "t1", "success": true, "steps": 7, "time": 3.5, "score": 1.0}"#;
        let r = EvaluationResult::from_response_text("t1", json, 9.0);
        assert!(r.success);
        assert_eq!(r.steps, 7);
        assert_eq!(r.time, 3.5);

        let text = "Evaluation complete: success=True, steps: 12, score: 0.5, passes: 1, fails: 1";
        let r = EvaluationResult::from_response_text("t2", text, 9.0);
        assert!(r.success);
        assert_eq!(r.steps, 12);
        assert_eq!(r.total, 2);
        assert_eq!(r.time, 9.0);

        let r = EvaluationResult::from_response_text("t3", "<html>502</html>", 1.0);
        assert!(!r.success);
        assert!(r.error.unwrap().starts_with("Aggregation error"));
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
