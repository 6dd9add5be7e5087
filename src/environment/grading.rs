//! 评分结果的宽松解析
//!
//! 环境的评分结果形状不固定，按顺序尝试：结构化计数字段 → `tests` 列表 → 文本报告，
//! 并记录实际采用的来源。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PASS_KEYS: [&str; 4] = ["passes", "passed", "successes", "passes_list"];
const FAIL_KEYS: [&str; 4] = ["fails", "failures", "failed", "errors"];
const REPORT_KEYS: [&str; 3] = ["report", "output", "details"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeSource {
    Structured,
    TestList,
    ReportText,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub success: bool,
    pub passes: u64,
    pub fails: u64,
    pub total: u64,
    pub score: f64,
    pub source: GradeSource,
}

impl GradeReport {
    pub fn unavailable() -> Self {
        Self {
            success: false,
            passes: 0,
            fails: 0,
            total: 0,
            score: 0.0,
            source: GradeSource::Unavailable,
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let (passes, fails, source) = counts(value);
        let total = passes + fails;
        let success = match value.get("success") {
            Some(Value::Bool(b)) => *b,
            _ => fails == 0 && total > 0,
        };
        let score = value.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        Self {
            success,
            passes,
            fails,
            total,
            score,
            source,
        }
    }
}

fn counts(value: &Value) -> (u64, u64, GradeSource) {
    let passes = first_count(value, &PASS_KEYS);
    let fails = first_count(value, &FAIL_KEYS);
    if passes.is_some() || fails.is_some() {
        return (passes.unwrap_or(0), fails.unwrap_or(0), GradeSource::Structured);
    }
    if let Some((p, f)) = test_list_counts(value) {
        return (p, f, GradeSource::TestList);
    }
    if let Some((p, f)) = report_counts(value) {
        return (p, f, GradeSource::ReportText);
    }
    (0, 0, GradeSource::Unavailable)
}

/// 计数字段可以是整数，也可以是列表（取长度）
fn first_count(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(n) => n.as_u64(),
        Value::Array(items) => Some(items.len() as u64),
        _ => None,
    })
}

fn test_list_counts(value: &Value) -> Option<(u64, u64)> {
    let tests = value.get("tests")?.as_array()?;
    let mut passes = 0;
    let mut fails = 0;
    for test in tests {
        let passed = match test.get("status").or_else(|| test.get("result")) {
            Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "pass" | "passed" | "success" | "ok"),
            Some(Value::Bool(b)) => *b,
            _ => test.get("passed").and_then(Value::as_bool).unwrap_or(false),
        };
        if passed {
            passes += 1;
        } else {
            fails += 1;
        }
    }
    Some((passes, fails))
}

fn report_counts(value: &Value) -> Option<(u64, u64)> {
    static PASSED: OnceLock<Regex> = OnceLock::new();
    static FAILED: OnceLock<Regex> = OnceLock::new();
    let passed_re = PASSED.get_or_init(|| {
        Regex::new(r"(?i)num\s+passed\s+tests\s*:\s*(\d+)").expect("static regex")
    });
    let failed_re = FAILED.get_or_init(|| {
        Regex::new(r"(?i)num\s+failed\s+tests\s*:\s*(\d+)").expect("static regex")
    });

    let text = match value {
        Value::String(s) => s.as_str(),
        _ => REPORT_KEYS
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))?,
    };
    let grab = |re: &Regex| -> Option<u64> { re.captures(text)?.get(1)?.as_str().parse().ok() };
    let passes = grab(passed_re);
    let fails = grab(failed_re);
    if passes.is_none() && fails.is_none() {
        return None;
    }
    Some((passes.unwrap_or(0), fails.unwrap_or(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_fields() {
        let g = GradeReport::from_value(&json!({"success": true, "passes": 3, "fails": 0, "score": 1.0}));
        assert_eq!(g.source, GradeSource::Structured);
        assert!(g.success);
        assert_eq!((g.passes, g.fails, g.total), (3, 0, 3));
        assert_eq!(g.score, 1.0);
    }

    #[test]
    fn test_alternate_names_and_lists() {
        let g = GradeReport::from_value(&json!({
            "passed": [{"requirement": "a"}, {"requirement": "b"}],
            "failures": [{"requirement": "c"}]
        }));
        assert_eq!(g.source, GradeSource::Structured);
        assert_eq!((g.passes, g.fails, g.total), (2, 1, 3));
        assert!(!g.success);
    }

    #[test]
    fn test_zero_passes_is_not_skipped() {
        let g = GradeReport::from_value(&json!({"passes": 0, "fails": 2}));
        assert_eq!((g.passes, g.fails), (0, 2));
    }

    #[test]
    fn test_tests_list() {
        let g = GradeReport::from_value(&json!({
            "tests": [{"status": "PASSED"}, {"status": "failed"}, {"status": "ok"}]
        }));
        assert_eq!(g.source, GradeSource::TestList);
        assert_eq!((g.passes, g.fails, g.total), (2, 1, 3));
    }

    #[test]
    fn test_report_text() {
        let g = GradeReport::from_value(&json!({
            "report": "Success: True\nNum Passed Tests : 4\nNum Failed Tests : 0\n"
        }));
        assert_eq!(g.source, GradeSource::ReportText);
        assert_eq!((g.passes, g.fails, g.total), (4, 0, 4));
        assert!(g.success);

        let g = GradeReport::from_value(&json!("Num Passed Tests: 1\nNum Failed Tests: 2"));
        assert_eq!((g.passes, g.fails), (1, 2));
    }

    #[test]
    fn test_unrecognized_shape() {
        let g = GradeReport::from_value(&json!({"verdict": "maybe"}));
        assert_eq!(g.source, GradeSource::Unavailable);
        assert!(!g.success);
        assert_eq!(g.total, 0);
    }
}
