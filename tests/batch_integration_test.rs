//! 批量调度集成测试：进程内编排器充当 worker

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bee_eval::agent::ScriptedAgent;
    use bee_eval::core::{Orchestrator, OrchestratorConfig};
    use bee_eval::environment::fake::{StaticProvider, StaticWorld};
    use bee_eval::environment::{OperationCatalog, TaskInfo};
    use bee_eval::evaluator::summary::render_summary;
    use bee_eval::evaluator::{
        allocate_ports, BatchReport, BatchScheduler, EvaluationResult, ExportFormat, PortPair, TaskRunner,
    };
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    /// 每个任务新建一个编排器；"pass-*" 任务评分成功，其余失败
    struct InProcessRunner {
        provider: Arc<StaticProvider>,
        delay: Duration,
    }

    impl InProcessRunner {
        fn new(task_ids: &[&str], delay: Duration) -> Self {
            let mut provider = StaticProvider::new();
            for id in task_ids {
                let task = TaskInfo {
                    task_id: id.to_string(),
                    instruction: format!("Complete {id}"),
                    difficulty: None,
                };
                let grade = json!({"success": id.starts_with("pass"), "passes": 1, "fails": 0});
                let world = StaticWorld::new(task, OperationCatalog::default()).with_grade(grade);
                provider = provider.with_world(Arc::new(world));
            }
            Self {
                provider: Arc::new(provider),
                delay,
            }
        }
    }

    #[async_trait]
    impl TaskRunner for InProcessRunner {
        async fn run(&self, _slot: usize, _ports: PortPair, task_id: &str, cancel: CancellationToken) -> EvaluationResult {
            let config = OrchestratorConfig {
                trace_dir: None,
                ..OrchestratorConfig::default()
            };
            let mut orchestrator = match Orchestrator::new(config, self.provider.clone()) {
                Ok(o) => o.with_cancel(cancel),
                Err(e) => return EvaluationResult::failed(task_id, 0.0, e.to_string()),
            };
            let agent = ScriptedAgent::new([r#"<json>{"action": "answer", "content": "ok"}</json>"#])
                .with_delay(self.delay);
            orchestrator.run_task(task_id, &agent).await.result
        }
    }

    #[tokio::test]
    async fn test_batch_success_rate_and_export() {
        let tasks = ["pass-1", "fail-2", "pass-3"];
        let runner = Arc::new(InProcessRunner::new(&tasks, Duration::ZERO));
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("batch_results.json");
        let scheduler = BatchScheduler::new(runner, allocate_ports(9001, 2, 2).unwrap(), CancellationToken::new())
            .with_sink(out.clone(), ExportFormat::Json);

        let report = scheduler.run(tasks.iter().map(|s| s.to_string()).collect()).await;

        assert_eq!(report.summary.total_tasks, 3);
        assert_eq!(report.summary.successful, 2);
        assert_eq!(report.summary.failed, 1);
        assert!((report.summary.success_rate - 0.667).abs() < 1e-9);
        assert!((report.summary.avg_steps - 1.0).abs() < 1e-9);
        let ids: Vec<&str> = report.tasks.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, tasks);

        let written: BatchReport = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written.summary, report.summary);
        assert!(render_summary(&report).contains("66.7%"));
    }

    #[tokio::test]
    async fn test_interrupt_marks_in_flight_tasks() {
        let tasks = ["pass-1", "pass-2", "pass-3", "pass-4"];
        let runner = Arc::new(InProcessRunner::new(&tasks, Duration::from_secs(2)));
        let cancel = CancellationToken::new();
        let scheduler = BatchScheduler::new(runner, allocate_ports(9001, 2, 2).unwrap(), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let report = scheduler.run(tasks.iter().map(|s| s.to_string()).collect()).await;

        assert_eq!(report.tasks.len(), 2, "only the two in-flight tasks are recorded");
        for r in &report.tasks {
            assert!(!r.success);
            assert_eq!(r.error.as_deref(), Some("interrupted"));
        }
        assert_eq!(report.summary.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_csv_export_escapes_errors() {
        let runner = Arc::new(InProcessRunner::new(&["pass-1"], Duration::ZERO));
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("results.csv");
        let scheduler = BatchScheduler::new(runner, allocate_ports(9001, 2, 1).unwrap(), CancellationToken::new())
            .with_sink(out.clone(), ExportFormat::Csv);

        scheduler.run(vec!["pass-1".into(), "missing, task".into()]).await;

        let csv = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("pass-1,true,1,"));
        assert!(lines[2].starts_with("\"missing, task\",false,0,"));
    }
}
