use std::sync::Arc;

use conductor_core::agent::{AgentDef, AgentRegistry};
use conductor_core::invoker::Executor;
use conductor_core::logging::NoopSink;
use conductor_core::plan::{QcConfig, SelectionMode, Task, TaskType};
use conductor_core::report::{TaskResult, TaskStatus};
use conductor_core::retry::run_task;
use conductor_test_utils::{
    Scripted, ScriptedExecutor, review_payload, success_payload, success_payload_with_files,
};
use tokio_util::sync::CancellationToken;

fn task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        name: id.to_string(),
        prompt: format!("do {id}"),
        agent_name: None,
        depends_on: vec![],
        task_type: TaskType::Regular,
        acceptance_criteria: vec![],
        integration_criteria: vec![],
        file_scope: vec![],
        estimated_time: None,
        json_schema_override: None,
    }
}

fn qc_with_reviewer() -> QcConfig {
    QcConfig {
        selection_mode: SelectionMode::Explicit,
        agents: vec!["code".to_string()],
        ..QcConfig::default()
    }
}

fn registry_with_reviewer() -> Arc<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    registry.insert(AgentDef {
        name: "code".to_string(),
        description: "reviewer".to_string(),
        tools: vec![],
        system_prompt_body: String::new(),
        model: None,
    });
    Arc::new(registry)
}

async fn run(
    task: &Task,
    registry: Arc<AgentRegistry>,
    executor: Arc<ScriptedExecutor>,
    qc: &QcConfig,
    cancel: &CancellationToken,
) -> TaskResult {
    let executor: Arc<dyn Executor> = executor;
    run_task(task, &registry, &executor, qc, &NoopSink, cancel).await
}

#[tokio::test]
async fn success_with_no_reviewers_is_green_with_zero_retries() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Payload(success_payload("done")));
    // QC enabled but nothing in the registry resolves a reviewer.
    let qc = QcConfig::default();

    let result = run(
        &task("t1"),
        Arc::new(AgentRegistry::new()),
        executor.clone(),
        &qc,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Green);
    assert_eq!(result.retry_count, 0);
    assert_eq!(executor.calls_for("t1").len(), 1);
    assert_eq!(result.response.unwrap().summary, "done");
}

#[tokio::test]
async fn red_then_green_retries_with_feedback_in_prompt() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Payload(success_payload("first try")));
    executor.enqueue("t1", Scripted::Payload(success_payload("second try")));
    executor.enqueue(
        "qc:code:t1",
        Scripted::Payload(review_payload("RED", "add error handling")),
    );
    executor.enqueue("qc:code:t1", Scripted::Payload(review_payload("GREEN", "")));

    let result = run(
        &task("t1"),
        registry_with_reviewer(),
        executor.clone(),
        &qc_with_reviewer(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Green);
    assert_eq!(result.retry_count, 1);

    let attempts = executor.calls_for("t1");
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].prompt.contains("Prior review feedback"));
    assert!(attempts[1].prompt.contains("Prior review feedback"));
    assert!(attempts[1].prompt.contains("add error handling"));
}

#[tokio::test]
async fn yellow_is_terminal_and_not_retried() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Payload(success_payload("ok")));
    executor.enqueue(
        "qc:code:t1",
        Scripted::Payload(review_payload("YELLOW", "minor concerns")),
    );

    let result = run(
        &task("t1"),
        registry_with_reviewer(),
        executor.clone(),
        &qc_with_reviewer(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Yellow);
    assert_eq!(result.retry_count, 0);
    assert_eq!(result.feedback, "[code] minor concerns");
    assert_eq!(executor.calls_for("t1").len(), 1, "no second attempt");
}

#[tokio::test]
async fn red_budget_exhaustion_returns_red_with_feedback() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.set_default(Scripted::Payload(success_payload("try")));
    for _ in 0..3 {
        executor.enqueue("qc:code:t1", Scripted::Payload(review_payload("RED", "still broken")));
    }
    let mut qc = qc_with_reviewer();
    qc.retry_on_red = 2;

    let result = run(
        &task("t1"),
        registry_with_reviewer(),
        executor.clone(),
        &qc,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Red);
    assert_eq!(result.retry_count, 2);
    assert!(result.feedback.contains("still broken"));
    assert_eq!(executor.calls_for("t1").len(), 3, "initial + 2 retries");
    assert!(result.response.is_some(), "RED keeps the last valid response");
}

#[tokio::test]
async fn zero_retry_budget_surfaces_red_unchanged() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Payload(success_payload("try")));
    executor.enqueue("qc:code:t1", Scripted::Payload(review_payload("RED", "no")));
    let mut qc = qc_with_reviewer();
    qc.retry_on_red = 0;

    let result = run(
        &task("t1"),
        registry_with_reviewer(),
        executor.clone(),
        &qc,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Red);
    assert_eq!(result.retry_count, 0);
    assert_eq!(executor.calls_for("t1").len(), 1);
}

#[tokio::test]
async fn invalid_responses_exhaust_into_failed() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.set_default(Scripted::Garbage);
    let qc = QcConfig {
        retry_on_red: 2,
        ..QcConfig::default()
    };

    let result = run(
        &task("t1"),
        Arc::new(AgentRegistry::new()),
        executor.clone(),
        &qc,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert_eq!(result.retry_count, 2);
    assert!(result.response.is_none(), "FAILED means no valid response");
    assert_eq!(executor.calls_for("t1").len(), 3);
    assert!(result.feedback.contains("no valid response"));
}

#[tokio::test]
async fn invalid_then_valid_recovers() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Garbage);
    executor.enqueue("t1", Scripted::Payload(success_payload("recovered")));

    let result = run(
        &task("t1"),
        Arc::new(AgentRegistry::new()),
        executor.clone(),
        &QcConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Green);
    assert_eq!(result.retry_count, 1);
}

#[tokio::test]
async fn spawn_errors_are_retriable_like_invalid_responses() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::SpawnError("binary not found".to_string()));
    executor.enqueue("t1", Scripted::Payload(success_payload("recovered")));

    let result = run(
        &task("t1"),
        Arc::new(AgentRegistry::new()),
        executor.clone(),
        &QcConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Green);
    assert_eq!(result.retry_count, 1);
}

#[tokio::test]
async fn cancellation_is_terminal_failed_without_retry() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.set_default(Scripted::Hang);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel_clone.cancel();
    });

    let result = run(
        &task("t1"),
        Arc::new(AgentRegistry::new()),
        executor.clone(),
        &QcConfig::default(),
        &cancel,
    )
    .await;

    assert_eq!(result.status, TaskStatus::Failed);
    assert!(result.feedback.contains("cancelled"));
    assert_eq!(executor.calls_for("t1").len(), 1, "cancellation is not retried");
}

#[tokio::test]
async fn qc_disabled_accepts_valid_responses_without_review() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Payload(success_payload("done")));
    let qc = QcConfig {
        enabled: false,
        ..QcConfig::default()
    };

    let result = run(
        &task("t1"),
        registry_with_reviewer(),
        executor.clone(),
        &qc,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.status, TaskStatus::Green);
    assert!(result.qc_reviews.is_empty());
    assert_eq!(executor.call_count(), 1, "no reviewer invocations");
}

#[tokio::test]
async fn files_modified_count_lands_in_result() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue(
        "t1",
        Scripted::Payload(success_payload_with_files("done", &["a.rs", "b.rs"])),
    );

    let result = run(
        &task("t1"),
        Arc::new(AgentRegistry::new()),
        executor.clone(),
        &QcConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(result.files.modified, 2);
}

#[tokio::test]
async fn retry_count_is_bounded_by_the_budget() {
    for budget in 0..3u32 {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.set_default(Scripted::Garbage);
        let qc = QcConfig {
            retry_on_red: budget,
            ..QcConfig::default()
        };
        let result = run(
            &task("t"),
            Arc::new(AgentRegistry::new()),
            executor.clone(),
            &qc,
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.retry_count, budget);
        assert_eq!(executor.call_count() as u32, budget + 1);
    }
}

#[tokio::test]
async fn resolved_agent_profile_is_passed_to_executor() {
    let mut registry = AgentRegistry::new();
    registry.insert(AgentDef {
        name: "rust-specialist".to_string(),
        description: "writes rust".to_string(),
        tools: vec!["Edit".to_string()],
        system_prompt_body: "prompt".to_string(),
        model: None,
    });
    let executor = Arc::new(ScriptedExecutor::new());
    executor.enqueue("t1", Scripted::Payload(success_payload("done")));
    let mut t = task("t1");
    t.agent_name = Some("rust-specialist".to_string());

    run(
        &t,
        Arc::new(registry),
        executor.clone(),
        &QcConfig::default(),
        &CancellationToken::new(),
    )
    .await;

    let call = &executor.calls_for("t1")[0];
    assert_eq!(call.agent.as_ref().unwrap().name, "rust-specialist");
}
