//! End-to-end tests for the workflow execution engine.
//!
//! These tests use `MockNode` (and a few real catalogue nodes) with the
//! in-memory log sink, so no Postgres connection is required.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use nodes::fetch::InvoiceFetchNode;
use nodes::calculation::AgingCalculatorNode;
use nodes::mock::MockNode;
use nodes::quality::ParsedDocumentValidator;
use nodes::render::JsonReportRenderer;
use nodes::source::StaticInvoiceSource;
use nodes::Payload;

use crate::executor::PARTIAL_FAILURES_KEY;
use crate::sink::tests::FailingLogSink;
use crate::{
    EngineError, ErrorKind, ExecutionPolicy, ExecutorConfig, InMemoryLogSink, NodeRegistry,
    NodeSpec, NodeStatus, ReportRequest, RunStatus, WorkflowDefinition, WorkflowExecutor,
    WorkflowPlanner, WorkflowRun,
};

fn payload(v: Value) -> Payload {
    v.as_object().cloned().unwrap()
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry_base_delay: Duration::from_millis(1),
        ..ExecutorConfig::default()
    }
}

fn registry_of(mocks: &[&MockNode]) -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    for mock in mocks {
        registry.register_node(Arc::new((*mock).clone()), None);
    }
    Arc::new(registry)
}

fn harness(mocks: &[&MockNode], config: ExecutorConfig) -> (WorkflowExecutor, InMemoryLogSink) {
    let sink = InMemoryLogSink::new();
    let executor = WorkflowExecutor::new(registry_of(mocks), Arc::new(sink.clone()), config);
    (executor, sink)
}

fn source() -> MockNode {
    MockNode::returning("source", payload(json!({ "invoices": [{ "id": 1 }, { "id": 2 }] })))
}

fn passthrough(name: &str) -> MockNode {
    MockNode::returning(name, payload(json!({ "invoices": [{ "id": 1, "seen_by": name }] })))
        .with_inputs(&["invoices"])
}

fn output() -> MockNode {
    MockNode::returning("output", payload(json!({ "report": "ok" }))).with_inputs(&["invoices"])
}

fn failing_calc() -> MockNode {
    MockNode::failing_fatal("calc", "division by zero")
        .with_inputs(&["invoices"])
        .with_outputs(&["invoices"])
}

/// fetch → calc → out, plus fetch → alt_out when `with_alt` is set.
fn pipeline(with_alt: bool) -> WorkflowDefinition {
    let mut nodes = vec![
        NodeSpec::new("fetch", "source"),
        NodeSpec::new("calc", "calc").bind("invoices", "fetch", "invoices"),
        NodeSpec::new("out", "output").bind("invoices", "calc", "invoices"),
    ];
    let mut terminals = vec!["out"];
    if with_alt {
        nodes.push(NodeSpec::new("alt_out", "output").bind("invoices", "fetch", "invoices"));
        terminals.push("alt_out");
    }
    WorkflowDefinition::new("pipeline", nodes, &terminals)
}

fn statuses(run: &WorkflowRun) -> Vec<(String, NodeStatus)> {
    run.node_executions
        .iter()
        .map(|r| (r.node_id.clone(), r.status))
        .collect()
}

// ============================================================
// Happy path and ordering
// ============================================================

#[tokio::test]
async fn linear_pipeline_completes_with_terminal_output() {
    let calc = passthrough("calc");
    let (executor, sink) = harness(&[&source(), &calc, &output()], fast_config());

    let run = executor.run(pipeline(false)).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.started_at.is_some() && run.completed_at.is_some());
    assert_eq!(run.result, Some(json!({ "out": { "report": "ok" } })));
    assert!(run.error.is_none());
    assert_eq!(
        statuses(&run),
        vec![
            ("fetch".into(), NodeStatus::Succeeded),
            ("calc".into(), NodeStatus::Succeeded),
            ("out".into(), NodeStatus::Succeeded),
        ]
    );

    // The consumer saw exactly the producer's bound output.
    assert_eq!(
        calc.call(0).unwrap(),
        payload(json!({ "invoices": [{ "id": 1 }, { "id": 2 }] }))
    );
    let calc_record = run.record("calc").unwrap();
    assert_eq!(calc_record.input, calc.call(0).unwrap());
    assert!(calc_record.output.is_some());

    let logged = sink.run(run.id).unwrap();
    assert_eq!(logged.started_status, RunStatus::Running);
    assert_eq!(logged.final_status, Some(RunStatus::Completed));
    assert_eq!(logged.end_writes, 1);
    assert_eq!(sink.records(run.id).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn producers_always_finish_before_consumers() {
    //     a
    //   / | \
    //  b  c  d      (b is slow)
    //   \ | /
    //     e
    let a = MockNode::returning("a", payload(json!({ "invoices": [] })));
    let slow = passthrough("slow").with_delay(Duration::from_millis(500));
    let fast = passthrough("fast").with_delay(Duration::from_millis(10));
    let join = MockNode::returning("join", payload(json!({ "done": true })))
        .with_inputs(&["x", "y", "z"]);

    let def = WorkflowDefinition::new(
        "diamond",
        vec![
            NodeSpec::new("a", "a"),
            NodeSpec::new("b", "slow").bind("invoices", "a", "invoices"),
            NodeSpec::new("c", "fast").bind("invoices", "a", "invoices"),
            NodeSpec::new("d", "fast").bind("invoices", "a", "invoices"),
            NodeSpec::new("e", "join")
                .bind("x", "b", "invoices")
                .bind("y", "c", "invoices")
                .bind("z", "d", "invoices"),
        ],
        &["e"],
    );
    let (executor, _) = harness(&[&a, &slow, &fast, &join], fast_config());
    let run = executor.run(def).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    for record in &run.node_executions {
        let spec = run.definition.node(&record.node_id).unwrap();
        for binding in &spec.inputs {
            let producer = run.record(&binding.from).unwrap();
            assert!(producer.step_index < record.step_index);
            assert!(producer.finished_at <= record.started_at);
        }
    }
    // Results are assembled by binding, not by completion order.
    let joined = join.call(0).unwrap();
    assert_eq!(joined["x"][0]["seen_by"], "slow");
    assert_eq!(joined["y"][0]["seen_by"], "fast");
}

#[tokio::test(start_paused = true)]
async fn independent_nodes_respect_the_parallelism_limit() {
    let root = MockNode::returning("root", payload(json!({ "invoices": [] })));
    let work = passthrough("work").with_delay(Duration::from_millis(100));
    let sink_node = MockNode::returning("collect", payload(json!({ "done": true })))
        .with_optional_inputs(&["a", "b", "c", "d"]);

    let def = |parallel: &str| {
        WorkflowDefinition::new(
            parallel,
            vec![
                NodeSpec::new("root", "root"),
                NodeSpec::new("w1", "work").bind("invoices", "root", "invoices"),
                NodeSpec::new("w2", "work").bind("invoices", "root", "invoices"),
                NodeSpec::new("w3", "work").bind("invoices", "root", "invoices"),
                NodeSpec::new("w4", "work").bind("invoices", "root", "invoices"),
                NodeSpec::new("collect", "collect")
                    .bind("a", "w1", "invoices")
                    .bind("b", "w2", "invoices")
                    .bind("c", "w3", "invoices")
                    .bind("d", "w4", "invoices"),
            ],
            &["collect"],
        )
    };

    let (executor, _) = harness(
        &[&root, &work, &sink_node],
        ExecutorConfig { max_parallel_nodes: 2, ..fast_config() },
    );
    let run = executor.run(def("two")).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(work.call_count(), 4);
    assert_eq!(work.peak_concurrency(), 2);

    let sequential_work = passthrough("work").with_delay(Duration::from_millis(100));
    let (executor, _) = executor_with(&[&root, &sequential_work, &sink_node], 1);
    let run = executor.run(def("one")).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(sequential_work.peak_concurrency(), 1);
}

fn executor_with(mocks: &[&MockNode], max_parallel_nodes: usize) -> (WorkflowExecutor, InMemoryLogSink) {
    harness(mocks, ExecutorConfig { max_parallel_nodes, ..fast_config() })
}

// ============================================================
// Build-time rejection
// ============================================================

#[tokio::test]
async fn cyclic_definition_is_rejected_before_anything_runs() {
    let b = passthrough("b");
    let (executor, sink) = harness(&[&passthrough("a"), &b], fast_config());

    let def = WorkflowDefinition::new(
        "cycle",
        vec![
            NodeSpec::new("a", "a").bind("invoices", "b", "invoices"),
            NodeSpec::new("b", "b").bind("invoices", "a", "invoices"),
        ],
        &["b"],
    );
    let err = executor.run(def).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidWorkflowDefinition);
    assert_eq!(b.call_count(), 0);
    assert!(sink.runs().is_empty());
}

#[tokio::test]
async fn unknown_node_type_is_rejected_before_anything_runs() {
    let src = source();
    let (executor, sink) = harness(&[&src], fast_config());

    let def = WorkflowDefinition::new(
        "unknown",
        vec![
            NodeSpec::new("fetch", "source"),
            NodeSpec::new("mystery", "does_not_exist").bind("invoices", "fetch", "invoices"),
        ],
        &["mystery"],
    );
    let err = executor.run(def).await.unwrap_err();
    assert!(matches!(
        &err,
        EngineError::UnknownNodeType { node_id: Some(id), .. } if id == "mystery"
    ));
    assert_eq!(src.call_count(), 0);
    assert!(sink.runs().is_empty());
}

#[tokio::test]
async fn repeated_or_reserved_terminals_are_rejected_before_anything_runs() {
    let src = source();
    let (executor, sink) = harness(&[&src], fast_config());

    let repeated = WorkflowDefinition::new("repeated", vec![NodeSpec::new("fetch", "source")], &["fetch", "fetch"]);
    let err = executor.run(repeated).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidWorkflowDefinition);

    let reserved = WorkflowDefinition::new(
        "reserved",
        vec![NodeSpec::new(PARTIAL_FAILURES_KEY, "source")],
        &[PARTIAL_FAILURES_KEY],
    );
    let err = executor.run(reserved).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidWorkflowDefinition);

    assert_eq!(src.call_count(), 0);
    assert!(sink.runs().is_empty());
}

// ============================================================
// Failure policies
// ============================================================

#[tokio::test]
async fn fail_fast_skips_dependents_and_fails_the_run() {
    let out = output();
    let (executor, sink) = harness(&[&source(), &failing_calc(), &out], fast_config());

    let run = executor.run(pipeline(false)).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(out.call_count(), 0);
    assert_eq!(
        statuses(&run),
        vec![
            ("fetch".into(), NodeStatus::Succeeded),
            ("calc".into(), NodeStatus::Failed),
            ("out".into(), NodeStatus::Skipped),
        ]
    );
    let error = run.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::NodeExecutionError);
    assert_eq!(error.node_id.as_deref(), Some("calc"));
    assert!(error.message.contains("division by zero"));
    assert!(run.result.is_none());

    let calc = run.record("calc").unwrap();
    assert!(calc.output.is_none());
    assert_eq!(calc.error.as_ref().unwrap().kind, ErrorKind::NodeExecutionError);
    assert_eq!(sink.records(run.id).len(), 3);
}

#[tokio::test]
async fn fail_fast_stops_dispatching_unrelated_nodes() {
    let out = output();
    let (executor, _) = executor_with(&[&source(), &failing_calc(), &out], 1);

    let run = executor.run(pipeline(true)).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    // alt_out was eligible but never dispatched, so it has no record.
    assert!(run.record("alt_out").is_none());
    assert_eq!(run.node_executions.len(), 3);
    assert_eq!(out.call_count(), 0);
}

#[tokio::test]
async fn best_effort_completes_through_an_independent_branch() {
    let out = output();
    let (executor, _) = harness(&[&source(), &failing_calc(), &out], fast_config());

    let def = pipeline(true).with_policy(ExecutionPolicy::BestEffort);
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.record("out").unwrap().status, NodeStatus::Skipped);
    assert_eq!(run.record("alt_out").unwrap().status, NodeStatus::Succeeded);
    assert_eq!(out.call_count(), 1);

    let result = run.result.unwrap();
    assert_eq!(result["alt_out"], json!({ "report": "ok" }));
    assert!(result.get("out").is_none());
    let partial = result[PARTIAL_FAILURES_KEY].as_array().unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0]["node_id"], "calc");
    assert_eq!(partial[0]["kind"], "NODE_EXECUTION_ERROR");
}

#[tokio::test]
async fn best_effort_without_any_terminal_output_fails() {
    let (executor, _) = harness(&[&source(), &failing_calc(), &output()], fast_config());

    let def = pipeline(false).with_policy(ExecutionPolicy::BestEffort);
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.clone().unwrap().node_id.as_deref(), Some("calc"));
}

#[tokio::test]
async fn run_error_is_the_first_failure_in_topological_order() {
    let a = MockNode::failing_fatal("a_fail", "first").with_outputs(&["invoices"]);
    let b = MockNode::failing_fatal("b_fail", "second").with_outputs(&["invoices"]);
    let join = MockNode::returning("join", payload(json!({ "done": true })))
        .with_optional_inputs(&["x", "y"]);

    // b is defined (and ordered) first even though both run in one batch.
    let def = WorkflowDefinition::new(
        "two_failures",
        vec![
            NodeSpec::new("b", "b_fail"),
            NodeSpec::new("a", "a_fail"),
            NodeSpec::new("j", "join").bind("x", "a", "invoices").bind("y", "b", "invoices"),
        ],
        &["j"],
    )
    .with_policy(ExecutionPolicy::BestEffort);

    let (executor, _) = harness(&[&a, &b, &join], fast_config());
    let run = executor.run(def).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.clone().unwrap().node_id.as_deref(), Some("b"));
}

// ============================================================
// Retries, timeouts, panics
// ============================================================

#[tokio::test]
async fn retryable_errors_are_retried_until_success() {
    let flaky = MockNode::flaky("flaky", 2, payload(json!({ "report": "ok" })));
    let (executor, _) = harness(&[&flaky], fast_config());

    let def = WorkflowDefinition::new("retry", vec![NodeSpec::new("f", "flaky")], &["f"]);
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(run.node_executions.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_fail_the_node() {
    let flaky = MockNode::failing_retryable("flaky", "db busy").with_outputs(&["report"]);
    let (executor, _) = harness(&[&flaky], ExecutorConfig { max_retries: 2, ..fast_config() });

    let def = WorkflowDefinition::new("retry", vec![NodeSpec::new("f", "flaky")], &["f"]);
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(flaky.call_count(), 3);
    let error = run.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::NodeExecutionError);
    assert!(error.message.contains("after 3 attempts"), "{}", error.message);
}

#[tokio::test(start_paused = true)]
async fn timed_out_node_propagates_like_a_failure() {
    let slow = MockNode::returning("slow", payload(json!({ "invoices": [] })))
        .with_delay(Duration::from_secs(60));
    let out = output();
    let config = fast_config().with_timeout("slow", Duration::from_secs(1));
    let (executor, _) = harness(&[&slow, &out], config);

    let def = WorkflowDefinition::new(
        "timeout",
        vec![
            NodeSpec::new("s", "slow"),
            NodeSpec::new("out", "output").bind("invoices", "s", "invoices"),
        ],
        &["out"],
    );
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.clone().unwrap().kind, ErrorKind::TimeoutError);
    assert_eq!(run.record("out").unwrap().status, NodeStatus::Skipped);
}

#[tokio::test]
async fn panicking_node_is_contained() {
    let boom = MockNode::panicking("boom", "kaboom").with_outputs(&["invoices"]);
    let out = output();
    let (executor, _) = harness(&[&boom, &out], fast_config());

    let def = WorkflowDefinition::new(
        "panic",
        vec![
            NodeSpec::new("p", "boom"),
            NodeSpec::new("out", "output").bind("invoices", "p", "invoices"),
        ],
        &["out"],
    );
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::NodeExecutionError);
    assert!(error.message.contains("kaboom"), "{}", error.message);
    assert_eq!(run.record("out").unwrap().status, NodeStatus::Skipped);
}

#[tokio::test]
async fn missing_producer_output_fails_the_consumer_without_invoking_it() {
    // Declares `invoices` but never emits it.
    let liar = MockNode::returning("liar", payload(json!({ "other": 1 }))).with_outputs(&["invoices"]);
    let out = output();
    let (executor, _) = harness(&[&liar, &out], fast_config());

    let def = WorkflowDefinition::new(
        "missing",
        vec![
            NodeSpec::new("l", "liar"),
            NodeSpec::new("out", "output").bind("invoices", "l", "invoices"),
        ],
        &["out"],
    );
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(out.call_count(), 0);
    let record = run.record("out").unwrap();
    assert_eq!(record.status, NodeStatus::Failed);
    assert!(record.error.as_ref().unwrap().message.contains("did not emit 'invoices'"));
}

// ============================================================
// Document quality gate
// ============================================================

#[tokio::test]
async fn low_quality_document_fails_the_fetch_node() {
    let source = StaticInvoiceSource::from_json(json!([
        { "id": 1, "category": "purchase", "invoice_number": "INV-9", "inr_amount": 10.0,
          "parsed_document": { "text": "~~ ?? ~~" } },
    ]))
    .unwrap();
    let mut registry = NodeRegistry::new();
    registry
        .register_node(
            Arc::new(InvoiceFetchNode::new(Arc::new(source), Arc::new(ParsedDocumentValidator::new()))),
            None,
        )
        .register_node(Arc::new(AgingCalculatorNode), None);
    let executor = WorkflowExecutor::new(Arc::new(registry), Arc::new(InMemoryLogSink::new()), fast_config());

    let def = WorkflowDefinition::new(
        "gate",
        vec![
            NodeSpec::new("fetch", "invoice_fetch").with_config(payload(json!({ "category": "purchase" }))),
            NodeSpec::new("age", "aging_calculator").bind("invoices", "fetch", "invoices"),
        ],
        &["age"],
    );
    let run = executor.run(def).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.error.clone().unwrap();
    assert_eq!(error.kind, ErrorKind::DocumentQualityError);
    assert_eq!(error.node_id.as_deref(), Some("fetch"));
    assert!(error.message.contains("INV-9"));
    assert_eq!(run.record("age").unwrap().status, NodeStatus::Skipped);
}

#[tokio::test]
async fn quality_failure_from_any_node_keeps_its_kind() {
    let gate = MockNode::failing_quality("gate", 35.0, 70.0).with_outputs(&["invoices"]);
    let (executor, _) = harness(&[&gate], fast_config());

    let def = WorkflowDefinition::new("q", vec![NodeSpec::new("g", "gate")], &["g"]);
    let run = executor.run(def).await.unwrap();
    assert_eq!(run.error.clone().unwrap().kind, ErrorKind::DocumentQualityError);
    assert_eq!(gate.call_count(), 1);
}

// ============================================================
// Cancellation and background runs
// ============================================================

#[tokio::test]
async fn cancel_before_dispatch_fails_without_node_records() {
    let src = source();
    let (executor, sink) = harness(&[&src], fast_config());
    let token = CancellationToken::new();
    token.cancel();

    let def = WorkflowDefinition::new("c", vec![NodeSpec::new("fetch", "source")], &["fetch"]);
    let run = executor.run_with_cancel(def, token).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.clone().unwrap().kind, ErrorKind::CancellationError);
    assert!(run.node_executions.is_empty());
    assert!(run.started_at.is_none());
    assert_eq!(src.call_count(), 0);

    let logged = sink.run(run.id).unwrap();
    assert_eq!(logged.final_status, Some(RunStatus::Failed));
    assert_eq!(logged.end_writes, 1);
    assert_eq!(sink.runs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_lets_in_flight_nodes_finish() {
    let slow = MockNode::returning("slow", payload(json!({ "invoices": [] })))
        .with_delay(Duration::from_secs(5));
    let out = output();
    let (executor, sink) = harness(&[&slow, &out], fast_config());

    let def = WorkflowDefinition::new(
        "c",
        vec![
            NodeSpec::new("s", "slow"),
            NodeSpec::new("out", "output").bind("invoices", "s", "invoices"),
        ],
        &["out"],
    );
    let mut handle = executor.spawn(def).unwrap();
    assert_eq!(handle.changed().await, RunStatus::Running);
    assert_eq!(handle.status(), RunStatus::Running);
    handle.cancel();

    let run = handle.wait().await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.clone().unwrap().kind, ErrorKind::CancellationError);
    // The in-flight node finished and kept its record; its dependent was
    // never dispatched.
    assert_eq!(statuses(&run), vec![("s".into(), NodeStatus::Succeeded)]);
    assert_eq!(out.call_count(), 0);
    assert_eq!(sink.records(run.id).len(), 1);
}

#[tokio::test]
async fn spawned_run_publishes_its_final_status() {
    let (executor, _) = harness(&[&source(), &passthrough("calc"), &output()], fast_config());
    let handle = executor.spawn(pipeline(false)).unwrap();
    let run_id = handle.run_id();

    let run = handle.wait().await.unwrap();
    assert_eq!(run.id, run_id);
    assert_eq!(run.status, RunStatus::Completed);
}

#[tokio::test]
async fn spawn_rejects_invalid_definitions_synchronously() {
    let (executor, _) = harness(&[], fast_config());
    let def = WorkflowDefinition::new("empty", vec![NodeSpec::new("x", "nothing")], &["x"]);
    assert!(matches!(executor.spawn(def), Err(EngineError::UnknownNodeType { .. })));
}

// ============================================================
// Sink tolerance and audit counts
// ============================================================

#[tokio::test]
async fn sink_failures_never_affect_the_run() {
    let registry = registry_of(&[&source(), &passthrough("calc"), &output()]);
    let executor = WorkflowExecutor::new(registry, Arc::new(FailingLogSink), fast_config());

    let run = executor.run(pipeline(false)).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.node_executions.len(), 3);
}

#[tokio::test]
async fn record_count_equals_dispatched_plus_skipped_nodes() {
    let (executor, sink) = harness(&[&source(), &failing_calc(), &output()], fast_config());
    let def = pipeline(true).with_policy(ExecutionPolicy::BestEffort);

    let run = executor.run(def).await.unwrap();

    assert_eq!(sink.runs().len(), 1);
    let records = sink.records(run.id);
    assert_eq!(records.len(), 4);
    let steps: Vec<u32> = records.iter().map(|r| r.step_index).collect();
    assert_eq!(steps, vec![0, 1, 2, 3]);
    assert_eq!(records, run.node_executions);
}

// ============================================================
// Planned reports end to end
// ============================================================

fn report_planner_and_executor() -> (WorkflowPlanner, WorkflowExecutor) {
    let source = StaticInvoiceSource::from_json(json!([
        { "id": 1, "category": "purchase", "vendor_name": "Acme", "invoice_number": "A-1",
          "invoice_date": "2024-01-02", "due_date": "2024-02-01", "inr_amount": 1180.0,
          "tax_amount": 180.0, "paid_amount": 180.0 },
        { "id": 2, "category": "purchase", "vendor_name": "Globex", "invoice_number": "G-7",
          "invoice_date": "2024-03-10", "due_date": "2024-04-09", "inr_amount": 500.0 },
        { "id": 3, "category": "purchase", "vendor_name": "Initech", "invoice_number": "I-3",
          "invoice_date": "2023-10-01", "due_date": "2023-10-31", "inr_amount": 250.0,
          "paid_amount": 250.0 },
        { "id": 4, "category": "sales", "customer_name": "Umbrella", "invoice_number": "S-1",
          "invoice_date": "2024-02-15", "inr_amount": 900.0 },
    ]))
    .unwrap();
    let registry = Arc::new(NodeRegistry::with_builtins(
        Arc::new(source),
        Arc::new(ParsedDocumentValidator::new()),
        Arc::new(JsonReportRenderer),
    ));
    let planner = WorkflowPlanner::new(registry.clone());
    let executor = WorkflowExecutor::new(registry, Arc::new(InMemoryLogSink::new()), fast_config());
    (planner, executor)
}

#[tokio::test]
async fn ap_aging_report_runs_end_to_end() {
    let (planner, executor) = report_planner_and_executor();
    let def = planner
        .plan(&ReportRequest::new("accounts_payable", "aging").with_parameter("as_of_date", "2024-03-31"))
        .unwrap();

    let run = executor.run(def).await.unwrap();
    assert_eq!(run.status, RunStatus::Completed, "{:?}", run.error);

    let report = &run.result.as_ref().unwrap()["report"]["report"];
    assert_eq!(report["file_name"], "ap_aging.json");
    // The fully paid invoice is filtered out; sales invoices never fetched.
    assert_eq!(report["row_count"], 2);
    let content = &report["content"];
    assert_eq!(content["title"], "Accounts Payable Aging Report as of 2024-03-31");
    assert_eq!(content["rows"][0]["invoice_no"], "A-1");
    let groups = content["sections"]["groups"].as_array().unwrap();
    let names: Vec<&str> = groups.iter().map(|g| g["group_name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["0-30", "61-90"]);
    assert_eq!(content["sections"]["summary"]["total_records"], 2);
}

#[tokio::test]
async fn identical_runs_produce_byte_identical_results() {
    let (planner, executor) = report_planner_and_executor();
    let request = ReportRequest::new("accounts_payable", "overdue").with_parameter("as_of_date", "2024-03-31");

    let first = executor.run(planner.plan(&request).unwrap()).await.unwrap();
    let second = executor.run(planner.plan(&request).unwrap()).await.unwrap();

    assert_eq!(first.status, RunStatus::Completed, "{:?}", first.error);
    assert_ne!(first.id, second.id);
    assert_eq!(
        serde_json::to_vec(&first.result).unwrap(),
        serde_json::to_vec(&second.result).unwrap()
    );
}
