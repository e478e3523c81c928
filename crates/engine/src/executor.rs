//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the definition against the registry and produces a
//!    topological ordering (build-time errors are returned as `Err` and no
//!    run is created).
//! 2. Dispatches ready nodes (every producer succeeded) in topological order,
//!    in batches of at most `max_parallel_nodes`, each on its own tokio task.
//! 3. Resolves each node's inputs from its bindings, applies the per-type
//!    timeout and retries `NodeError::Retryable` with exponential back-off.
//! 4. Marks dependents of failed or skipped nodes as `skipped` without
//!    invoking them.
//! 5. Writes the audit trail through an `ExecutionLogSink`, tolerating sink
//!    failures, and writes the final run state exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use nodes::{ExecutableNode, ExecutionContext, NodeError, Payload};

use crate::config::ExecutorConfig;
use crate::dag::{validate_definition, ExecutionPlan};
use crate::models::{
    ExecutionPolicy, NodeExecutionRecord, NodeStatus, RunError, RunStatus, WorkflowDefinition,
    WorkflowRun,
};
use crate::registry::NodeRegistry;
use crate::sink::ExecutionLogSink;
use crate::EngineError;

/// Key under which best-effort runs list the failures they completed with.
pub const PARTIAL_FAILURES_KEY: &str = "partial_failures";

// ---------------------------------------------------------------------------
// RunHandle
// ---------------------------------------------------------------------------

/// A run executing in the background.
pub struct RunHandle {
    run_id: Uuid,
    status: watch::Receiver<RunStatus>,
    cancel: CancellationToken,
    join: JoinHandle<WorkflowRun>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Latest published status.
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Resolves once the status changes again.
    pub async fn changed(&mut self) -> RunStatus {
        // A closed channel means the run is over; the last value is final.
        let _ = self.status.changed().await;
        *self.status.borrow()
    }

    /// Stop dispatching new nodes; in-flight nodes finish or time out.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to reach a terminal state.
    pub async fn wait(self) -> Result<WorkflowRun, JoinError> {
        self.join.await
    }
}

// ---------------------------------------------------------------------------
// Per-node bookkeeping
// ---------------------------------------------------------------------------

/// What a dispatched node produced, with wall-clock timing.
struct NodeOutcome {
    result: Result<Payload, EngineError>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration_ms: u64,
}

struct Dispatch {
    node_id: String,
    input: Payload,
}

/// Mutable state of one run. Owned by the run's task; never shared.
struct RunState {
    run: WorkflowRun,
    status: HashMap<String, NodeStatus>,
    outputs: HashMap<String, Payload>,
    failures: Vec<(usize, RunError)>,
    topo_index: HashMap<String, usize>,
    next_step: u32,
}

impl RunState {
    fn new(run: WorkflowRun, plan: &ExecutionPlan) -> Self {
        Self {
            status: plan
                .order
                .iter()
                .map(|id| (id.clone(), NodeStatus::Pending))
                .collect(),
            topo_index: plan
                .order
                .iter()
                .enumerate()
                .map(|(i, id)| (id.clone(), i))
                .collect(),
            run,
            outputs: HashMap::new(),
            failures: Vec::new(),
            next_step: 0,
        }
    }

    fn status_of(&self, id: &str) -> NodeStatus {
        self.status.get(id).copied().unwrap_or(NodeStatus::Pending)
    }

    fn step(&mut self) -> u32 {
        let step = self.next_step;
        self.next_step += 1;
        step
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Orchestrates runs of workflow definitions.
///
/// Cheap to clone; the registry and sink are shared. Each run owns its own
/// state, so one executor can drive many concurrent runs.
#[derive(Clone)]
pub struct WorkflowExecutor {
    registry: Arc<NodeRegistry>,
    sink: Arc<dyn ExecutionLogSink>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(
        registry: Arc<NodeRegistry>,
        sink: Arc<dyn ExecutionLogSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self { registry, sink, config }
    }

    /// Run the definition to completion.
    ///
    /// # Errors
    /// Only build-time errors (`UnknownNodeType`, `InvalidWorkflowDefinition`)
    /// are returned as `Err`; node failures are reported on the returned run.
    pub async fn run(
        &self,
        definition: impl Into<Arc<WorkflowDefinition>>,
    ) -> Result<WorkflowRun, EngineError> {
        self.run_with_cancel(definition, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), stopping dispatch once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        definition: impl Into<Arc<WorkflowDefinition>>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRun, EngineError> {
        let definition = definition.into();
        let plan = validate_definition(&definition, &self.registry)?;
        let run = WorkflowRun::new(definition);
        Ok(self.execute(run, plan, cancel, None).await)
    }

    /// Start the definition on a background task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Build-time errors, before any task is spawned.
    pub fn spawn(
        &self,
        definition: impl Into<Arc<WorkflowDefinition>>,
    ) -> Result<RunHandle, EngineError> {
        let definition = definition.into();
        let plan = validate_definition(&definition, &self.registry)?;
        let run = WorkflowRun::new(definition);
        let run_id = run.id;

        let (tx, rx) = watch::channel(RunStatus::Planned);
        let cancel = CancellationToken::new();
        let executor = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move { executor.execute(run, plan, token, Some(tx)).await });

        Ok(RunHandle { run_id, status: rx, cancel, join })
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn execute(
        &self,
        run: WorkflowRun,
        plan: ExecutionPlan,
        cancel: CancellationToken,
        status_tx: Option<watch::Sender<RunStatus>>,
    ) -> WorkflowRun {
        let span = info_span!("workflow_run", run_id = %run.id, workflow = %run.definition.name);
        async move {
            let definition = run.definition.clone();
            let mut state = RunState::new(run, &plan);
            let mut halted = false;
            let mut cancelled = false;

            info!(nodes = plan.order.len(), policy = ?definition.policy, "run accepted");

            loop {
                self.skip_blocked(&definition, &plan, &mut state).await;

                if halted {
                    break;
                }

                let ready: Vec<String> = plan
                    .order
                    .iter()
                    .filter(|id| state.status_of(id) == NodeStatus::Pending)
                    .filter(|id| {
                        definition.node(id).is_some_and(|spec| {
                            spec.inputs
                                .iter()
                                .all(|b| state.status_of(&b.from) == NodeStatus::Succeeded)
                        })
                    })
                    .take(self.config.parallelism())
                    .cloned()
                    .collect();

                if ready.is_empty() {
                    break;
                }

                if cancel.is_cancelled() {
                    warn!("run cancelled; no further nodes will be dispatched");
                    cancelled = true;
                    break;
                }

                if state.run.status == RunStatus::Planned {
                    state.run.status = RunStatus::Running;
                    state.run.started_at = Some(Utc::now());
                    publish(&status_tx, RunStatus::Running);
                    self.log(self.sink.record_run_start(&state.run).await, "run start");
                }

                let failed = self
                    .dispatch_batch(&definition, &plan, &mut state, ready)
                    .await;
                if failed && definition.policy == ExecutionPolicy::FailFast {
                    halted = true;
                }
            }

            self.finish(&definition, state, cancelled, &status_tx).await
        }
        .instrument(span)
        .await
    }

    /// Mark every pending node with a failed or skipped producer as skipped.
    /// Walking in topological order propagates skips transitively.
    async fn skip_blocked(
        &self,
        definition: &WorkflowDefinition,
        plan: &ExecutionPlan,
        state: &mut RunState,
    ) {
        for id in &plan.order {
            if state.status_of(id) != NodeStatus::Pending {
                continue;
            }
            let Some(spec) = definition.node(id) else { continue };
            let blocked_by = spec.inputs.iter().find(|b| {
                matches!(
                    state.status_of(&b.from),
                    NodeStatus::Failed | NodeStatus::Skipped
                )
            });
            let Some(binding) = blocked_by else { continue };

            debug!(node_id = %id, producer = %binding.from, "skipping node");
            let now = Utc::now();
            let record = NodeExecutionRecord {
                run_id: state.run.id,
                step_index: state.step(),
                node_id: id.clone(),
                node_type: spec.node_type.clone(),
                status: NodeStatus::Skipped,
                input: Payload::new(),
                output: None,
                started_at: now,
                finished_at: now,
                duration_ms: 0,
                error: None,
            };
            state.status.insert(id.clone(), NodeStatus::Skipped);
            self.log(self.sink.record_node_execution(&record).await, "node record");
            state.run.node_executions.push(record);
        }
    }

    /// Run one batch concurrently and apply the outcomes in dispatch order.
    /// Returns whether any node in the batch failed.
    async fn dispatch_batch(
        &self,
        definition: &WorkflowDefinition,
        plan: &ExecutionPlan,
        state: &mut RunState,
        ready: Vec<String>,
    ) -> bool {
        let mut dispatched = Vec::with_capacity(ready.len());
        let mut pending = Vec::with_capacity(ready.len());

        for node_id in ready {
            let Some(spec) = definition.node(&node_id) else { continue };
            let Some(node) = plan.instances.get(&node_id).cloned() else { continue };
            state.status.insert(node_id.clone(), NodeStatus::Running);

            let (input, missing) = resolve_inputs(spec, &state.outputs);
            let ctx = ExecutionContext { run_id: state.run.id, node_id: node_id.clone() };
            let config = spec.config.clone();
            let timeout = self.config.timeout_for(&spec.node_type);
            let exec_config = self.config.clone();
            let node_input = input.clone();

            pending.push(async move {
                let started_at = Utc::now();
                let clock = Instant::now();

                let result = match missing {
                    Some(err) => Err(err),
                    None => {
                        let task_node_id = ctx.node_id.clone();
                        let handle = tokio::spawn(async move {
                            match tokio::time::timeout(
                                timeout,
                                invoke_with_retry(node.as_ref(), node_input, &config, &ctx, &exec_config),
                            )
                            .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(EngineError::Timeout {
                                    node_id: ctx.node_id.clone(),
                                    timeout,
                                }),
                            }
                        });
                        handle.await.unwrap_or_else(|e| {
                            Err(EngineError::NodeAborted {
                                node_id: task_node_id,
                                message: join_error_message(e),
                            })
                        })
                    }
                };

                NodeOutcome {
                    result,
                    started_at,
                    finished_at: Utc::now(),
                    duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
                }
            });
            dispatched.push(Dispatch { node_id, input });
        }

        let outcomes = join_all(pending).await;

        let mut any_failed = false;
        for (dispatch, outcome) in dispatched.into_iter().zip(outcomes) {
            let node_type = definition
                .node(&dispatch.node_id)
                .map(|s| s.node_type.clone())
                .unwrap_or_default();

            let (status, output, err) = match outcome.result {
                Ok(output) => {
                    info!(node_id = %dispatch.node_id, duration_ms = outcome.duration_ms, "node succeeded");
                    (NodeStatus::Succeeded, Some(output), None)
                }
                Err(e) => {
                    error!(node_id = %dispatch.node_id, kind = %e.kind(), "node failed: {e}");
                    any_failed = true;
                    let run_error = e.to_run_error();
                    let idx = state.topo_index.get(&dispatch.node_id).copied().unwrap_or(usize::MAX);
                    state.failures.push((idx, run_error.clone()));
                    (NodeStatus::Failed, None, Some(run_error))
                }
            };

            let record = NodeExecutionRecord {
                run_id: state.run.id,
                step_index: state.step(),
                node_id: dispatch.node_id.clone(),
                node_type,
                status,
                input: dispatch.input,
                output: output.clone(),
                started_at: outcome.started_at,
                finished_at: outcome.finished_at,
                duration_ms: outcome.duration_ms,
                error: err,
            };
            self.log(self.sink.record_node_execution(&record).await, "node record");
            state.run.node_executions.push(record);

            state.status.insert(dispatch.node_id.clone(), status);
            if let Some(output) = output {
                state.outputs.insert(dispatch.node_id, output);
            }
        }
        any_failed
    }

    /// Decide the final status, assemble the result and write it once.
    async fn finish(
        &self,
        definition: &WorkflowDefinition,
        mut state: RunState,
        cancelled: bool,
        status_tx: &Option<watch::Sender<RunStatus>>,
    ) -> WorkflowRun {
        state.failures.sort_by_key(|(idx, _)| *idx);
        let failures: Vec<RunError> = state.failures.into_iter().map(|(_, e)| e).collect();

        let mut terminal_outputs = Map::new();
        for id in &definition.terminals {
            if let Some(output) = state.outputs.remove(id) {
                terminal_outputs.insert(id.clone(), Value::Object(output));
            }
        }
        let all_terminals = terminal_outputs.len() == definition.terminals.len();

        let run = &mut state.run;
        if cancelled {
            run.status = RunStatus::Failed;
            run.error = Some(EngineError::Cancelled { node_id: None }.to_run_error());
        } else {
            match definition.policy {
                ExecutionPolicy::FailFast if failures.is_empty() && all_terminals => {
                    run.status = RunStatus::Completed;
                    run.result = Some(Value::Object(terminal_outputs));
                }
                ExecutionPolicy::FailFast => {
                    run.status = RunStatus::Failed;
                    run.error = failures.first().cloned();
                }
                ExecutionPolicy::BestEffort if !terminal_outputs.is_empty() => {
                    run.status = RunStatus::Completed;
                    if !failures.is_empty() {
                        warn!(failures = failures.len(), "run completed with partial failures");
                        terminal_outputs.insert(
                            PARTIAL_FAILURES_KEY.into(),
                            serde_json::to_value(&failures).unwrap_or(Value::Null),
                        );
                    }
                    run.result = Some(Value::Object(terminal_outputs));
                }
                ExecutionPolicy::BestEffort => {
                    run.status = RunStatus::Failed;
                    run.error = failures
                        .iter()
                        .find(|f| {
                            f.node_id
                                .as_deref()
                                .and_then(|id| definition.node(id))
                                .is_some_and(|spec| !spec.side_effecting)
                        })
                        .or_else(|| failures.first())
                        .cloned();
                }
            }
        }
        run.completed_at = Some(Utc::now());

        // Cancelled before the first dispatch: the run never started, but it
        // still gets its single run record.
        if run.started_at.is_none() {
            self.log(self.sink.record_run_start(run).await, "run start");
        }
        self.log(self.sink.record_run_end(run).await, "run end");
        publish(status_tx, run.status);

        match &run.error {
            Some(e) => error!(status = %run.status, kind = %e.kind, "run finished: {}", e.message),
            None => info!(status = %run.status, nodes = run.node_executions.len(), "run finished"),
        }
        state.run
    }

    /// Sink failures never affect the run.
    fn log<T>(&self, result: Result<T, crate::sink::SinkError>, what: &str) {
        if let Err(e) = result {
            warn!("execution log write failed ({what}): {e}");
        }
    }
}

fn publish(tx: &Option<watch::Sender<RunStatus>>, status: RunStatus) {
    if let Some(tx) = tx {
        // No receivers left is fine.
        let _ = tx.send(status);
    }
}

/// Build a node's input payload from its bindings. The second value is set
/// when a producer did not emit the bound output.
fn resolve_inputs(
    spec: &crate::models::NodeSpec,
    outputs: &HashMap<String, Payload>,
) -> (Payload, Option<EngineError>) {
    let mut input = Payload::new();
    for b in &spec.inputs {
        match outputs.get(&b.from).and_then(|o| o.get(&b.output)) {
            Some(v) => {
                input.insert(b.input.clone(), v.clone());
            }
            None => {
                return (
                    input,
                    Some(EngineError::MissingInput {
                        node_id: spec.id.clone(),
                        input: b.input.clone(),
                        from: b.from.clone(),
                        output: b.output.clone(),
                    }),
                )
            }
        }
    }
    (input, None)
}

fn join_error_message(e: JoinError) -> String {
    if e.is_panic() {
        let payload = e.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .map(|m| format!("panicked: {m}"))
            .unwrap_or_else(|| "panicked".into())
    } else {
        "task cancelled".into()
    }
}

/// Execute a single node, retrying retryable errors.
async fn invoke_with_retry(
    node: &dyn ExecutableNode,
    input: Payload,
    config: &Payload,
    ctx: &ExecutionContext,
    exec: &ExecutorConfig,
) -> Result<Payload, EngineError> {
    let mut attempts = 0u32;

    loop {
        match node.execute(input.clone(), config, ctx).await {
            Ok(output) => return Ok(output),

            Err(NodeError::Retryable(msg)) => {
                attempts += 1;
                if attempts > exec.max_retries {
                    return Err(EngineError::NodeRetryExhausted {
                        node_id: ctx.node_id.clone(),
                        attempts,
                        message: msg,
                    });
                }

                let delay = exec.backoff(attempts);
                warn!(
                    "node '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                    ctx.node_id, attempts, exec.max_retries, delay, msg
                );
                tokio::time::sleep(delay).await;
            }

            Err(other) => return Err(EngineError::from_node(&ctx.node_id, other)),
        }
    }
}
