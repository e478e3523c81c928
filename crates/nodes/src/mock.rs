//! `MockNode`: a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    ExecutableNode, ExecutionContext, InputPort, NodeCapability, NodeError, NodePorts, Payload,
};

/// Behaviour injected into `MockNode` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific payload.
    ReturnValue(Payload),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `DocumentQuality` error.
    FailQuality { score: f64, threshold: f64 },
    /// Fail with `Retryable` for the first `failures` calls, then return.
    Flaky { failures: usize, value: Payload },
    /// Panic inside `execute`.
    Panic(String),
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
#[derive(Clone)]
pub struct MockNode {
    /// Registry key reported by `type_id`.
    pub name: String,
    pub capability: NodeCapability,
    pub ports: NodePorts,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Sleep before acting on the behaviour.
    pub delay: Option<Duration>,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<Payload>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        let outputs: Vec<String> = match &behaviour {
            MockBehaviour::ReturnValue(v) | MockBehaviour::Flaky { value: v, .. } => {
                v.keys().cloned().collect()
            }
            _ => Vec::new(),
        };
        Self {
            name: name.into(),
            capability: NodeCapability::Transform,
            ports: NodePorts { inputs: Vec::new(), outputs },
            behaviour,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a mock that always succeeds with the given payload. Its
    /// declared outputs are the payload's keys.
    pub fn returning(name: impl Into<String>, value: Payload) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails the document quality gate.
    pub fn failing_quality(name: impl Into<String>, score: f64, threshold: f64) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailQuality { score, threshold })
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Payload) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, value })
    }

    /// Create a mock that panics when executed.
    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    /// Declare required inputs.
    pub fn with_inputs(mut self, names: &[&str]) -> Self {
        self.ports.inputs.extend(names.iter().map(|n| InputPort::required(*n)));
        self
    }

    /// Declare optional inputs.
    pub fn with_optional_inputs(mut self, names: &[&str]) -> Self {
        self.ports.inputs.extend(names.iter().map(|n| InputPort::optional(*n)));
        self
    }

    /// Declare outputs (for failing mocks, which have no payload to infer from).
    pub fn with_outputs(mut self, names: &[&str]) -> Self {
        self.ports.outputs = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs received on the `n`th call.
    pub fn call(&self, n: usize) -> Option<Payload> {
        self.calls.lock().unwrap().get(n).cloned()
    }

    /// Highest number of concurrent `execute` calls observed across every
    /// clone of this mock.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when `execute` unwinds.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    fn type_id(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> NodeCapability {
        self.capability
    }

    fn ports(&self) -> NodePorts {
        self.ports.clone()
    }

    async fn execute(
        &self,
        inputs: Payload,
        _config: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(inputs);
            calls.len()
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(v.clone()),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FailQuality { score, threshold } => Err(NodeError::DocumentQuality {
                document: self.name.clone(),
                score: *score,
                threshold: *threshold,
                errors: vec!["mock quality failure".into()],
            }),
            MockBehaviour::Flaky { failures, value } => {
                if attempt <= *failures {
                    Err(NodeError::Retryable(format!("attempt {attempt} failed")))
                } else {
                    Ok(value.clone())
                }
            }
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        }
    }
}
