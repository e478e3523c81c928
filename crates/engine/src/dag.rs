//! DAG validation: run this before executing a workflow definition.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the definition.
//! 2. At least one terminal is declared, every terminal exists, none is
//!    declared twice and none uses the reserved `partial_failures` id.
//! 3. Every binding references an existing producer.
//! 4. The binding graph must be acyclic (topological sort must succeed).
//! 5. Every node reaches a terminal unless it is marked side-effecting.
//!
//! With a registry, additionally:
//! 6. Every node type resolves.
//! 7. Bindings match the declared ports on both ends, each input is bound at
//!    most once and every required input is bound.
//!
//! Returns a topologically-sorted list of node IDs on success. Ties are
//! broken by position in the definition, so the order is deterministic.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use nodes::ExecutableNode;

use crate::executor::PARTIAL_FAILURES_KEY;
use crate::models::WorkflowDefinition;
use crate::registry::NodeRegistry;
use crate::EngineError;

/// Validate the definition's DAG and return nodes in topological execution order.
///
/// # Errors
/// [`EngineError::InvalidWorkflowDefinition`] naming the offending nodes.
pub fn validate_dag(def: &WorkflowDefinition) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(def.nodes.len());
    let mut duplicates = Vec::new();
    for (i, node) in def.nodes.iter().enumerate() {
        if index.insert(node.id.as_str(), i).is_some() {
            duplicates.push(node.id.clone());
        }
    }
    if !duplicates.is_empty() {
        return Err(EngineError::invalid(duplicates, "duplicate node id"));
    }

    // -----------------------------------------------------------------------
    // 2. Terminals
    // -----------------------------------------------------------------------
    if def.terminals.is_empty() {
        return Err(EngineError::invalid(vec![], "no terminal node declared"));
    }
    let missing: Vec<String> = def
        .terminals
        .iter()
        .filter(|t| !index.contains_key(t.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::invalid(missing, "terminal node does not exist"));
    }
    let mut seen = HashSet::with_capacity(def.terminals.len());
    let mut repeated: Vec<String> = def
        .terminals
        .iter()
        .filter(|t| !seen.insert(t.as_str()))
        .cloned()
        .collect();
    if !repeated.is_empty() {
        repeated.dedup();
        return Err(EngineError::invalid(repeated, "terminal declared more than once"));
    }
    // Run results key terminal outputs by id next to the partial-failure list.
    if def.terminals.iter().any(|t| t == PARTIAL_FAILURES_KEY) {
        return Err(EngineError::invalid(
            vec![PARTIAL_FAILURES_KEY.to_string()],
            "terminal id is reserved for partial failures",
        ));
    }

    // -----------------------------------------------------------------------
    // 3. Binding endpoints
    // -----------------------------------------------------------------------
    let unresolved: Vec<String> = def
        .nodes
        .iter()
        .filter(|n| n.inputs.iter().any(|b| !index.contains_key(b.from.as_str())))
        .map(|n| n.id.clone())
        .collect();
    if !unresolved.is_empty() {
        return Err(EngineError::invalid(unresolved, "binding references an unknown node"));
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm, lowest definition index first)
    // -----------------------------------------------------------------------
    let n = def.nodes.len();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];

    for (consumer, node) in def.nodes.iter().enumerate() {
        for binding in &node.inputs {
            let producer = index[binding.from.as_str()];
            adjacency[producer].push(consumer);
            in_degree[consumer] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut sorted: Vec<String> = Vec::with_capacity(n);
    let mut visited = vec![false; n];

    while let Some(Reverse(i)) = ready.pop() {
        visited[i] = true;
        sorted.push(def.nodes[i].id.clone());
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if sorted.len() != n {
        let cyclic = def
            .nodes
            .iter()
            .zip(&visited)
            .filter(|(_, &v)| !v)
            .map(|(node, _)| node.id.clone())
            .collect();
        return Err(EngineError::invalid(cyclic, "workflow graph contains a cycle"));
    }

    // -----------------------------------------------------------------------
    // 5. Reachability to a terminal
    // -----------------------------------------------------------------------
    let mut reaches: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = def.terminals.iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        if !reaches.insert(id) {
            continue;
        }
        for binding in &def.nodes[index[id]].inputs {
            stack.push(binding.from.as_str());
        }
    }
    let orphans: Vec<String> = def
        .nodes
        .iter()
        .filter(|n| !n.side_effecting && !reaches.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    if !orphans.is_empty() {
        return Err(EngineError::invalid(orphans, "node does not reach any terminal"));
    }

    Ok(sorted)
}

/// A validated definition: execution order plus one node instance per step.
pub struct ExecutionPlan {
    pub order: Vec<String>,
    pub instances: HashMap<String, Arc<dyn ExecutableNode>>,
}

/// Full build-time validation against a registry.
///
/// # Errors
/// - [`EngineError::UnknownNodeType`] for the first node whose type is not
///   registered.
/// - [`EngineError::InvalidWorkflowDefinition`] for structural or port
///   problems.
pub fn validate_definition(
    def: &WorkflowDefinition,
    registry: &NodeRegistry,
) -> Result<ExecutionPlan, EngineError> {
    let mut instances: HashMap<String, Arc<dyn ExecutableNode>> = HashMap::new();
    for node in &def.nodes {
        let constructor = registry.resolve(&node.node_type).map_err(|_| {
            EngineError::UnknownNodeType {
                node_type: node.node_type.clone(),
                node_id: Some(node.id.clone()),
            }
        })?;
        instances.insert(node.id.clone(), constructor());
    }

    let order = validate_dag(def)?;
    check_ports(def, &instances)?;

    Ok(ExecutionPlan { order, instances })
}

fn check_ports(
    def: &WorkflowDefinition,
    instances: &HashMap<String, Arc<dyn ExecutableNode>>,
) -> Result<(), EngineError> {
    let ports: HashMap<&str, _> = instances
        .iter()
        .map(|(id, node)| (id.as_str(), node.ports()))
        .collect();

    let mut offenders: Vec<String> = Vec::new();
    let mut problems: Vec<String> = Vec::new();

    for node in &def.nodes {
        let own = &ports[node.id.as_str()];
        let mut bound: HashSet<&str> = HashSet::new();
        let before = problems.len();

        for b in &node.inputs {
            if own.input(&b.input).is_none() {
                problems.push(format!("'{}' has no input '{}'", node.id, b.input));
            }
            if !bound.insert(b.input.as_str()) {
                problems.push(format!("'{}' binds input '{}' twice", node.id, b.input));
            }
            if !ports[b.from.as_str()].has_output(&b.output) {
                problems.push(format!(
                    "'{}' binds '{}.{}', which is not an output of {}",
                    node.id, b.from, b.output, b.from
                ));
            }
        }
        for port in own.inputs.iter().filter(|p| p.required) {
            if !bound.contains(port.name.as_str()) {
                problems.push(format!("'{}' required input '{}' is unbound", node.id, port.name));
            }
        }

        if problems.len() > before {
            offenders.push(node.id.clone());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(EngineError::invalid(offenders, problems.join("; ")))
    }
}
