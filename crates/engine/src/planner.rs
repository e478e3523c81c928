//! Workflow planner: turns a report request into a validated definition.
//!
//! Placeholder substitution follows two rules:
//! - a string that is exactly `{{ name }}` is replaced by the typed request
//!   parameter, or removed when the parameter is absent so the node's own
//!   default applies;
//! - any other string containing `{{` or `{%` is rendered with minijinja
//!   against the parameters.

use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::Environment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use nodes::Payload;

use crate::dag::validate_definition;
use crate::models::{ExecutionPolicy, NodeSpec, WorkflowDefinition};
use crate::registry::NodeRegistry;
use crate::templates::{builtin_templates, ReportTemplate};
use crate::EngineError;

/// What a caller asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub domain: String,
    pub report_type: String,
    #[serde(default)]
    pub parameters: Payload,
}

impl ReportRequest {
    pub fn new(domain: impl Into<String>, report_type: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            report_type: report_type.into(),
            parameters: Payload::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A (domain, report type) pair the planner can build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SupportedReport {
    pub domain: String,
    pub report_type: String,
    pub description: String,
}

/// Builds workflow definitions from report templates.
pub struct WorkflowPlanner {
    registry: Arc<NodeRegistry>,
    templates: BTreeMap<(String, String), ReportTemplate>,
    env: Environment<'static>,
}

impl WorkflowPlanner {
    /// Planner with every built-in template.
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        let mut planner = Self::empty(registry);
        for template in builtin_templates() {
            planner.add_template(template);
        }
        planner
    }

    /// Planner with no templates.
    pub fn empty(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            templates: BTreeMap::new(),
            env: Environment::new(),
        }
    }

    /// Add (or replace) a template keyed by its domain and report type.
    pub fn add_template(&mut self, template: ReportTemplate) -> &mut Self {
        let key = (template.domain.clone(), template.report_type.clone());
        self.templates.insert(key, template);
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Every report this planner can build, sorted by domain then type.
    pub fn supported_reports(&self) -> Vec<SupportedReport> {
        self.templates
            .values()
            .map(|t| SupportedReport {
                domain: t.domain.clone(),
                report_type: t.report_type.clone(),
                description: t.description.clone(),
            })
            .collect()
    }

    /// Build and validate the definition for `request`.
    ///
    /// A `policy` parameter (`fail_fast` / `best_effort`) overrides the
    /// template's policy.
    ///
    /// # Errors
    /// - [`EngineError::UnsupportedReportType`] when no template matches.
    /// - [`EngineError::InvalidWorkflowDefinition`] when a placeholder cannot
    ///   be rendered or the resulting graph is invalid.
    /// - [`EngineError::UnknownNodeType`] when a template names an
    ///   unregistered node type.
    #[instrument(skip(self, request), fields(domain = %request.domain, report_type = %request.report_type))]
    pub fn plan(&self, request: &ReportRequest) -> Result<WorkflowDefinition, EngineError> {
        let template = self
            .templates
            .get(&(request.domain.clone(), request.report_type.clone()))
            .ok_or_else(|| EngineError::UnsupportedReportType {
                domain: request.domain.clone(),
                report_type: request.report_type.clone(),
            })?;

        let policy = match request.parameters.get("policy") {
            Some(p) => serde_json::from_value::<ExecutionPolicy>(p.clone()).map_err(|e| {
                EngineError::invalid(vec![], format!("invalid policy parameter: {e}"))
            })?,
            None => template.policy,
        };

        let mut nodes = Vec::with_capacity(template.nodes.len());
        for t in &template.nodes {
            let config = match self.substitute(&t.config, &request.parameters) {
                Ok(Some(Value::Object(map))) => map,
                Ok(None) | Ok(Some(Value::Null)) => Payload::new(),
                Ok(Some(other)) => {
                    return Err(EngineError::invalid(
                        vec![t.id.clone()],
                        format!("config must be an object, got {other}"),
                    ))
                }
                Err(e) => {
                    return Err(EngineError::invalid(
                        vec![t.id.clone()],
                        format!("config placeholder could not be rendered: {e}"),
                    ))
                }
            };
            nodes.push(NodeSpec {
                id: t.id.clone(),
                node_type: t.node_type.clone(),
                config,
                inputs: t.inputs.clone(),
                side_effecting: false,
            });
        }

        let definition = WorkflowDefinition {
            name: template.name.clone(),
            domain: template.domain.clone(),
            report_type: template.report_type.clone(),
            nodes,
            terminals: template.terminals.clone(),
            policy,
        };

        let plan = validate_definition(&definition, &self.registry)?;
        debug!(order = ?plan.order, "planned execution order");
        info!(workflow = %definition.name, nodes = definition.nodes.len(), "workflow planned");
        Ok(definition)
    }

    /// Substitute placeholders in `value`. `None` means "drop this value".
    fn substitute(&self, value: &Value, params: &Payload) -> Result<Option<Value>, minijinja::Error> {
        match value {
            Value::String(s) => {
                if let Some(name) = exact_placeholder(s) {
                    return Ok(params.get(name).filter(|v| !v.is_null()).cloned());
                }
                if s.contains("{{") || s.contains("{%") {
                    return self.env.render_str(s, params).map(|r| Some(Value::String(r)));
                }
                Ok(Some(value.clone()))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = self.substitute(item, params)? {
                        out.push(v);
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            Value::Object(map) => {
                let mut out = Payload::new();
                for (k, v) in map {
                    if let Some(v) = self.substitute(v, params)? {
                        out.insert(k.clone(), v);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            other => Ok(Some(other.clone())),
        }
    }
}

/// `"{{ name }}"` → `Some("name")`.
fn exact_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?.trim();
    let is_ident = !inner.is_empty()
        && inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !inner.starts_with(|c: char| c.is_ascii_digit());
    is_ident.then_some(inner)
}
