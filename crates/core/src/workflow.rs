//! Execution-ready workflow graphs.
//!
//! ComfyUI executes workflows in the "API" format: a JSON object where each
//! key is a node ID and each value carries a `class_type` and an `inputs`
//! map. Input values are either literals or connection references of the
//! form `[upstream_node_id, output_slot]`.
//!
//! This module validates that shape before submission and lists the literal
//! inputs a user can see on the command line. It never rewrites the graph.

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::CoreError;
use crate::types::NodeId;

/// Maximum characters shown for a literal value in a parameter listing.
pub const PARAM_DISPLAY_MAX_CHARS: usize = 50;

/// Top-level keys that only appear in the editor ("GUI") export format.
const EDITOR_FORMAT_KEYS: &[&str] = &["nodes", "links"];

/// A single node of an execution-ready workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowNode {
    pub id: NodeId,
    /// ComfyUI class type (e.g. "KSampler", "CLIPTextEncode").
    pub class_type: String,
    /// Raw input map for this node.
    pub inputs: serde_json::Map<String, serde_json::Value>,
}

/// A `[upstream_node_id, output_slot]` reference found in a node's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeConnection {
    pub from_node: NodeId,
    pub from_slot: u64,
    pub to_node: NodeId,
    pub to_input: String,
}

/// A literal (non-connection) input value.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowParameter {
    pub node_id: NodeId,
    pub class_type: String,
    pub input_name: String,
    pub value: serde_json::Value,
}

/// A validated, execution-ready workflow graph.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowGraph {
    /// Nodes ordered by numeric ID where possible.
    pub nodes: Vec<WorkflowNode>,
    pub connections: Vec<NodeConnection>,
}

impl WorkflowGraph {
    /// Parse and validate an execution-ready workflow.
    ///
    /// Rejects editor-format exports, empty graphs, nodes without a
    /// `class_type`, and connections pointing at nodes that do not exist.
    pub fn parse(json: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CoreError::Validation("Workflow JSON must be an object".to_string()))?;

        if EDITOR_FORMAT_KEYS
            .iter()
            .all(|key| obj.get(*key).is_some_and(|v| v.is_array()))
        {
            return Err(CoreError::UnsupportedFormat(
                "editor-format workflow (top-level 'nodes'/'links'); export it in API format"
                    .to_string(),
            ));
        }

        if obj.is_empty() {
            return Err(CoreError::Validation(
                "Workflow JSON must contain at least one node".to_string(),
            ));
        }

        let mut nodes = Vec::with_capacity(obj.len());
        let mut connections = Vec::new();

        for (node_id, node_value) in obj {
            let class_type = node_value
                .get("class_type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Node '{node_id}' is missing required 'class_type' field"
                    ))
                })?
                .to_string();

            let inputs = match node_value.get("inputs") {
                None | Some(serde_json::Value::Null) => serde_json::Map::new(),
                Some(serde_json::Value::Object(map)) => map.clone(),
                Some(_) => {
                    return Err(CoreError::Validation(format!(
                        "Node '{node_id}' has non-object 'inputs'"
                    )))
                }
            };

            for (input_name, input_val) in &inputs {
                if let Some((from_node, from_slot)) = as_connection(input_val) {
                    connections.push(NodeConnection {
                        from_node,
                        from_slot,
                        to_node: node_id.clone(),
                        to_input: input_name.clone(),
                    });
                }
            }

            nodes.push(WorkflowNode {
                id: node_id.clone(),
                class_type,
                inputs,
            });
        }

        if let Some(dangling) = connections
            .iter()
            .find(|c| !obj.contains_key(&c.from_node))
        {
            return Err(CoreError::DanglingReference {
                node_id: dangling.to_node.clone(),
                upstream: dangling.from_node.clone(),
            });
        }

        nodes.sort_by(|a, b| compare_node_ids(&a.id, &b.id));

        Ok(Self { nodes, connections })
    }

    /// All literal inputs, in node order.
    pub fn parameters(&self) -> Vec<WorkflowParameter> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.inputs
                    .iter()
                    .filter(|(_, value)| !value.is_array())
                    .map(|(name, value)| WorkflowParameter {
                        node_id: node.id.clone(),
                        class_type: node.class_type.clone(),
                        input_name: name.clone(),
                        value: value.clone(),
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Render a literal for display, truncated to `max_chars` characters with a
/// trailing `...` when cut.
pub fn display_value(value: &serde_json::Value, max_chars: usize) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn as_connection(value: &serde_json::Value) -> Option<(NodeId, u64)> {
    match value.as_array()?.as_slice() {
        [node, slot] => Some((node.as_str()?.to_string(), slot.as_u64()?)),
        _ => None,
    }
}

/// Numeric IDs sort numerically and before non-numeric ones.
fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
