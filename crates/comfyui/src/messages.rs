//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`StreamEvent`] enum. Unknown kinds (custom node
//! telemetry such as `crystools.monitor`) become [`StreamEvent::Other`]
//! instead of parse errors.

use std::collections::BTreeMap;

use serde::Deserialize;

/// All ComfyUI WebSocket events the watcher distinguishes.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Server status broadcast (queue depth).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(PromptRef),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is executing, or the prompt finished when `node` is empty.
    Executing(ExecutingData),

    /// Step-level progress from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// Per-node state map for a prompt.
    ProgressState(ProgressStateData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// The prompt finished successfully (newer servers only).
    ExecutionSuccess(PromptRef),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Execution was interrupted.
    ExecutionInterrupted(InterruptedData),

    /// Any other event kind.
    Other { kind: String },
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i64,
}

/// Payload carrying only a prompt reference.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None` (or empty), execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

impl ExecutingData {
    pub fn is_finished(&self) -> bool {
        self.node.as_deref().map_or(true, str::is_empty)
    }
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i64,
    /// Total number of steps.
    pub max: i64,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i16
        } else {
            0
        }
    }
}

/// Payload for `progress_state` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressStateData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeProgress>,
}

/// One node's entry in a `progress_state` map.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeProgress {
    /// `pending`, `running`, `finished` or `error`.
    pub state: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub max: f64,
    /// Error detail, when the server embeds one.
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl NodeProgress {
    pub fn is_failed(&self) -> bool {
        matches!(self.state.as_str(), "error" | "failed")
    }
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

impl ErrorData {
    /// Human-readable error description.
    pub fn describe(&self) -> String {
        let mut text = match (self.exception_type.is_empty(), self.exception_message.is_empty()) {
            (false, false) => format!("{}: {}", self.exception_type, self.exception_message),
            (true, false) => self.exception_message.clone(),
            (false, true) => self.exception_type.clone(),
            (true, true) => "execution error".to_string(),
        };
        if let Some(node_id) = &self.node_id {
            match &self.node_type {
                Some(node_type) => text.push_str(&format!(" (node {node_id}, {node_type})")),
                None => text.push_str(&format!(" (node {node_id})")),
            }
        }
        text
    }
}

/// Payload for `execution_interrupted` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Raw frame shape before kind-specific decoding.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl StreamEvent {
    /// The prompt this event refers to, if it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStart(d) | Self::ExecutionSuccess(d) => Some(&d.prompt_id),
            Self::ExecutionCached(d) => Some(&d.prompt_id),
            Self::Executing(d) => d.prompt_id.as_deref(),
            Self::Progress(d) => d.prompt_id.as_deref(),
            Self::ProgressState(d) => Some(&d.prompt_id),
            Self::Executed(d) => Some(&d.prompt_id),
            Self::ExecutionError(d) => Some(&d.prompt_id),
            Self::ExecutionInterrupted(d) => Some(&d.prompt_id),
            Self::Status(_) | Self::Other { .. } => None,
        }
    }
}

/// Parse a ComfyUI WebSocket text message into a typed event.
///
/// Returns `Err` for malformed JSON, a missing `type`, or a known kind
/// whose payload does not match. Unknown kinds parse as
/// [`StreamEvent::Other`].
pub fn parse_message(text: &str) -> Result<StreamEvent, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;
    let event = match kind.as_str() {
        "status" => StreamEvent::Status(serde_json::from_value(data)?),
        "execution_start" => StreamEvent::ExecutionStart(serde_json::from_value(data)?),
        "execution_cached" => StreamEvent::ExecutionCached(serde_json::from_value(data)?),
        "executing" => StreamEvent::Executing(serde_json::from_value(data)?),
        "progress" => StreamEvent::Progress(serde_json::from_value(data)?),
        "progress_state" => StreamEvent::ProgressState(serde_json::from_value(data)?),
        "executed" => StreamEvent::Executed(serde_json::from_value(data)?),
        "execution_success" => StreamEvent::ExecutionSuccess(serde_json::from_value(data)?),
        "execution_error" => StreamEvent::ExecutionError(serde_json::from_value(data)?),
        "execution_interrupted" => {
            StreamEvent::ExecutionInterrupted(serde_json::from_value(data)?)
        }
        _ => StreamEvent::Other { kind },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}},"sid":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            StreamEvent::Status(data) => {
                assert_eq!(data.status.exec_info.queue_remaining, 3);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_cached_without_nodes() {
        let json = r#"{"type":"execution_cached","data":{"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            StreamEvent::ExecutionCached(data) => {
                assert_eq!(data.prompt_id, "abc");
                assert!(data.nodes.is_empty());
            }
            other => panic!("Expected ExecutionCached, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_with_node() {
        let json = r#"{"type":"executing","data":{"node":"42","prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            StreamEvent::Executing(data) => {
                assert_eq!(data.node.as_deref(), Some("42"));
                assert_eq!(data.prompt_id.as_deref(), Some("xyz"));
                assert!(!data.is_finished());
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::Executing(data) => assert!(data.is_finished()),
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn empty_node_counts_as_finished() {
        let json = r#"{"type":"executing","data":{"node":"","prompt_id":"xyz"}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::Executing(data) => assert!(data.is_finished()),
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::Progress(data) => {
                assert_eq!(data.value, 5);
                assert_eq!(data.max, 20);
                assert_eq!(data.percent(), 25);
                assert!(data.prompt_id.is_none());
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_state_message() {
        let json = r#"{"type":"progress_state","data":{"prompt_id":"p1","nodes":{
            "3":{"state":"finished","value":20,"max":20,"node_id":"3"},
            "8":{"state":"error","value":0,"max":1,"node_id":"8","error":"CUDA out of memory"}}}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::ProgressState(data) => {
                assert_eq!(data.prompt_id, "p1");
                assert!(!data.nodes["3"].is_failed());
                assert!(data.nodes["8"].is_failed());
                assert_eq!(
                    data.nodes["8"].error,
                    Some(serde_json::json!("CUDA out of memory"))
                );
            }
            other => panic!("Expected ProgressState, got {other:?}"),
        }
    }

    #[test]
    fn parse_executed_message() {
        let json = r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"out.png"}]},"prompt_id":"abc"}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::Executed(data) => {
                assert_eq!(data.node, "9");
                assert!(data.output.is_object());
            }
            other => panic!("Expected Executed, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","node_type":"KSampler","exception_message":"out of memory","exception_type":"RuntimeError","traceback":[]}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::ExecutionError(data) => {
                assert_eq!(data.prompt_id, "abc");
                assert_eq!(
                    data.describe(),
                    "RuntimeError: out of memory (node 5, KSampler)"
                );
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn prompt_id_is_exposed_per_kind() {
        let start = parse_message(r#"{"type":"execution_start","data":{"prompt_id":"a"}}"#).unwrap();
        assert_eq!(start.prompt_id(), Some("a"));
        let status =
            parse_message(r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":0}}}}"#)
                .unwrap();
        assert_eq!(status.prompt_id(), None);
    }

    #[test]
    fn unknown_type_parses_as_other() {
        let json = r#"{"type":"crystools.monitor","data":{"cpu_utilization":12.5}}"#;
        match parse_message(json).unwrap() {
            StreamEvent::Other { kind } => assert_eq!(kind, "crystools.monitor"),
            other => panic!("Expected Other, got {other:?}"),
        }
    }

    #[test]
    fn known_type_with_bad_payload_is_error() {
        let json = r#"{"type":"execution_error","data":{"node_id":"5"}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }
}
