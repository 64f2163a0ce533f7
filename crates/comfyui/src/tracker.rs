//! Per-prompt interpretation of stream events.
//!
//! [`StreamTracker`] folds [`StreamEvent`]s for one prompt into at most one
//! terminal [`StreamSignal`]. It owns no I/O, so the precedence between the
//! authoritative and fallback completion signals can be tested directly.

use crate::messages::StreamEvent;

/// What the stream has to say about the tracked prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// `executing` with an empty node for the tracked prompt.
    Completed,
    /// The server reported an empty queue before any authoritative signal.
    /// Provisional: a later `Completed` or `Failed` takes precedence.
    QueueDrained,
    /// The server reported the prompt failed.
    Failed(String),
}

impl StreamSignal {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::QueueDrained)
    }
}

#[derive(Debug)]
pub struct StreamTracker {
    prompt_id: String,
    drained: bool,
    settled: bool,
}

impl StreamTracker {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            drained: false,
            settled: false,
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    /// True once a terminal signal has been emitted.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Feed one event. Returns a signal only when the event changes what
    /// the watcher should do; everything after a terminal signal is stale.
    pub fn observe(&mut self, event: &StreamEvent) -> Option<StreamSignal> {
        if self.settled {
            return None;
        }

        if let Some(prompt_id) = event.prompt_id() {
            if prompt_id != self.prompt_id {
                return None;
            }
        }

        let signal = match event {
            StreamEvent::Executing(data) if data.prompt_id.is_some() && data.is_finished() => {
                Some(StreamSignal::Completed)
            }
            StreamEvent::ExecutionError(data) => Some(StreamSignal::Failed(data.describe())),
            StreamEvent::ExecutionInterrupted(data) => Some(StreamSignal::Failed(match &data.node_id {
                Some(node_id) => format!("execution interrupted at node {node_id}"),
                None => "execution interrupted".to_string(),
            })),
            StreamEvent::ProgressState(data) => {
                data.nodes
                    .iter()
                    .find(|(_, node)| node.is_failed())
                    .map(|(node_id, node)| {
                        StreamSignal::Failed(match &node.error {
                            Some(serde_json::Value::String(s)) => format!("node {node_id} failed: {s}"),
                            Some(other) => format!("node {node_id} failed: {other}"),
                            None => format!("node {node_id} failed"),
                        })
                    })
            }
            StreamEvent::Status(data) if data.status.exec_info.queue_remaining == 0 => {
                if self.drained {
                    None
                } else {
                    self.drained = true;
                    Some(StreamSignal::QueueDrained)
                }
            }
            _ => None,
        };

        if signal.as_ref().is_some_and(StreamSignal::is_terminal) {
            self.settled = true;
        }
        signal
    }
}
