//! Human-readable rendering of verdicts and parameter listings.

use comfyrest_comfyui::{Verdict, VerdictStatus};
use comfyrest_core::workflow::{display_value, WorkflowParameter, PARAM_DISPLAY_MAX_CHARS};

/// `(node_id, filename)` for every image in a history `outputs` map.
pub fn output_images(outputs: &serde_json::Value) -> Vec<(String, String)> {
    let Some(nodes) = outputs.as_object() else {
        return Vec::new();
    };
    nodes
        .iter()
        .flat_map(|(node_id, output)| {
            output
                .get("images")
                .and_then(|images| images.as_array())
                .into_iter()
                .flatten()
                .filter_map(|image| image.get("filename").and_then(|f| f.as_str()))
                .map(move |filename| (node_id.clone(), filename.to_string()))
        })
        .collect()
}

/// Lines printed for a finished run.
pub fn verdict_lines(verdict: &Verdict) -> Vec<String> {
    let mut lines = vec![format!(
        "job {}: {} (via {})",
        verdict.job_id,
        status_label(verdict.status),
        source_label(verdict),
    )];

    match verdict.status {
        VerdictStatus::Completed => {
            let images = verdict
                .outputs
                .as_ref()
                .map(output_images)
                .unwrap_or_default();
            if images.is_empty() {
                lines.push("no outputs reported (all nodes were cached?)".to_string());
            }
            for (node_id, filename) in images {
                lines.push(format!("  node {node_id}: {filename}"));
            }
        }
        VerdictStatus::Failed | VerdictStatus::TimedOut => {
            if let Some(error) = &verdict.error {
                lines.push(format!("  {error}"));
            }
        }
    }
    lines
}

/// One line per literal input: `[node] ClassType.input = value`.
pub fn parameter_lines(params: &[WorkflowParameter]) -> Vec<String> {
    params
        .iter()
        .map(|p| {
            format!(
                "[{}] {}.{} = {}",
                p.node_id,
                p.class_type,
                p.input_name,
                display_value(&p.value, PARAM_DISPLAY_MAX_CHARS),
            )
        })
        .collect()
}

fn status_label(status: VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::Completed => "completed",
        VerdictStatus::Failed => "failed",
        VerdictStatus::TimedOut => "timed_out",
    }
}

fn source_label(verdict: &Verdict) -> String {
    serde_json::to_value(verdict.source)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
