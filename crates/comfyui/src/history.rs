//! Classification of `/history` records.
//!
//! Turns the raw history payload for one prompt into a [`StatusSnapshot`].
//! The rules mirror how the toolkit has always read ComfyUI history,
//! including its permissive last rule:
//!
//! 1. no record for the prompt: pending
//! 2. `status.completed` truthy, or an `outputs` key present: completed
//! 3. `status` carries an `error` key: failed
//! 4. any other record: completed with an "unknown" status
//!
//! Rule 4 treats the mere presence of a record as proof the prompt left the
//! queue. Some server versions may list a record earlier than that, so such
//! snapshots are marked [`StatusSnapshot::heuristic`].

use serde::Serialize;

/// Tri-state classification of a history snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Pending,
    Completed,
    Failed,
}

/// A point-in-time read of one prompt's history record.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SnapshotState,
    /// Set when `Completed` came from rule 4 rather than a real signal.
    pub heuristic: bool,
    /// The record's `outputs` value, when present.
    pub outputs: Option<serde_json::Value>,
    /// The `status.error` value as text, for failed snapshots.
    pub error: Option<String>,
    /// The record itself, or `null` when the prompt is unknown.
    pub raw: serde_json::Value,
}

impl StatusSnapshot {
    /// Status label as reported to users (`unknown` for rule 4).
    pub fn label(&self) -> &'static str {
        match (self.state, self.heuristic) {
            (SnapshotState::Pending, _) => "pending",
            (SnapshotState::Completed, false) => "completed",
            (SnapshotState::Completed, true) => "unknown",
            (SnapshotState::Failed, _) => "failed",
        }
    }
}

/// Classify the history payload returned for `prompt_id`.
pub fn classify(prompt_id: &str, payload: &serde_json::Value) -> StatusSnapshot {
    let Some(record) = payload.get(prompt_id) else {
        return StatusSnapshot {
            state: SnapshotState::Pending,
            heuristic: false,
            outputs: None,
            error: None,
            raw: serde_json::Value::Null,
        };
    };

    let status = record.get("status");
    let outputs = record.get("outputs").cloned();
    let completed_flag = status
        .and_then(|s| s.get("completed"))
        .is_some_and(is_truthy);

    let (state, heuristic, error) = if completed_flag || outputs.is_some() {
        (SnapshotState::Completed, false, None)
    } else if let Some(err) = status.and_then(|s| s.get("error")) {
        (SnapshotState::Failed, false, Some(error_text(err)))
    } else {
        (SnapshotState::Completed, true, None)
    };

    StatusSnapshot {
        state,
        heuristic,
        outputs,
        error,
        raw: record.clone(),
    }
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn error_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn absent_record_is_pending() {
        let snap = classify("abc123", &json!({}));
        assert_eq!(snap.state, SnapshotState::Pending);
        assert!(snap.raw.is_null());
    }

    #[test]
    fn other_prompt_records_are_ignored() {
        let snap = classify("abc123", &json!({"zzz": {"outputs": {}}}));
        assert_eq!(snap.state, SnapshotState::Pending);
    }

    #[test]
    fn completed_flag_wins() {
        let payload = json!({"abc123": {"status": {"completed": true, "status_str": "success"}}});
        let snap = classify("abc123", &payload);
        assert_eq!(snap.state, SnapshotState::Completed);
        assert!(!snap.heuristic);
        assert!(snap.outputs.is_none());
    }

    #[test]
    fn outputs_key_alone_means_completed() {
        let payload = json!({"abc123": {"outputs": {"9": {"images": [{"filename": "a.png"}]}}}});
        let snap = classify("abc123", &payload);
        assert_eq!(snap.state, SnapshotState::Completed);
        assert_eq!(snap.outputs, Some(json!({"9": {"images": [{"filename": "a.png"}]}})));
        assert_eq!(snap.label(), "completed");
    }

    #[test]
    fn outputs_key_beats_error_key() {
        let payload = json!({"abc123": {"status": {"error": "boom"}, "outputs": {}}});
        assert_eq!(classify("abc123", &payload).state, SnapshotState::Completed);
    }

    #[test]
    fn error_key_means_failed() {
        let payload = json!({"abc123": {"status": {"completed": false, "error": "node 5 crashed"}}});
        let snap = classify("abc123", &payload);
        assert_eq!(snap.state, SnapshotState::Failed);
        assert_eq!(snap.error.as_deref(), Some("node 5 crashed"));
    }

    #[test]
    fn structured_error_is_stringified() {
        let payload = json!({"abc123": {"status": {"error": {"code": 7}}}});
        let snap = classify("abc123", &payload);
        assert_eq!(snap.error.as_deref(), Some(r#"{"code":7}"#));
    }

    #[test]
    fn bare_record_falls_back_to_unknown_completion() {
        let payload = json!({"abc123": {"prompt": [1, "abc123", {}]}});
        let snap = classify("abc123", &payload);
        assert_eq!(snap.state, SnapshotState::Completed);
        assert!(snap.heuristic);
        assert_eq!(snap.label(), "unknown");
    }

    #[test]
    fn falsy_completed_flag_does_not_complete() {
        let payload = json!({"abc123": {"status": {"completed": 0, "error": "x"}}});
        assert_eq!(classify("abc123", &payload).state, SnapshotState::Failed);
    }

    #[test]
    fn truthiness_follows_json_rules() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("yes")));
        assert!(is_truthy(&json!([0])));
    }
}
