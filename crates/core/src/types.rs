/// Opaque job identifier issued by the execution server (`prompt_id`).
pub type JobId = String;

/// Node identifier inside a workflow graph (the JSON object key).
pub type NodeId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
