#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported workflow format: {0}")]
    UnsupportedFormat(String),

    #[error("Node '{node_id}' references missing upstream node '{upstream}'")]
    DanglingReference { node_id: String, upstream: String },
}
