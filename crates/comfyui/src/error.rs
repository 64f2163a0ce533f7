use comfyrest_core::error::CoreError;

use crate::api::ComfyUIApiError;
use crate::client::ComfyUIClientError;

/// Errors surfaced by [`Watcher`](crate::watcher::Watcher) before a wait
/// begins. Execution failures and timeouts are verdicts, not errors.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The workflow failed local validation.
    #[error("Invalid workflow: {0}")]
    Workflow(#[from] CoreError),

    /// A REST call failed.
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    /// The event stream could not be established.
    #[error(transparent)]
    Stream(#[from] ComfyUIClientError),

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(reqwest::Error),
}

impl WatchError {
    /// Connection-level failure on either transport.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transport(),
            Self::Stream(_) => true,
            _ => false,
        }
    }

    /// The server answered, but not with what was expected.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Api(ComfyUIApiError::Protocol(_) | ComfyUIApiError::ApiError { .. })
        )
    }

    /// The submission response carried no job identifier.
    pub fn is_missing_job_id(&self) -> bool {
        matches!(self, Self::Api(ComfyUIApiError::MissingPromptId(_)))
    }
}
