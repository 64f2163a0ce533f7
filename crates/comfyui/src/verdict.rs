//! Terminal outcome of a watched prompt.
//!
//! [`VerdictSlot`] is the one value shared between the stream worker and
//! the wait loop. It is written at most once: the first writer wins and
//! every later write returns the stored verdict unchanged. A slot built
//! with a deadline also refuses [`VerdictSlot::try_set`] writes that arrive
//! after it, so only the wait loop can decide once the budget is spent.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use comfyrest_core::types::{JobId, Timestamp};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Completed,
    Failed,
    TimedOut,
}

/// Which part of the watcher produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictSource {
    Stream,
    Poll,
    Timer,
}

/// The single terminal result for one prompt.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub job_id: JobId,
    pub status: VerdictStatus,
    pub source: VerdictSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub decided_at: Timestamp,
}

impl Verdict {
    pub fn completed(
        job_id: impl Into<JobId>,
        source: VerdictSource,
        outputs: Option<serde_json::Value>,
    ) -> Self {
        Self::new(job_id.into(), VerdictStatus::Completed, source, outputs, None)
    }

    pub fn failed(job_id: impl Into<JobId>, source: VerdictSource, error: String) -> Self {
        Self::new(job_id.into(), VerdictStatus::Failed, source, None, Some(error))
    }

    /// A timeout verdict. `last_error` is the most recent transient failure
    /// seen while waiting, if any.
    pub fn timed_out(job_id: impl Into<JobId>, timeout: Duration, last_error: Option<String>) -> Self {
        let mut error = format!("no terminal signal within {:.1}s", timeout.as_secs_f64());
        if let Some(last) = last_error {
            error.push_str(&format!("; last error: {last}"));
        }
        Self::new(
            job_id.into(),
            VerdictStatus::TimedOut,
            VerdictSource::Timer,
            None,
            Some(error),
        )
    }

    fn new(
        job_id: JobId,
        status: VerdictStatus,
        source: VerdictSource,
        outputs: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Self {
        Self {
            job_id,
            status,
            source,
            outputs,
            error,
            decided_at: chrono::Utc::now(),
        }
    }
}

/// First-writer-wins holder for a [`Verdict`].
#[derive(Debug, Clone, Default)]
pub struct VerdictSlot {
    inner: Arc<Mutex<Option<Verdict>>>,
    deadline: Option<Instant>,
}

impl VerdictSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot whose [`try_set`](Self::try_set) stops accepting verdicts at
    /// `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: Arc::default(),
            deadline: Some(deadline),
        }
    }

    /// Store `candidate` unless a verdict is already set or the deadline
    /// has passed.
    ///
    /// Returns `true` when this call's verdict was stored.
    pub fn try_set(&self, candidate: Verdict) -> bool {
        let mut guard = self.lock();
        if guard.is_some() {
            tracing::debug!(
                job_id = %candidate.job_id,
                discarded = ?candidate.status,
                "Verdict already decided, discarding later signal",
            );
            return false;
        }
        // Checked under the lock so a timeout settled by the wait loop and a
        // late signal cannot both see an empty slot.
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::debug!(
                job_id = %candidate.job_id,
                discarded = ?candidate.status,
                "Signal arrived after the deadline, discarding",
            );
            return false;
        }
        *guard = Some(candidate);
        true
    }

    /// Store `candidate` unless a verdict is already set, and return
    /// whichever verdict is now stored. Not subject to the deadline.
    pub fn settle(&self, candidate: Verdict) -> Verdict {
        let mut guard = self.lock();
        match guard.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                *guard = Some(candidate.clone());
                candidate
            }
        }
    }

    pub fn get(&self) -> Option<Verdict> {
        self.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.lock().is_some()
    }

    // Writes are a single assignment, so a poisoned lock still holds a whole value.
    fn lock(&self) -> MutexGuard<'_, Option<Verdict>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
