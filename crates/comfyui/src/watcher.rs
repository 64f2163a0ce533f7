//! Submission and completion arbitration for a single ComfyUI server.
//!
//! [`Watcher::wait`] reconciles two status sources into one [`Verdict`]:
//!
//! * the event stream, consumed by a [`StreamWorker`] on its own task,
//!   preferred when `prefer_stream` is set and the connection succeeds;
//! * the `/history` poll loop, used when the stream is unavailable or
//!   drops before a verdict.
//!
//! Only one source runs at a time. Both write into the same
//! [`VerdictSlot`], so whichever reaches a terminal state first wins, and
//! the overall timeout always ends the wait with `timed_out`.

use std::collections::HashMap;
use std::time::Duration;

use comfyrest_core::types::{JobId, Timestamp};
use comfyrest_core::workflow::WorkflowGraph;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::history::{self, SnapshotState, StatusSnapshot};
use crate::stream::StreamWorker;
use crate::verdict::{Verdict, VerdictSlot, VerdictSource, VerdictStatus};

/// Budget substituted when `now + timeout` overflows the clock.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// A submitted workflow execution.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    /// Session ID the prompt was submitted under; its stream events are
    /// only delivered to a connection using the same ID.
    pub client_id: String,
    pub submitted_at: Timestamp,
    /// Wait budget taken from the watcher's configuration.
    pub timeout: Duration,
    /// Queue position reported at submission.
    pub queue_number: Option<i64>,
}

/// How a stream-mode wait ended.
enum StreamOutcome {
    /// The slot holds a verdict (from the worker or the timeout).
    Decided(Verdict),
    /// The worker exited without a verdict.
    Dropped,
}

/// Submits workflows to one ComfyUI server and waits for their verdicts.
///
/// Every submission gets a fresh session client ID, remembered until its
/// wait reaches a verdict. The event stream for a job connects with that
/// ID, so concurrent waits on one watcher never share a socket identity.
pub struct Watcher {
    api: ComfyUIApi,
    client: ComfyUIClient,
    config: WatchConfig,
    sessions: RwLock<HashMap<JobId, String>>,
}

impl Watcher {
    pub fn new(config: WatchConfig) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(WatchError::HttpClient)?;

        Ok(Self {
            api: ComfyUIApi::with_client(http, config.api_url.clone()),
            client: ComfyUIClient::new(config.ws_url.clone()),
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Validate and submit an execution-ready workflow under a new session.
    pub async fn submit(&self, workflow: &serde_json::Value) -> Result<Job, WatchError> {
        let graph = WorkflowGraph::parse(workflow)?;
        let client_id = new_session_id();
        let response = self.api.submit_workflow(workflow, &client_id).await?;

        tracing::info!(
            job_id = %response.prompt_id,
            client_id = %client_id,
            nodes = graph.len(),
            queue_number = ?response.number,
            "Workflow submitted to ComfyUI",
        );

        self.sessions
            .write()
            .await
            .insert(response.prompt_id.clone(), client_id.clone());

        Ok(Job {
            job_id: response.prompt_id,
            client_id,
            submitted_at: chrono::Utc::now(),
            timeout: self.config.timeout,
            queue_number: response.number,
        })
    }

    /// Read and classify the current history record for `job_id`.
    ///
    /// Transport and parse failures are returned as-is; nothing is retried.
    pub async fn poll(&self, job_id: &str) -> Result<StatusSnapshot, WatchError> {
        let payload = self.api.get_history(job_id).await?;
        let snapshot = history::classify(job_id, &payload);
        if snapshot.heuristic {
            tracing::warn!(
                job_id = %job_id,
                "History record has no completion flag, outputs or error; assuming completed",
            );
        }
        Ok(snapshot)
    }

    /// Submit `workflow` and wait for its verdict.
    pub async fn run(
        &self,
        workflow: &serde_json::Value,
        timeout: Duration,
        prefer_stream: bool,
    ) -> Result<Verdict, WatchError> {
        let job = self.submit(workflow).await?;
        Ok(self.wait(&job.job_id, timeout, prefer_stream).await)
    }

    /// Wait until `job_id` completes, fails, or `timeout` elapses.
    ///
    /// Always returns a verdict; transient transport errors during the wait
    /// are logged and the wait continues until the timeout. The stream
    /// connects with the job's submission session, or with a fresh one for
    /// jobs this watcher did not submit.
    pub async fn wait(&self, job_id: &str, timeout: Duration, prefer_stream: bool) -> Verdict {
        let deadline = deadline_after(timeout);
        let slot = VerdictSlot::with_deadline(deadline);

        let verdict = if prefer_stream {
            let client_id = self.session_for(job_id).await;
            match self
                .wait_on_stream(job_id, &client_id, &slot, deadline, timeout)
                .await
            {
                Ok(StreamOutcome::Decided(verdict)) => Some(self.finish(&slot, verdict)),
                Ok(StreamOutcome::Dropped) => {
                    tracing::info!(
                        job_id = %job_id,
                        "Event stream closed before a verdict, continuing with history polling",
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        error = %e,
                        "Event stream unavailable, falling back to history polling",
                    );
                    None
                }
            }
        } else {
            None
        };

        let verdict = match verdict {
            Some(verdict) => verdict,
            None => self.wait_on_poll(job_id, &slot, deadline, timeout).await,
        };

        // A timed-out job may still finish; keep its session for another wait.
        if verdict.status != VerdictStatus::TimedOut {
            self.sessions.write().await.remove(job_id);
        }
        verdict
    }

    // ---- private helpers ----

    /// Submission session for `job_id`, or a fresh one.
    async fn session_for(&self, job_id: &str) -> String {
        if let Some(client_id) = self.sessions.read().await.get(job_id) {
            return client_id.clone();
        }
        new_session_id()
    }

    /// Stream mode: connect, hand the socket to a worker, and watch the
    /// slot until the deadline passes, it is set, or the worker exits.
    ///
    /// The deadline is checked first. The slot refuses worker writes from
    /// the deadline on, so a verdict found there was decided in time.
    async fn wait_on_stream(
        &self,
        job_id: &str,
        client_id: &str,
        slot: &VerdictSlot,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<StreamOutcome, WatchError> {
        let connect_budget = self
            .config
            .request_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let conn = tokio::time::timeout(connect_budget, self.client.connect(client_id))
            .await
            .map_err(|_| {
                ComfyUIClientError::Timeout(self.client.ws_url().to_string())
            })??;

        let mut worker = StreamWorker::spawn(
            conn,
            job_id.to_string(),
            self.api.clone(),
            slot.clone(),
            self.config.queue_drain_grace,
        );

        let outcome = loop {
            let now = Instant::now();
            if now >= deadline {
                break StreamOutcome::Decided(slot.settle(Verdict::timed_out(job_id, timeout, None)));
            }
            if let Some(verdict) = slot.get() {
                break StreamOutcome::Decided(verdict);
            }
            if worker.is_finished() {
                // The worker may have written the slot just before exiting.
                break match slot.get() {
                    Some(verdict) => StreamOutcome::Decided(verdict),
                    None => StreamOutcome::Dropped,
                };
            }
            let pause = self
                .config
                .stream_check_interval
                .min(deadline.saturating_duration_since(now));
            tokio::time::sleep(pause).await;
        };

        worker.close().await;
        Ok(outcome)
    }

    /// Poll mode: query history every `poll_interval` until a terminal
    /// snapshot or the deadline.
    async fn wait_on_poll(
        &self,
        job_id: &str,
        slot: &VerdictSlot,
        deadline: Instant,
        timeout: Duration,
    ) -> Verdict {
        let mut last_error: Option<String> = None;
        let mut attempt = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.finish(slot, Verdict::timed_out(job_id, timeout, last_error));
            }

            attempt += 1;
            match tokio::time::timeout(remaining, self.poll(job_id)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt,
                        error = %e,
                        "History poll failed, continuing to wait",
                    );
                    last_error = Some(e.to_string());
                }
                Ok(Ok(snapshot)) => match snapshot.state {
                    SnapshotState::Pending => {
                        tracing::debug!(job_id = %job_id, attempt, "Job still pending");
                    }
                    SnapshotState::Completed => {
                        return self.finish(
                            slot,
                            Verdict::completed(job_id, VerdictSource::Poll, snapshot.outputs),
                        );
                    }
                    SnapshotState::Failed => {
                        let error = snapshot
                            .error
                            .unwrap_or_else(|| "execution failed".to_string());
                        return self.finish(
                            slot,
                            Verdict::failed(job_id, VerdictSource::Poll, error),
                        );
                    }
                },
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;
        }
    }

    /// Settle `candidate` into the slot and log the verdict that won.
    fn finish(&self, slot: &VerdictSlot, candidate: Verdict) -> Verdict {
        let verdict = slot.settle(candidate);
        tracing::info!(
            job_id = %verdict.job_id,
            status = ?verdict.status,
            source = ?verdict.source,
            "Verdict reached",
        );
        verdict
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `now + timeout`, saturating to a far-future instant instead of
/// overflowing the clock.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + UNBOUNDED_WAIT)
}
