//! Background consumer of a ComfyUI event stream.
//!
//! [`StreamWorker::spawn`] moves a live connection onto its own task. The
//! task reads frames, parses them into [`StreamEvent`](crate::messages::StreamEvent)s,
//! folds them through a [`StreamTracker`] and writes the resulting verdict
//! into the shared [`VerdictSlot`]. The wait loop never touches the socket.

use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;
use crate::client::{ComfyUIConnection, ComfyUIStream};
use crate::history::{self, SnapshotState};
use crate::messages::{parse_message, StreamEvent};
use crate::tracker::{StreamSignal, StreamTracker};
use crate::verdict::{Verdict, VerdictSlot, VerdictSource};

/// Handle to a running stream consumer.
///
/// Dropping the handle cancels the task; [`close`](Self::close) also waits
/// for it to release the connection.
pub struct StreamWorker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl StreamWorker {
    /// Start consuming `conn` for `prompt_id`.
    ///
    /// `api` is used for one fresh history read when the stream confirms
    /// completion, since completion events carry no outputs.
    pub fn spawn(
        conn: ComfyUIConnection,
        prompt_id: String,
        api: ComfyUIApi,
        slot: VerdictSlot,
        drain_grace: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let client_id = conn.client_id;
        let ws_stream = conn.ws_stream;

        let handle = tokio::spawn(async move {
            tracing::debug!(prompt_id = %prompt_id, client_id = %client_id, "Stream worker started");
            let worker = WorkerTask {
                tracker: StreamTracker::new(prompt_id.clone()),
                api,
                slot,
                drain_grace,
                cancel: task_cancel,
            };
            worker.run(ws_stream).await;
            tracing::debug!(prompt_id = %prompt_id, "Stream worker exited");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// True once the task has returned (stream closed, verdict written,
    /// or cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the task and wait for it to close its connection.
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Stream worker ended abnormally");
            }
        }
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct WorkerTask {
    tracker: StreamTracker,
    api: ComfyUIApi,
    slot: VerdictSlot,
    drain_grace: Duration,
    cancel: CancellationToken,
}

impl WorkerTask {
    /// Read frames until a verdict is written, the stream ends, or the
    /// task is cancelled. Always closes the socket on the way out.
    async fn run(mut self, mut ws_stream: ComfyUIStream) {
        let mut drain_deadline: Option<Instant> = None;

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(prompt_id = %self.tracker.prompt_id(), "Stream worker cancelled");
                    break;
                }
                _ = wait_until(drain_deadline) => {
                    tracing::info!(
                        prompt_id = %self.tracker.prompt_id(),
                        "Queue drained without a completion event, assuming completed",
                    );
                    self.commit_completed(true).await;
                    break;
                }
                frame = ws_stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    let signal = match parse_message(&text) {
                        Ok(event) => {
                            if let StreamEvent::Progress(progress) = &event {
                                if progress.prompt_id.as_deref() == Some(self.tracker.prompt_id()) {
                                    tracing::debug!(
                                        prompt_id = %self.tracker.prompt_id(),
                                        node = ?progress.node,
                                        percent = progress.percent(),
                                        "Execution progress",
                                    );
                                }
                            }
                            self.tracker.observe(&event)
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
                            None
                        }
                    };
                    match signal {
                        Some(StreamSignal::Completed) => {
                            tracing::info!(prompt_id = %self.tracker.prompt_id(), "Execution completed (all nodes done)");
                            self.commit_completed(false).await;
                            break;
                        }
                        Some(StreamSignal::Failed(error)) => {
                            tracing::error!(prompt_id = %self.tracker.prompt_id(), error = %error, "Execution error");
                            self.slot.try_set(Verdict::failed(
                                self.tracker.prompt_id(),
                                VerdictSource::Stream,
                                error,
                            ));
                            break;
                        }
                        Some(StreamSignal::QueueDrained) => {
                            tracing::debug!(
                                prompt_id = %self.tracker.prompt_id(),
                                grace_ms = self.drain_grace.as_millis() as u64,
                                "Queue empty, waiting for an authoritative signal",
                            );
                            drain_deadline = Some(Instant::now() + self.drain_grace);
                        }
                        None => {}
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    // Preview images.
                    tracing::trace!("Ignoring binary message");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "ComfyUI WebSocket closed");
                    break;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::info!("WebSocket stream exhausted");
                    break;
                }
            }
        }

        if let Err(e) = ws_stream.close(None).await {
            tracing::trace!(error = %e, "WebSocket close after shutdown");
        }
    }

    /// Write a stream-sourced completion, merging outputs from a fresh
    /// history read when one is available.
    ///
    /// After a queue drain (`drained`), a history record that classifies as
    /// failed overrides the assumed completion.
    async fn commit_completed(&self, drained: bool) {
        let prompt_id = self.tracker.prompt_id();
        let snapshot = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.api.get_history(prompt_id) => match result {
                Ok(payload) => Some(history::classify(prompt_id, &payload)),
                Err(e) => {
                    tracing::warn!(prompt_id = %prompt_id, error = %e, "Could not fetch outputs after completion");
                    None
                }
            },
        };

        let verdict = match snapshot {
            Some(snap) if drained && snap.state == SnapshotState::Failed => Verdict::failed(
                prompt_id,
                VerdictSource::Stream,
                snap.error.unwrap_or_else(|| "execution failed".to_string()),
            ),
            Some(snap) => Verdict::completed(prompt_id, VerdictSource::Stream, snap.outputs),
            None => Verdict::completed(prompt_id, VerdictSource::Stream, None),
        };
        self.slot.try_set(verdict);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
