//! ComfyUI REST and WebSocket client library.
//!
//! Provides workflow submission, typed stream message parsing, history
//! classification and the [`Watcher`](watcher::Watcher) that turns both
//! status sources into a single [`Verdict`](verdict::Verdict) per prompt.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod messages;
pub mod stream;
pub mod tracker;
pub mod verdict;
pub mod watcher;

pub use config::WatchConfig;
pub use error::WatchError;
pub use verdict::{Verdict, VerdictSource, VerdictStatus};
pub use watcher::{Job, Watcher};
