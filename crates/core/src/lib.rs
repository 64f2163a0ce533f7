//! Shared types for the comfyrest workspace.
//!
//! Holds the job/node identifier aliases, the domain error type and the
//! execution-ready workflow graph validator used before submission.

pub mod error;
pub mod types;
pub mod workflow;
