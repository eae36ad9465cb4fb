//! Client-side completion monitor for long-running workflow operations.
//!
//! Tracks one asynchronous job from submission to resolution without any push
//! channel: phased status polling first, then database-fallback change
//! detection against a pre-operation baseline, with a hard monitoring ceiling
//! so the caller is never blocked indefinitely.

#![forbid(unsafe_code)]

pub mod baseline;
pub mod client;
pub mod machine;
pub mod monitor;
pub mod reconcile;
pub mod store;

pub use baseline::OperationBaseline;
pub use client::{StatusClient, StatusClientError};
pub use machine::{
    DatabaseObservation, Directive, MonitorConfig, MonitorMachine, MonitorOutcome, Phase,
    PollObservation, StatusSnapshot,
};
pub use monitor::{Clock, NoStateSource, OperationMonitor, StateSource, StatusSource, SystemClock};
pub use reconcile::{merge_histories, merge_project_state, RECENT_USER_MESSAGE_WINDOW_SECONDS};
pub use store::ProjectStore;
