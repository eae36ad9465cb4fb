//! Studioflow wire contracts.
//!
//! This crate owns the types shared between the gateway service, the state-store
//! client, and the client operation monitor. It intentionally separates wire
//! shapes from service behavior: nothing in here talks to the network.

pub mod operation;
pub mod project;

pub use operation::{
    new_operation_id, looks_like_operation_id, CallbackAck, CompletionCallbackRequest,
    DurationBreakdown, OperationResult, OperationStatus, OperationStatusResponse,
    SubmitAcceptedResponse, SubmitChatRequest,
};
pub use project::{assets_fingerprint, Budget, ChatMessage, ProjectState, Role};
