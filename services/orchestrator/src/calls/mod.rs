//! Call lifecycle.
//!
//! [`machine`] holds the pure transition rules; [`CallService`] applies them
//! to stored calls one call at a time, dials outbound calls through the
//! gateway and reacts to room webhook events.

pub mod machine;
mod service;
mod webhook;

pub use machine::{TransferKind, TransitionError};
pub use service::{CallConfig, CallService, OutboundCall, OutboundCallRequest};
pub use webhook::WebhookOutcome;
