//! callhub orchestrator library.
//!
//! Supervises voice-agent worker processes, scales them against call load,
//! routes voice-session jobs to agents and drives call records through
//! their lifecycle. The `orchestrator` binary wires these together behind
//! an HTTP API; the library surface exists for integration testing.

pub mod api;
pub mod calls;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod routing;
pub mod scaling;
pub mod state;
pub mod stats;
pub mod store;
pub mod supervisor;
