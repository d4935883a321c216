//! Job routing.
//!
//! Every voice-session job names its room; the room's metadata names the
//! agent that should take it. The router binds the room to that agent,
//! tracks who is in the room and completes the room's calls once only the
//! agent is left.

mod metadata;
mod router;
mod table;

pub use metadata::RoutingMetadata;
pub use router::{JobRequest, JobRouter, RoomActivity, RouteOutcome};
pub use table::{RouteStatus, RoutingEntry, RoutingStats, RoutingTable};
