//! Typed resource ids for callhub.
//!
//! Every id renders as `{prefix}_{ulid}`, for example
//! `call_01HV4Z4NYPLTRS0JTUA8XDME5F` or `agt_01HV4Z3MXNKPQR9HSTZ7WCLD4E`.
//! Parsing is strict: the prefix must match the type, so an agent id is
//! rejected where a call id is expected.
//!
//! Room names embed call ids (`sip-call-call_01HV...`) and are parsed back
//! by suffix, so the rendered form must survive external systems unchanged.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use macros::parse_prefixed;
pub use types::*;

pub use ulid::Ulid;
