//! Wire types for the beacon protocols.
//!
//! Two independent protocols share this crate:
//!
//! * The **rendezvous** protocol ([`announce`]): JSON messages exchanged over a
//!   publish/subscribe bus so a controller can learn the current address of a
//!   peer identified by a shared token.
//! * The **control** protocol ([`envelope`], [`command`]): JSON request/response
//!   envelopes carried over one long-lived WebSocket, correlated by integer id.
//!
//! Types in this crate are pure data. Correlation, transports and timeouts
//! live in `beacon-runtime`.

pub mod announce;
pub mod command;
pub mod envelope;

pub use announce::*;
pub use command::*;
pub use envelope::*;
