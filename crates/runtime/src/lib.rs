//! beacon-runtime: find a peer over a pub/sub bus, then drive it over a
//! correlated request/response channel.
//!
//! # Layers
//!
//! * [`correlation`]: id -> response map with timeout-bounded waits.
//! * [`transport`] and [`channel`]: the control connection and the
//!   [`ControlChannel`] that multiplexes commands over it.
//! * [`bus`] and [`rendezvous`]: the announce handshake that yields a peer
//!   address.
//! * [`session`]: the [`SessionDriver`] tying both halves together.

pub mod address;
pub mod bus;
pub mod channel;
pub mod config;
pub mod correlation;
pub mod devtools;
pub mod error;
pub mod rendezvous;
pub mod session;
pub mod transport;

pub use address::{AddressLookup, FixedAddress, UdpProbe};
pub use bus::{Bus, BusMessage, BusSubscription, LocalBus, NatsBus};
pub use channel::ControlChannel;
pub use config::{BeaconConfig, DiscoveryPolicy};
pub use correlation::CorrelationRegistry;
pub use error::{Error, Result};
pub use rendezvous::{RendezvousAgent, RendezvousConfig, RendezvousPhase, RendezvousState};
pub use session::{ReplyMode, SessionDriver, SessionReport};
pub use transport::{Transport, TransportParts, TransportReceiver, WebSocketTransport};
