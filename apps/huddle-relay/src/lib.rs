//! Huddle signaling relay: tracks room membership and forwards negotiation
//! messages between connections. No media ever passes through it.

pub mod config;
pub mod router;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod websocket;

pub use router::{MessageRouter, Outbound, RelayStats};
pub use store::{Departure, InMemoryRoomStore, JoinOutcome, RoomSnapshot, RoomStore};
