#![warn(missing_docs)]
//! Headless multiplayer client.
//!
//! [`Session`] is the protocol state machine and performs no I/O. [`Client`]
//! drives a session over a UDP socket on the tokio runtime and publishes
//! [`ClientEvent`]s on a channel.

mod client;
mod config;
mod error;
mod events;
pub mod pacing;
pub mod segments;
mod session;

pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::ClientEvent;
pub use pacing::{TickPacer, MAX_TICK_CLOSURES_PER_HEARTBEAT, MAX_TICK_CLOSURES_PER_SERVER_TICK};
pub use segments::SegmentBuffer;
pub use session::Session;
