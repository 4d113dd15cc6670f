#![forbid(unsafe_code)]
//! A room based WebRTC signaling server.
//!
//! Browser peers connect over a websocket, receive a server issued id, join named
//! rooms to learn each other's ids, then exchange opaque `signal` frames addressed by
//! id. Peers that go quiet for longer than the liveness window are evicted.
mod args;
mod error;
mod registry;
mod rooms;
mod router;
mod server;
mod sweeper;
mod upgrade;

pub use args::Args;
pub use error::{DisconnectReason, Error, SignalingError};
pub use registry::{JoinOutcome, PeerRegistry, PEER_ID_LENGTH};
pub use rendezvous_protocol::{PeerEvent, PeerId, PeerRequest, RoomId};
pub use server::{health_handler, SignalingServer, SignalingServerBuilder, DEFAULT_BUFFER_SIZE};
pub use sweeper::LivenessPolicy;
