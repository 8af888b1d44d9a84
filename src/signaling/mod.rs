//! WebSocket signaling relay: wire messages, connections, peer directory.

pub mod directory;
pub mod mediator;
pub mod message;
pub mod registry;
pub mod server;

pub use directory::PeerDirectory;
pub use mediator::{Outcome, SignalingMediator};
pub use message::{PeerMetadata, PeerStatus, SignalKind, SignalMessage};
pub use registry::ConnectionRegistry;
pub use server::SignalingServer;
