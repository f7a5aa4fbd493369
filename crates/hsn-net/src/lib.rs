//! # hsn-net
//!
//! Transport layer for HSN nodes:
//! - [`discovery`]: WebSocket links to rendezvous nodes (HRD publish/query,
//!   signal relay)
//! - [`direct`]: WebRTC data-channel delivery negotiated over discovery
//! - [`fallback`]: HTTP transit gateway upload and inbound polling

pub mod direct;
pub mod discovery;
pub mod error;
pub mod fallback;
pub mod transport;

pub use direct::{DirectConfig, DirectTransport};
pub use discovery::{DiscoveryClient, DiscoveryConfig};
pub use error::NetError;
pub use fallback::{FallbackTransport, PollReport};
pub use transport::{Discovery, Inbound, IncomingSignal, Signaling, Transport};
