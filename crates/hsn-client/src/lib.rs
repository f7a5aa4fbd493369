//! # hsn-client
//!
//! The client side of an HSN node: configuration, the delivery orchestrator
//! that turns outgoing messages into signed, chained and delivered
//! transitions, and the node wiring used by the `hsn` binary.

pub mod config;
pub mod delivery;
pub mod error;
pub mod node;

pub use config::ClientConfig;
pub use delivery::{DeliveryError, DeliveryOrchestrator, DeliveryStatus, RetryReport, Submission};
pub use error::{ClientError, Result};
pub use node::Node;
