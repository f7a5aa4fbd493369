//! # hsn-server
//!
//! Infrastructure node for the HSN network. One process serves both roles:
//!
//! - **Rendezvous**: WebSocket endpoint where identities publish their
//!   reachability descriptor, query others and exchange direct-link
//!   signalling frames
//! - **Transit gateway**: TTL-bounded store-and-forward mailbox per recipient
//!   (`/upload`, `/poll`, `/delete`)
//!
//! Neither role keeps anything on disk.

pub mod api;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod rendezvous;
pub mod transit_store;

pub use api::{build_router, serve, serve_on, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
