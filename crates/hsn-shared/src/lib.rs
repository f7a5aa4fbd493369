//! # hsn-shared
//!
//! Types and primitives shared by every HSN crate: the canonical JSON form
//! that feeds hashing and signing, device identity keys, the signed state
//! transition (STA) model, reachability descriptors and the discovery wire
//! protocol.

pub mod canonical;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod sta;
pub mod types;

pub use canonical::canonicalize;
pub use error::{CanonicalError, HsnError, IdentityError};
pub use identity::{Identity, PublicJwk};
pub use protocol::{Hrd, Reachability, StoredEnvelope, TransitEnvelope};
pub use sta::{ChatAppend, Payload, Sta};
pub use types::{ChainId, Fingerprint};
