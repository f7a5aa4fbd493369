use hsn_net::NetError;
use hsn_store::StoreError;
use thiserror::Error;

use crate::delivery::DeliveryError;

/// Failures of node setup and of the explicit maintenance commands. Message
/// submission never surfaces these; see [`crate::delivery`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
