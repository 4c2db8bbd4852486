//! Bridge-level error type

use crate::backend::BackendError;
use crate::channels::TransportError;
use crate::store::StoreError;

/// Anything that can fail while handling one inbound message
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    #[error("persistence: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
