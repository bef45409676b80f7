//! Top-level error type composing each module's error enum.

use crate::blockchain::BlockchainError;
use crate::messaging::MessagingError;
use crate::saga::SagaError;
use crate::store::StoreError;

/// Crate-wide result alias used at binary entry points and cross-module call sites.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Composition of every module boundary's typed error, surfaced at binary entry points.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("admin api error: {0}")]
    Admin(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} support was not compiled into this binary")]
    FeatureNotCompiled(&'static str),
}
