use std::time::Duration;

use thiserror::Error;

use crate::state::{Address, TxId};

/// Failures reported by a [`ContractProxy`](crate::proxy::ContractProxy) call.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Contract rejected call (code {code}): {reason}")]
    Rejected { code: u32, reason: String },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed reply: {0}")]
    Decode(String),

    #[error("Codec error")]
    Codec(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("No connected signer")]
    NoSession,

    #[error("{0} is not a wallet owner")]
    NotOwner(Address),

    #[error("Transaction {0} not found")]
    NotFound(TxId),

    #[error("Transaction {0} already executed")]
    AlreadyExecuted(TxId),

    #[error("Transaction {0} has failed")]
    TransactionFailed(TxId),

    #[error("Transaction {0} is not yet confirmed on chain")]
    Unconfirmed(TxId),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Chain rejected the call")]
    ChainRejected(#[from] ProxyError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session was reset while the request was in flight")]
    SessionReset,
}

impl CoordinatorError {
    /// Deterministic errors detected from local state before any network call.
    /// Resubmitting the same intent against the same state fails the same way.
    pub fn is_local(&self) -> bool {
        !matches!(
            self,
            CoordinatorError::ChainRejected(_) | CoordinatorError::SessionReset
        )
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
pub type ProxyResult<T> = Result<T, ProxyError>;
