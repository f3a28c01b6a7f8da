//! Client-side coordinator for a multi-signature wallet.
//!
//! Owners propose and approve transactions through an [`ApprovalCoordinator`],
//! which applies each intent optimistically to a [`SharedStore`] and settles it
//! against the on-chain program behind a [`ContractProxy`]. A [`SyncScheduler`]
//! keeps the store reconciled with chain state.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod instruction;
pub mod proxy;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
pub mod utils;


pub use config::CoordinatorConfig;
pub use coordinator::{ApprovalCoordinator, ApproveOutcome};
pub use error::{CoordinatorError, CoordinatorResult, ProxyError, ProxyResult};
pub use proxy::{ContractProxy, RpcContractProxy, Transport};
pub use session::WalletSession;
pub use state::{
    Address, ChainTransaction, FailureCause, Observed, Resolution, Transaction, TxId, TxStatus,
    WalletConfig, Word,
};
pub use store::{SharedStore, StoreEvent, TransactionStore};
pub use sync::{SyncHandle, SyncReport, SyncScheduler};
