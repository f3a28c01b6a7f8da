use std::collections::BTreeSet;
use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Serialize, Serializer};
use solana_program::pubkey::Pubkey;

/// Owner and destination identities are fixed-width 32-byte keys.
pub type Address = Pubkey;

/// One opaque call argument.
pub type Word = [u8; 32];

/// Key of a row in the transaction store.
///
/// A proposal lives under `Pending(n)` while its submission is in flight. On
/// confirmation the row moves to `Chain(id)` with the id assigned on chain; on
/// rejection it moves to `Rejected(n)` so no row is left under the temporary key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TxId {
    Chain(u64),
    Pending(u64),
    Rejected(u64),
}

impl TxId {
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            TxId::Chain(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, TxId::Pending(_))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxId::Chain(id) => write!(f, "#{id}"),
            TxId::Pending(n) => write!(f, "pending-{n}"),
            TxId::Rejected(n) => write!(f, "rejected-{n}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FailureCause {
    /// The write was rejected by the chain or timed out.
    Rejected,
    /// The chain reported the transaction as failed.
    Chain,
    /// The row stopped appearing in chain snapshots.
    Vanished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Resolution {
    Open,
    Executed,
    Failed(FailureCause),
}

impl Resolution {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Resolution::Open)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TxStatus {
    Proposed,
    Approved,
    Executed,
    Failed,
}

impl TxStatus {
    /// Status is a pure function of the approval count, the wallet quorum and
    /// how the transaction was resolved. A zero quorum means the wallet config
    /// has not been read yet, so nothing reads as Approved.
    pub fn derive(approvals: usize, required_approvals: u32, resolution: Resolution) -> Self {
        match resolution {
            Resolution::Executed => TxStatus::Executed,
            Resolution::Failed(_) => TxStatus::Failed,
            Resolution::Open => {
                if required_approvals > 0 && approvals >= required_approvals as usize {
                    TxStatus::Approved
                } else {
                    TxStatus::Proposed
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TxId,
    #[serde(serialize_with = "as_base58")]
    pub proposer: Address,
    #[serde(serialize_with = "as_base58")]
    pub to: Address,
    #[serde(serialize_with = "as_decimal")]
    pub value: u128,
    #[serde(serialize_with = "as_hex_words")]
    pub payload: Vec<Word>,
    #[serde(serialize_with = "as_base58_set")]
    pub approvals: BTreeSet<Address>,
    pub proposed_at: u64,
    pub resolution: Resolution,
    pub(crate) status: TxStatus,
}

impl Transaction {
    pub fn new(
        id: TxId,
        proposer: Address,
        to: Address,
        value: u128,
        payload: Vec<Word>,
        proposed_at: u64,
    ) -> Self {
        Self {
            id,
            proposer,
            to,
            value,
            payload,
            approvals: BTreeSet::new(),
            proposed_at,
            resolution: Resolution::Open,
            status: TxStatus::Proposed,
        }
    }

    pub fn status(&self) -> TxStatus {
        self.status
    }

    pub fn approval_count(&self) -> usize {
        self.approvals.len()
    }

    pub fn has_approved(&self, owner: &Address) -> bool {
        self.approvals.contains(owner)
    }
}

/// A transaction exactly as the multi-sig program reports it.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub id: u64,
    pub proposer: Pubkey,
    pub to: Pubkey,
    pub value: u128,
    pub payload: Vec<Word>,
    pub approvals: Vec<Pubkey>,
    /// Unix seconds.
    pub proposed_at: u64,
    pub executed: bool,
    pub failed: bool,
}

impl ChainTransaction {
    pub fn resolution(&self) -> Resolution {
        if self.executed {
            Resolution::Executed
        } else if self.failed {
            Resolution::Failed(FailureCause::Chain)
        } else {
            Resolution::Open
        }
    }

    pub fn to_transaction(&self) -> Transaction {
        let mut tx = Transaction::new(
            TxId::Chain(self.id),
            self.proposer,
            self.to,
            self.value,
            self.payload.clone(),
            self.proposed_at,
        );
        tx.approvals = self.approvals.iter().copied().collect();
        tx.resolution = self.resolution();
        tx
    }
}

/// A read or write result tagged with the chain slot it reflects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observed<T> {
    pub slot: u64,
    pub value: T,
}

impl<T> Observed<T> {
    pub fn new(slot: u64, value: T) -> Self {
        Self { slot, value }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Observed<U> {
        Observed {
            slot: self.slot,
            value: f(self.value),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletConfig {
    pub owners: BTreeSet<Address>,
    pub required_approvals: u32,
    pub slot: u64,
}

impl WalletConfig {
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }
}

fn as_base58<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(address)
}

fn as_base58_set<S: Serializer>(
    addresses: &BTreeSet<Address>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(addresses.iter().map(|a| a.to_string()))
}

fn as_decimal<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn as_hex_words<S: Serializer>(words: &[Word], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(words.iter().map(|w| format!("0x{}", hex::encode(w))))
}
