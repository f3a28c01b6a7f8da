use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::pubkey::Pubkey;

use crate::state::{ChainTransaction, Word};

/// Requests understood by the multi-sig program's RPC endpoint.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum MultisigCall {
    /// Whether `address` is currently an owner.
    IsOwner { address: Pubkey },

    /// The full owner set.
    GetOwners,

    /// The wallet-wide quorum.
    GetRequiredApprovals,

    /// Propose a transaction. Replies with the id assigned on chain.
    SubmitTransaction {
        /// Signing owner.
        signer: Pubkey,
        to: Pubkey,
        value: u128,
        /// Call arguments, in order.
        payload: Vec<Word>,
    },

    /// Record `signer`'s approval of a transaction.
    ApproveTransaction { signer: Pubkey, tx_id: u64 },

    /// Read one transaction.
    GetTransaction { tx_id: u64 },

    /// Read every transaction known to the program.
    ListTransactions,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum MultisigReply {
    Owner(bool),
    Owners(Vec<Pubkey>),
    RequiredApprovals(u32),
    Submitted { tx_id: u64 },
    Approved,
    Transaction(Option<ChainTransaction>),
    Transactions(Vec<ChainTransaction>),
    /// The program refused the call.
    Rejected { code: u32, reason: String },
}

/// Every reply is stamped with the slot the endpoint answered at.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct SlotReply {
    pub slot: u64,
    pub reply: MultisigReply,
}

impl MultisigCall {
    pub fn name(&self) -> &'static str {
        match self {
            MultisigCall::IsOwner { .. } => "is_owner",
            MultisigCall::GetOwners => "get_owners",
            MultisigCall::GetRequiredApprovals => "get_required_approvals",
            MultisigCall::SubmitTransaction { .. } => "submit_transaction",
            MultisigCall::ApproveTransaction { .. } => "approve_transaction",
            MultisigCall::GetTransaction { .. } => "get_transaction",
            MultisigCall::ListTransactions => "list_transactions",
        }
    }
}
