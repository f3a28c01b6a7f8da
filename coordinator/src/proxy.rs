use std::future::Future;

use borsh::BorshDeserialize;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::instruction::{MultisigCall, MultisigReply, SlotReply};
use crate::state::{Address, ChainTransaction, Observed, Word};

/// Typed surface of the on-chain multi-sig program.
///
/// Every call is a network round trip and every answer is stamped with the
/// slot it was observed at.
pub trait ContractProxy: Send + Sync {
    fn is_owner(&self, address: Address) -> impl Future<Output = ProxyResult<Observed<bool>>> + Send;

    fn get_owners(&self) -> impl Future<Output = ProxyResult<Observed<Vec<Address>>>> + Send;

    fn get_required_approvals(&self) -> impl Future<Output = ProxyResult<Observed<u32>>> + Send;

    fn submit_transaction(
        &self,
        signer: Address,
        to: Address,
        value: u128,
        payload: Vec<Word>,
    ) -> impl Future<Output = ProxyResult<Observed<u64>>> + Send;

    fn approve_transaction(
        &self,
        signer: Address,
        tx_id: u64,
    ) -> impl Future<Output = ProxyResult<Observed<()>>> + Send;

    fn get_transaction(
        &self,
        tx_id: u64,
    ) -> impl Future<Output = ProxyResult<Observed<Option<ChainTransaction>>>> + Send;

    fn list_transactions(
        &self,
    ) -> impl Future<Output = ProxyResult<Observed<Vec<ChainTransaction>>>> + Send;
}

/// Moves encoded requests to the program endpoint and back.
pub trait Transport: Send + Sync {
    fn call(&self, request: Vec<u8>) -> impl Future<Output = ProxyResult<Vec<u8>>> + Send;
}

/// [`ContractProxy`] speaking borsh-encoded [`MultisigCall`]s over a [`Transport`].
pub struct RpcContractProxy<T> {
    transport: T,
}

impl<T: Transport> RpcContractProxy<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn invoke(&self, call: MultisigCall) -> ProxyResult<Observed<MultisigReply>> {
        let name = call.name();
        let request = borsh::to_vec(&call)?;
        let response = self.transport.call(request).await?;
        let SlotReply { slot, reply } = SlotReply::try_from_slice(&response)?;
        debug!(call = name, slot, "contract reply");

        match reply {
            MultisigReply::Rejected { code, reason } => Err(ProxyError::Rejected { code, reason }),
            reply => Ok(Observed::new(slot, reply)),
        }
    }
}

fn unexpected(call: &str, reply: &MultisigReply) -> ProxyError {
    ProxyError::Decode(format!("unexpected reply to {call}: {reply:?}"))
}

impl<T: Transport> ContractProxy for RpcContractProxy<T> {
    async fn is_owner(&self, address: Address) -> ProxyResult<Observed<bool>> {
        let observed = self.invoke(MultisigCall::IsOwner { address }).await?;
        match observed.value {
            MultisigReply::Owner(res) => Ok(Observed::new(observed.slot, res)),
            ref other => Err(unexpected("is_owner", other)),
        }
    }

    async fn get_owners(&self) -> ProxyResult<Observed<Vec<Address>>> {
        let observed = self.invoke(MultisigCall::GetOwners).await?;
        match observed.value {
            MultisigReply::Owners(owners) => Ok(Observed::new(observed.slot, owners)),
            ref other => Err(unexpected("get_owners", other)),
        }
    }

    async fn get_required_approvals(&self) -> ProxyResult<Observed<u32>> {
        let observed = self.invoke(MultisigCall::GetRequiredApprovals).await?;
        match observed.value {
            MultisigReply::RequiredApprovals(0) => {
                Err(ProxyError::Decode("quorum of zero approvals".to_string()))
            }
            MultisigReply::RequiredApprovals(n) => Ok(Observed::new(observed.slot, n)),
            ref other => Err(unexpected("get_required_approvals", other)),
        }
    }

    async fn submit_transaction(
        &self,
        signer: Address,
        to: Address,
        value: u128,
        payload: Vec<Word>,
    ) -> ProxyResult<Observed<u64>> {
        let call = MultisigCall::SubmitTransaction {
            signer,
            to,
            value,
            payload,
        };
        let observed = self.invoke(call).await?;
        match observed.value {
            MultisigReply::Submitted { tx_id } => Ok(Observed::new(observed.slot, tx_id)),
            ref other => Err(unexpected("submit_transaction", other)),
        }
    }

    async fn approve_transaction(&self, signer: Address, tx_id: u64) -> ProxyResult<Observed<()>> {
        let observed = self
            .invoke(MultisigCall::ApproveTransaction { signer, tx_id })
            .await?;
        match observed.value {
            MultisigReply::Approved => Ok(Observed::new(observed.slot, ())),
            ref other => Err(unexpected("approve_transaction", other)),
        }
    }

    async fn get_transaction(&self, tx_id: u64) -> ProxyResult<Observed<Option<ChainTransaction>>> {
        let observed = self.invoke(MultisigCall::GetTransaction { tx_id }).await?;
        match observed.value {
            MultisigReply::Transaction(tx) => Ok(Observed::new(observed.slot, tx)),
            ref other => Err(unexpected("get_transaction", other)),
        }
    }

    async fn list_transactions(&self) -> ProxyResult<Observed<Vec<ChainTransaction>>> {
        let observed = self.invoke(MultisigCall::ListTransactions).await?;
        match observed.value {
            MultisigReply::Transactions(txs) => Ok(Observed::new(observed.slot, txs)),
            ref other => Err(unexpected("list_transactions", other)),
        }
    }
}
