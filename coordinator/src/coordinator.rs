use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult, ProxyError, ProxyResult};
use crate::proxy::ContractProxy;
use crate::session::WalletSession;
use crate::state::{Address, Transaction, TxId, Word};
use crate::store::{SharedStore, StoreEvent};
use crate::sync::load_config;
use crate::utils::{parse_address, parse_amount, unix_now};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApproveOutcome {
    /// The chain accepted the approval.
    Recorded,
    /// The approver was already counted; nothing was sent.
    AlreadyApproved,
}

/// Validates proposal and approval intents, applies them optimistically and
/// settles them once the chain answers.
pub struct ApprovalCoordinator<P> {
    proxy: Arc<P>,
    store: SharedStore,
    config: CoordinatorConfig,
    sync_trigger: Option<Arc<Notify>>,
    session_address: Mutex<Option<Address>>,
}

impl<P: ContractProxy> ApprovalCoordinator<P> {
    pub fn new(proxy: Arc<P>, store: SharedStore, config: CoordinatorConfig) -> Self {
        Self {
            proxy,
            store,
            config,
            sync_trigger: None,
            session_address: Mutex::new(None),
        }
    }

    /// Wakes the sync loop after every confirmed write.
    pub fn with_sync_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.sync_trigger = Some(trigger);
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn list(&self) -> Vec<Transaction> {
        self.store.list()
    }

    pub fn get(&self, id: &TxId) -> Option<Transaction> {
        self.store.get(id)
    }

    /// Proposes a transfer from the wallet. The row is visible immediately
    /// under a temporary id and moves to its chain id once submission confirms.
    pub async fn propose(
        &self,
        session: &WalletSession,
        to: &str,
        value: &str,
        payload: Vec<Word>,
    ) -> CoordinatorResult<TxId> {
        let proposer = session.signer()?;
        let to = parse_address(to)?;
        let value = parse_amount(value)?;
        self.ensure_config().await?;

        let optimistic = payload.clone();
        let (temp, epoch) = self.store.update(|store| {
            if !store.is_owner(&proposer) {
                return Err(CoordinatorError::NotOwner(proposer));
            }
            let temp = store.insert_optimistic(proposer, to, value, optimistic, unix_now());
            Ok((temp, store.epoch()))
        })?;
        debug!(id = %temp, %proposer, %to, value = %value, "proposal applied optimistically");

        match self
            .write(self.proxy.submit_transaction(proposer, to, value, payload))
            .await
        {
            Ok(observed) => {
                let confirmed = TxId::Chain(observed.value);
                self.store.update(|store| {
                    if store.epoch() == epoch {
                        store.confirm_proposal(temp, observed.value, observed.slot);
                    }
                });
                info!(id = %confirmed, slot = observed.slot, "proposal confirmed");
                self.nudge_sync();
                Ok(confirmed)
            }
            Err(err) => {
                let may_have_landed = matches!(err, ProxyError::Timeout(_));
                self.store.update(|store| {
                    if store.epoch() == epoch {
                        store.reject_proposal(temp, may_have_landed);
                    }
                });
                warn!(?err, id = %temp, "proposal rejected");
                Err(CoordinatorError::ChainRejected(err))
            }
        }
    }

    /// Approves a confirmed transaction as the session's signer. Approving
    /// twice is a no-op.
    pub async fn approve(&self, session: &WalletSession, id: TxId) -> CoordinatorResult<ApproveOutcome> {
        let approver = session.signer()?;
        self.ensure_config().await?;

        let (chain_id, epoch) = self.store.update(|store| {
            let chain_id = store.add_pending_approval(id, approver)?;
            Ok::<_, CoordinatorError>((chain_id, store.epoch()))
        })?;
        let Some(chain_id) = chain_id else {
            debug!(%id, %approver, "approval already counted");
            return Ok(ApproveOutcome::AlreadyApproved);
        };

        match self
            .write(self.proxy.approve_transaction(approver, chain_id))
            .await
        {
            Ok(observed) => {
                self.store.update(|store| {
                    if store.epoch() == epoch {
                        store.confirm_approval(id, approver, observed.slot);
                    }
                });
                info!(%id, %approver, slot = observed.slot, "approval confirmed");
                if let Err(err) = self.refresh(id).await {
                    warn!(?err, %id, "refresh after approval failed");
                }
                self.nudge_sync();
                Ok(ApproveOutcome::Recorded)
            }
            Err(err) => {
                self.store.update(|store| {
                    if store.epoch() == epoch {
                        store.rollback_approval(id, approver);
                    }
                });
                warn!(?err, %id, %approver, "approval rejected, rolled back");
                Err(CoordinatorError::ChainRejected(err))
            }
        }
    }

    /// Re-reads one transaction from the chain and merges it.
    pub async fn refresh(&self, id: TxId) -> CoordinatorResult<Option<Transaction>> {
        let chain_id = id.chain_id().ok_or(CoordinatorError::Unconfirmed(id))?;
        let epoch = self.store.read(|store| store.epoch());
        let observed = self.proxy.get_transaction(chain_id).await?;

        Ok(self.store.update(|store| {
            if store.epoch() == epoch {
                if let Some(chain) = &observed.value {
                    store.merge_transaction(observed.slot, chain);
                }
            }
            store.get(&id).cloned()
        }))
    }

    /// Asks the chain whether the session's signer is an owner right now. A
    /// newer answer that contradicts the cached owner set reloads the config.
    pub async fn owner_capability(&self, session: &WalletSession) -> CoordinatorResult<bool> {
        let address = session.signer()?;
        let observed = self.proxy.is_owner(address).await?;
        let (loaded, cached, cached_slot) = self.store.read(|store| {
            (
                store.config_loaded(),
                store.is_owner(&address),
                store.config().slot,
            )
        });

        if !loaded || (cached != observed.value && observed.slot > cached_slot) {
            debug!(%address, slot = observed.slot, cached_slot, "owner set out of date");
            self.refresh_config().await?;
        }
        Ok(observed.value)
    }

    /// Reloads owners and quorum. Fails with `SessionReset` if the store was
    /// cleared while the reads were in flight.
    pub async fn refresh_config(&self) -> CoordinatorResult<()> {
        let epoch = self.store.read(|store| store.epoch());
        let config = load_config(self.proxy.as_ref()).await?;
        self.store.update(|store| {
            if store.epoch() != epoch {
                return Err(CoordinatorError::SessionReset);
            }
            store.apply_config(config);
            Ok(())
        })
    }

    /// Tracks the wallet connector. Disconnecting, or switching to another
    /// signer, discards all local state.
    pub fn on_session_changed(&self, session: &WalletSession) {
        let next = session.is_connected.then_some(session.address);
        let previous = std::mem::replace(&mut *self.session_address.lock(), next);
        if previous.is_some() && previous != next {
            self.reset();
        }
    }

    pub fn reset(&self) {
        self.store.update(|store| store.clear());
        info!("session reset, local transaction state cleared");
    }

    async fn ensure_config(&self) -> CoordinatorResult<()> {
        if self.store.read(|store| store.config_loaded()) {
            return Ok(());
        }
        self.refresh_config().await
    }

    async fn write<T>(&self, call: impl Future<Output = ProxyResult<T>>) -> ProxyResult<T> {
        let timeout = self.config.write_timeout();
        match time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::Timeout(timeout)),
        }
    }

    fn nudge_sync(&self) {
        if let Some(trigger) = &self.sync_trigger {
            trigger.notify_one();
        }
    }
}
