use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::state::{
    Address, ChainTransaction, FailureCause, Observed, Resolution, Transaction, TxId, TxStatus,
    WalletConfig, Word,
};

/// Published after every store mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    Upserted(TxId),
    Replaced { from: TxId, to: TxId },
    RolledBack(TxId),
    ConfigChanged,
    Cleared,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merged: usize,
    pub vanished: usize,
    pub stale: bool,
}

/// One row plus the bookkeeping needed to reconcile it.
///
/// Visible approvals are `confirmed ∪ landed ∪ pending`:
/// - `confirmed` is what the last merged chain read reported,
/// - `landed` holds approvals our own writes confirmed at a slot no merged read
///   has caught up with yet,
/// - `pending` holds approvals whose write is still in flight.
#[derive(Clone, Debug)]
struct Entry {
    tx: Transaction,
    confirmed: BTreeSet<Address>,
    landed: BTreeMap<Address, u64>,
    pending: BTreeSet<Address>,
    observed_slot: Option<u64>,
    confirmed_slot: u64,
    in_flight: bool,
    /// The submit timed out, so the chain may still hold this proposal.
    may_have_landed: bool,
    misses: u32,
}

impl Entry {
    fn new(tx: Transaction) -> Self {
        Self {
            confirmed: tx.approvals.clone(),
            tx,
            landed: BTreeMap::new(),
            pending: BTreeSet::new(),
            observed_slot: None,
            confirmed_slot: 0,
            in_flight: false,
            may_have_landed: false,
            misses: 0,
        }
    }

    fn refresh(&mut self, required_approvals: u32) {
        let mut approvals = self.confirmed.clone();
        approvals.extend(self.landed.keys().copied());
        approvals.extend(self.pending.iter().copied());
        self.tx.approvals = approvals;
        self.tx.status = TxStatus::derive(
            self.tx.approvals.len(),
            required_approvals,
            self.tx.resolution,
        );
    }

    fn settle(&mut self, resolution: Resolution) {
        self.tx.resolution = resolution;
        if resolution.is_terminal() {
            self.pending.clear();
            self.landed.clear();
        }
    }

    /// Terminal rows ignore chain reads, except rows we inferred to have
    /// vanished: the chain showing them again overrides the inference.
    fn accepts_chain_reads(&self) -> bool {
        matches!(
            self.tx.resolution,
            Resolution::Open | Resolution::Failed(FailureCause::Vanished)
        )
    }
}

/// In-memory cache of the wallet's transactions and configuration.
#[derive(Debug, Default)]
pub struct TransactionStore {
    entries: BTreeMap<TxId, Entry>,
    config: WalletConfig,
    config_loaded: bool,
    last_snapshot_slot: Option<u64>,
    next_local: u64,
    epoch: u64,
    journaling: bool,
    journal: Vec<StoreEvent>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that records its events for a [`SharedStore`] to publish.
    fn journaled() -> Self {
        Self {
            journaling: true,
            ..Self::default()
        }
    }

    pub fn get(&self, id: &TxId) -> Option<&Transaction> {
        self.entries.get(id).map(|entry| &entry.tx)
    }

    /// Most recently proposed first; equal timestamps order by id, highest first.
    pub fn list(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> = self.entries.values().map(|e| e.tx.clone()).collect();
        txs.sort_by(|a, b| {
            b.proposed_at
                .cmp(&a.proposed_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        txs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn config_loaded(&self) -> bool {
        self.config_loaded
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.config.is_owner(address)
    }

    /// Bumped by every [`clear`](Self::clear). Writes issued under an older
    /// epoch must not touch the store.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn upsert(&mut self, tx: Transaction) {
        let id = tx.id;
        let mut entry = Entry::new(tx);
        entry.refresh(self.config.required_approvals);
        self.entries.insert(id, entry);
        self.emit(StoreEvent::Upserted(id));
    }

    pub fn set_owners(&mut self, owners: impl IntoIterator<Item = Address>, required_approvals: u32) {
        self.config.owners = owners.into_iter().collect();
        self.config.required_approvals = required_approvals;
        self.config_loaded = true;
        for entry in self.entries.values_mut() {
            entry.refresh(required_approvals);
        }
        self.emit(StoreEvent::ConfigChanged);
    }

    /// Applies a configuration read unless it is older than the cached one.
    pub fn apply_config(&mut self, config: WalletConfig) -> bool {
        if self.config_loaded && config.slot < self.config.slot {
            debug!(slot = config.slot, cached = self.config.slot, "stale config ignored");
            return false;
        }
        if self.config_loaded
            && config.owners == self.config.owners
            && config.required_approvals == self.config.required_approvals
        {
            self.config.slot = config.slot;
            return false;
        }
        let WalletConfig {
            owners,
            required_approvals,
            slot,
        } = config;
        self.set_owners(owners, required_approvals);
        self.config.slot = slot;
        true
    }

    /// Inserts a proposal under a fresh temporary id.
    pub fn insert_optimistic(
        &mut self,
        proposer: Address,
        to: Address,
        value: u128,
        payload: Vec<Word>,
        proposed_at: u64,
    ) -> TxId {
        let id = TxId::Pending(self.next_local);
        self.next_local += 1;

        let mut entry = Entry::new(Transaction::new(id, proposer, to, value, payload, proposed_at));
        entry.in_flight = true;
        entry.refresh(self.config.required_approvals);
        self.entries.insert(id, entry);
        self.emit(StoreEvent::Upserted(id));
        id
    }

    /// Moves a confirmed proposal from its temporary id to the chain id. If a
    /// chain read already produced the row, that row wins and the optimistic
    /// one is dropped.
    pub fn confirm_proposal(&mut self, temp: TxId, chain_id: u64, slot: u64) -> Option<TxId> {
        let mut entry = self.entries.remove(&temp)?;
        let id = TxId::Chain(chain_id);

        if !self.entries.contains_key(&id) {
            entry.tx.id = id;
            entry.in_flight = false;
            entry.confirmed_slot = slot;
            entry.misses = 0;
            entry.refresh(self.config.required_approvals);
            self.entries.insert(id, entry);
        }
        self.emit(StoreEvent::Replaced { from: temp, to: id });
        Some(id)
    }

    /// Re-keys a rejected proposal so it stays visible as failed without
    /// leaving anything under the temporary id.
    ///
    /// `may_have_landed` marks a submit whose outcome is unknown. If a matching
    /// proposal later shows up on chain, that row replaces this one.
    pub fn reject_proposal(&mut self, temp: TxId, may_have_landed: bool) -> Option<TxId> {
        let TxId::Pending(n) = temp else {
            return None;
        };
        let mut entry = self.entries.remove(&temp)?;
        let id = TxId::Rejected(n);

        entry.tx.id = id;
        entry.in_flight = false;
        entry.may_have_landed = may_have_landed;
        entry.settle(Resolution::Failed(FailureCause::Rejected));
        entry.refresh(self.config.required_approvals);
        self.entries.insert(id, entry);
        self.emit(StoreEvent::Replaced { from: temp, to: id });
        Some(id)
    }

    /// Validates an approval against current state and records it as pending.
    /// Returns the chain id to send the approval to, or `None` when the
    /// approver is already counted.
    pub fn add_pending_approval(
        &mut self,
        id: TxId,
        approver: Address,
    ) -> CoordinatorResult<Option<u64>> {
        let required_approvals = self.config.required_approvals;
        let is_owner = self.config.is_owner(&approver);
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(CoordinatorError::NotFound(id))?;

        match entry.tx.resolution {
            Resolution::Executed => return Err(CoordinatorError::AlreadyExecuted(id)),
            Resolution::Failed(_) => return Err(CoordinatorError::TransactionFailed(id)),
            Resolution::Open => {}
        }
        let Some(chain_id) = id.chain_id() else {
            return Err(CoordinatorError::Unconfirmed(id));
        };
        if !is_owner {
            return Err(CoordinatorError::NotOwner(approver));
        }
        if entry.tx.has_approved(&approver) {
            return Ok(None);
        }

        entry.pending.insert(approver);
        entry.refresh(required_approvals);
        self.emit(StoreEvent::Upserted(id));
        Ok(Some(chain_id))
    }

    pub fn confirm_approval(&mut self, id: TxId, approver: Address, slot: u64) -> bool {
        let required_approvals = self.config.required_approvals;
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        if !entry.pending.remove(&approver) {
            return false;
        }
        // A read at or after the write's slot already holds the chain's answer.
        if entry.observed_slot.map_or(true, |observed| observed < slot) {
            entry.landed.insert(approver, slot);
        }
        entry.refresh(required_approvals);
        self.emit(StoreEvent::Upserted(id));
        true
    }

    /// Removes exactly the pending approval `approver` added; approvals that
    /// were confirmed by other means are left in place.
    pub fn rollback_approval(&mut self, id: TxId, approver: Address) -> bool {
        let required_approvals = self.config.required_approvals;
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        if !entry.pending.remove(&approver) {
            return false;
        }
        entry.refresh(required_approvals);
        self.emit(StoreEvent::RolledBack(id));
        true
    }

    /// Merges one chain-reported transaction observed at `slot`.
    pub fn merge_transaction(&mut self, slot: u64, chain: &ChainTransaction) -> bool {
        let required_approvals = self.config.required_approvals;
        let id = TxId::Chain(chain.id);

        let Some(entry) = self.entries.get_mut(&id) else {
            let superseded = self.take_unsettled_submit(chain);
            let mut entry = Entry::new(chain.to_transaction());
            entry.observed_slot = Some(slot);
            entry.refresh(required_approvals);
            self.entries.insert(id, entry);
            match superseded {
                Some(from) => {
                    debug!(%from, to = %id, "timed-out proposal found on chain");
                    self.emit(StoreEvent::Replaced { from, to: id });
                }
                None => self.emit(StoreEvent::Upserted(id)),
            }
            return true;
        };

        if entry.observed_slot.is_some_and(|observed| slot < observed) {
            return false;
        }
        if !entry.accepts_chain_reads() {
            return false;
        }

        let before = entry.tx.clone();
        entry.tx.proposer = chain.proposer;
        entry.tx.to = chain.to;
        entry.tx.value = chain.value;
        entry.tx.payload = chain.payload.clone();
        entry.tx.proposed_at = chain.proposed_at;
        entry.confirmed = chain.approvals.iter().copied().collect();
        entry.landed.retain(|_, landed_at| *landed_at > slot);
        entry.settle(chain.resolution());
        entry.observed_slot = Some(slot);
        entry.misses = 0;
        entry.refresh(required_approvals);

        let changed = entry.tx != before;
        if changed {
            self.emit(StoreEvent::Upserted(id));
        }
        changed
    }

    /// Removes the timed-out proposal `chain` turns out to be, if any.
    fn take_unsettled_submit(&mut self, chain: &ChainTransaction) -> Option<TxId> {
        let id = self.entries.iter().find_map(|(id, entry)| {
            let tx = &entry.tx;
            (entry.may_have_landed
                && tx.proposer == chain.proposer
                && tx.to == chain.to
                && tx.value == chain.value
                && tx.payload == chain.payload)
                .then_some(*id)
        })?;
        self.entries.remove(&id);
        Some(id)
    }

    /// Merges a full listing. Rows missing from `missing_limit` consecutive
    /// newer listings are marked failed. Rows that reached quorum are kept as
    /// they are: only the chain can fail an approved transaction.
    pub fn merge_snapshot(
        &mut self,
        snapshot: &Observed<Vec<ChainTransaction>>,
        missing_limit: u32,
    ) -> MergeOutcome {
        let slot = snapshot.slot;
        let mut outcome = MergeOutcome::default();

        if self.last_snapshot_slot.is_some_and(|last| slot < last) {
            debug!(slot, last = ?self.last_snapshot_slot, "stale snapshot ignored");
            outcome.stale = true;
            return outcome;
        }
        let newer = self.last_snapshot_slot.map_or(true, |last| slot > last);

        let mut seen = BTreeSet::new();
        for chain in &snapshot.value {
            seen.insert(TxId::Chain(chain.id));
            if self.merge_transaction(slot, chain) {
                outcome.merged += 1;
            }
        }

        if newer {
            let required_approvals = self.config.required_approvals;
            let mut vanished = Vec::new();
            for (id, entry) in self.entries.iter_mut() {
                if seen.contains(id)
                    || id.chain_id().is_none()
                    || entry.in_flight
                    || entry.tx.resolution.is_terminal()
                    || entry.tx.status() == TxStatus::Approved
                    || entry.confirmed_slot > slot
                    || entry.observed_slot.is_some_and(|observed| observed > slot)
                {
                    continue;
                }
                entry.misses += 1;
                if entry.misses >= missing_limit {
                    entry.settle(Resolution::Failed(FailureCause::Vanished));
                    entry.refresh(required_approvals);
                    vanished.push(*id);
                }
            }
            outcome.vanished = vanished.len();
            for id in vanished {
                self.emit(StoreEvent::Upserted(id));
            }
        }

        self.last_snapshot_slot = Some(slot);
        outcome
    }

    /// Drops every row and the cached config.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.config = WalletConfig::default();
        self.config_loaded = false;
        self.last_snapshot_slot = None;
        self.epoch += 1;
        self.emit(StoreEvent::Cleared);
    }

    fn emit(&mut self, event: StoreEvent) {
        if self.journaling {
            self.journal.push(event);
        }
    }

    fn take_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.journal)
    }
}

/// A [`TransactionStore`] shared between the coordinator, the sync loop and
/// readers, announcing each mutation on a broadcast channel.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<TransactionStore>>,
    events: broadcast::Sender<StoreEvent>,
}

impl SharedStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            inner: Arc::new(RwLock::new(TransactionStore::journaled())),
            events,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.events())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, id: &TxId) -> Option<Transaction> {
        self.inner.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Transaction> {
        self.inner.read().list()
    }

    pub fn config(&self) -> WalletConfig {
        self.inner.read().config().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&TransactionStore) -> R) -> R {
        f(&self.inner.read())
    }

    pub fn upsert(&self, tx: Transaction) {
        self.update(|store| store.upsert(tx));
    }

    pub fn set_owners(&self, owners: impl IntoIterator<Item = Address>, required_approvals: u32) {
        self.update(|store| store.set_owners(owners, required_approvals));
    }

    /// Runs `f` under the write lock, then publishes the events it produced.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut TransactionStore) -> R) -> R {
        let (result, events) = {
            let mut store = self.inner.write();
            let result = f(&mut store);
            (result, store.take_events())
        };
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        result
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use solana_program::pubkey::Pubkey;

    use super::*;

    struct Wallet {
        a: Pubkey,
        b: Pubkey,
        c: Pubkey,
        x: Pubkey,
    }

    fn wallet() -> (TransactionStore, Wallet) {
        let w = Wallet {
            a: Pubkey::new_unique(),
            b: Pubkey::new_unique(),
            c: Pubkey::new_unique(),
            x: Pubkey::new_unique(),
        };
        let mut store = TransactionStore::new();
        store.set_owners([w.a, w.b, w.c], 2);
        (store, w)
    }

    fn chain_tx(id: u64, w: &Wallet, approvals: &[Pubkey]) -> ChainTransaction {
        ChainTransaction {
            id,
            proposer: w.a,
            to: w.x,
            value: 10,
            payload: vec![],
            approvals: approvals.to_vec(),
            proposed_at: 100 + id,
            executed: false,
            failed: false,
        }
    }

    fn assert_status_invariant(store: &TransactionStore) {
        let required = store.config().required_approvals as usize;
        for tx in store.list() {
            let approved = tx.resolution == Resolution::Open && tx.approvals.len() >= required;
            assert_eq!(tx.status() == TxStatus::Approved, approved, "{tx:?}");
        }
    }

    #[test]
    fn upsert_derives_status_from_approvals() {
        let (mut store, w) = wallet();
        let mut tx = Transaction::new(TxId::Chain(1), w.a, w.x, 10, vec![], 1);
        tx.approvals = [w.b, w.c].into_iter().collect();
        // A stale status on the input is never trusted.
        tx.status = TxStatus::Proposed;
        store.upsert(tx);

        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Approved);
        assert_status_invariant(&store);
    }

    #[test]
    fn set_owners_reevaluates_quorum() {
        let (mut store, w) = wallet();
        store.merge_transaction(1, &chain_tx(1, &w, &[w.b, w.c]));
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Approved);

        store.set_owners([w.a, w.b, w.c], 3);
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Proposed);
        assert_status_invariant(&store);
    }

    #[test]
    fn list_is_most_recent_first_with_id_tiebreak() {
        let (mut store, w) = wallet();
        for (id, at) in [(1, 50), (2, 70), (3, 70), (4, 10)] {
            store.upsert(Transaction::new(TxId::Chain(id), w.a, w.x, 1, vec![], at));
        }
        let ids: Vec<TxId> = store.list().into_iter().map(|tx| tx.id).collect();
        assert_eq!(
            ids,
            vec![TxId::Chain(3), TxId::Chain(2), TxId::Chain(1), TxId::Chain(4)]
        );
    }

    #[test]
    fn duplicate_approval_is_a_no_op() {
        let (mut store, w) = wallet();
        store.merge_transaction(1, &chain_tx(1, &w, &[]));
        let id = TxId::Chain(1);

        assert_eq!(store.add_pending_approval(id, w.b).unwrap(), Some(1));
        let size = store.get(&id).unwrap().approval_count();
        assert_eq!(store.add_pending_approval(id, w.b).unwrap(), None);
        assert_eq!(store.get(&id).unwrap().approval_count(), size);
    }

    #[test]
    fn approval_preconditions() {
        let (mut store, w) = wallet();
        let outsider = Pubkey::new_unique();
        store.merge_transaction(1, &chain_tx(1, &w, &[]));

        assert!(matches!(
            store.add_pending_approval(TxId::Chain(9), w.b),
            Err(CoordinatorError::NotFound(_))
        ));
        assert!(matches!(
            store.add_pending_approval(TxId::Chain(1), outsider),
            Err(CoordinatorError::NotOwner(_))
        ));

        let temp = store.insert_optimistic(w.a, w.x, 1, vec![], 5);
        assert!(matches!(
            store.add_pending_approval(temp, w.b),
            Err(CoordinatorError::Unconfirmed(_))
        ));
    }

    #[test]
    fn rollback_keeps_approvals_confirmed_meanwhile() {
        let (mut store, w) = wallet();
        let id = TxId::Chain(1);
        store.merge_transaction(1, &chain_tx(1, &w, &[]));

        store.add_pending_approval(id, w.b).unwrap();
        // Another owner's approval lands on chain while ours is in flight.
        store.merge_transaction(2, &chain_tx(1, &w, &[w.c]));
        let with_pending = store.get(&id).unwrap().approvals.clone();
        assert!(with_pending.contains(&w.b) && with_pending.contains(&w.c));

        assert!(store.rollback_approval(id, w.b));
        let after: Vec<Pubkey> = store.get(&id).unwrap().approvals.iter().copied().collect();
        assert_eq!(after, vec![w.c]);
        assert_status_invariant(&store);
    }

    #[test]
    fn rollback_restores_exact_prior_approvals() {
        let (mut store, w) = wallet();
        let id = TxId::Chain(1);
        store.merge_transaction(1, &chain_tx(1, &w, &[w.a]));
        let before = store.get(&id).unwrap().approvals.clone();

        store.add_pending_approval(id, w.b).unwrap();
        store.rollback_approval(id, w.b);
        assert_eq!(store.get(&id).unwrap().approvals, before);
        // Rolling back something that was never pending changes nothing.
        assert!(!store.rollback_approval(id, w.a));
        assert_eq!(store.get(&id).unwrap().approvals, before);
    }

    #[test]
    fn merging_twice_equals_merging_once() {
        let (mut store, w) = wallet();
        store.merge_transaction(1, &chain_tx(7, &w, &[]));
        let snapshot = Observed::new(5, vec![chain_tx(1, &w, &[w.b]), chain_tx(2, &w, &[w.b, w.c])]);

        store.merge_snapshot(&snapshot, 1);
        let once = store.list();
        let second = store.merge_snapshot(&snapshot, 1);
        assert_eq!(store.list(), once);
        assert_eq!(second.merged, 0);
        assert_eq!(second.vanished, 0);
    }

    #[test]
    fn confirmation_and_snapshot_commute() {
        let (_, w) = wallet();
        let build = |w: &Wallet| {
            let mut store = TransactionStore::new();
            store.set_owners([w.a, w.b, w.c], 2);
            store.merge_transaction(1, &chain_tx(1, w, &[]));
            store.add_pending_approval(TxId::Chain(1), w.b).unwrap();
            store
        };
        let snapshots = [
            // Read before our approval landed at slot 5.
            Observed::new(3, vec![chain_tx(1, &w, &[w.c])]),
            // Read after it landed.
            Observed::new(8, vec![chain_tx(1, &w, &[w.b, w.c])]),
        ];

        for snapshot in &snapshots {
            let mut first = build(&w);
            first.merge_snapshot(snapshot, 3);
            first.confirm_approval(TxId::Chain(1), w.b, 5);

            let mut second = build(&w);
            second.confirm_approval(TxId::Chain(1), w.b, 5);
            second.merge_snapshot(snapshot, 3);

            assert_eq!(first.list(), second.list(), "snapshot at slot {}", snapshot.slot);
            let approvals = &first.get(&TxId::Chain(1)).unwrap().approvals;
            assert!(approvals.contains(&w.b) && approvals.contains(&w.c));
        }
    }

    #[test]
    fn older_reads_never_overwrite_newer_ones() {
        let (mut store, w) = wallet();
        store.merge_snapshot(&Observed::new(10, vec![chain_tx(1, &w, &[w.b, w.c])]), 3);

        let stale = store.merge_snapshot(&Observed::new(4, vec![chain_tx(1, &w, &[])]), 3);
        assert!(stale.stale);
        assert!(!store.merge_transaction(6, &chain_tx(1, &w, &[])));
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().approval_count(), 2);
    }

    #[test]
    fn rows_missing_from_consecutive_snapshots_fail() {
        let (mut store, w) = wallet();
        store.merge_snapshot(&Observed::new(1, vec![chain_tx(1, &w, &[])]), 2);

        let first = store.merge_snapshot(&Observed::new(2, vec![]), 2);
        assert_eq!(first.vanished, 0);
        // Re-merging the same slot does not count as another miss.
        store.merge_snapshot(&Observed::new(2, vec![]), 2);
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Proposed);

        let second = store.merge_snapshot(&Observed::new(3, vec![]), 2);
        assert_eq!(second.vanished, 1);
        let tx = store.get(&TxId::Chain(1)).unwrap();
        assert_eq!(tx.resolution, Resolution::Failed(FailureCause::Vanished));

        store.merge_snapshot(&Observed::new(4, vec![chain_tx(1, &w, &[w.b])]), 2);
        let back = store.get(&TxId::Chain(1)).unwrap();
        assert_eq!(back.resolution, Resolution::Open);
        assert_eq!(back.approval_count(), 1);
    }

    #[test]
    fn in_flight_proposals_are_never_counted_missing() {
        let (mut store, w) = wallet();
        let temp = store.insert_optimistic(w.a, w.x, 1, vec![], 5);
        for slot in 1..5 {
            store.merge_snapshot(&Observed::new(slot, vec![]), 1);
        }
        assert_eq!(store.get(&temp).unwrap().resolution, Resolution::Open);
    }

    #[test]
    fn proposal_swap_leaves_one_row() {
        let (mut store, w) = wallet();
        let temp = store.insert_optimistic(w.a, w.x, 10, vec![], 5);
        let id = store.confirm_proposal(temp, 4, 9).unwrap();

        assert_eq!(id, TxId::Chain(4));
        assert!(store.get(&temp).is_none());
        assert_eq!(store.len(), 1);

        // Sync won the race: the chain row is kept, the optimistic one dropped.
        let temp = store.insert_optimistic(w.a, w.x, 10, vec![], 6);
        store.merge_transaction(11, &chain_tx(5, &w, &[w.c]));
        store.confirm_proposal(temp, 5, 10).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&TxId::Chain(5)).unwrap().approval_count(), 1);
    }

    #[test]
    fn rejected_proposal_is_rekeyed_as_failed() {
        let (mut store, w) = wallet();
        let temp = store.insert_optimistic(w.a, w.x, 10, vec![], 5);
        let failed = store.reject_proposal(temp, false).unwrap();

        assert!(store.get(&temp).is_none());
        let tx = store.get(&failed).unwrap();
        assert_eq!(tx.status(), TxStatus::Failed);
        assert_eq!(tx.resolution, Resolution::Failed(FailureCause::Rejected));
        assert!(matches!(
            store.add_pending_approval(failed, w.b),
            Err(CoordinatorError::TransactionFailed(_))
        ));

        // A definite rejection is never matched against later chain rows.
        store.merge_transaction(3, &chain_tx(1, &w, &[]));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn timed_out_proposal_is_replaced_by_its_chain_row() {
        let (_, w) = wallet();
        let mut store = TransactionStore::journaled();
        store.set_owners([w.a, w.b, w.c], 2);
        let temp = store.insert_optimistic(w.a, w.x, 10, vec![], 5);
        let failed = store.reject_proposal(temp, true).unwrap();
        let mut other = chain_tx(2, &w, &[]);
        other.value = 11;
        store.take_events();

        store.merge_snapshot(&Observed::new(4, vec![chain_tx(1, &w, &[]), other]), 3);
        assert_eq!(store.len(), 2);
        assert!(store.get(&failed).is_none());
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Proposed);
        assert_eq!(store.get(&TxId::Chain(2)).unwrap().value, 11);
        assert_eq!(
            store.take_events(),
            vec![
                StoreEvent::Replaced {
                    from: failed,
                    to: TxId::Chain(1),
                },
                StoreEvent::Upserted(TxId::Chain(2)),
            ]
        );
    }

    #[test]
    fn approved_rows_are_not_inferred_vanished() {
        let (mut store, w) = wallet();
        store.merge_snapshot(&Observed::new(1, vec![chain_tx(1, &w, &[w.b, w.c])]), 1);

        let outcome = store.merge_snapshot(&Observed::new(2, vec![]), 1);
        assert_eq!(outcome.vanished, 0);
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Approved);
    }

    #[test]
    fn chain_failure_overrides_quorum() {
        let (mut store, w) = wallet();
        store.merge_transaction(1, &chain_tx(1, &w, &[w.b, w.c]));
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Approved);

        let mut failed = chain_tx(1, &w, &[w.b, w.c]);
        failed.failed = true;
        assert!(store.merge_transaction(2, &failed));
        let tx = store.get(&TxId::Chain(1)).unwrap();
        assert_eq!(tx.status(), TxStatus::Failed);
        assert_eq!(tx.resolution, Resolution::Failed(FailureCause::Chain));
        assert_status_invariant(&store);
    }

    #[test]
    fn bare_store_keeps_no_journal() {
        let (mut store, w) = wallet();
        for n in 0..1_000u64 {
            store.upsert(Transaction::new(TxId::Chain(n % 3), w.a, w.x, 1, vec![], n));
        }
        assert!(store.journal.is_empty());
    }

    #[test]
    fn executed_rows_are_terminal() {
        let (mut store, w) = wallet();
        let mut executed = chain_tx(1, &w, &[w.b, w.c]);
        executed.executed = true;
        store.merge_transaction(1, &executed);

        assert!(matches!(
            store.add_pending_approval(TxId::Chain(1), w.a),
            Err(CoordinatorError::AlreadyExecuted(_))
        ));
        assert!(!store.merge_transaction(2, &chain_tx(1, &w, &[])));
        assert_eq!(store.get(&TxId::Chain(1)).unwrap().status(), TxStatus::Executed);
    }

    #[test]
    fn clear_drops_everything_and_bumps_epoch() {
        let (mut store, w) = wallet();
        store.insert_optimistic(w.a, w.x, 10, vec![], 5);
        let epoch = store.epoch();
        store.clear();

        assert!(store.is_empty());
        assert!(!store.config_loaded());
        assert_eq!(store.epoch(), epoch + 1);
    }

    #[test]
    fn stale_config_is_ignored() {
        let (mut store, w) = wallet();
        assert!(store.apply_config(WalletConfig {
            owners: [w.a, w.b].into_iter().collect(),
            required_approvals: 1,
            slot: 10,
        }));
        assert!(!store.apply_config(WalletConfig {
            owners: [w.a].into_iter().collect(),
            required_approvals: 1,
            slot: 3,
        }));
        assert!(store.is_owner(&w.b));
        assert_eq!(store.config().slot, 10);
    }

    #[tokio::test]
    async fn shared_store_publishes_mutations() {
        let shared = SharedStore::from_config(&CoordinatorConfig {
            event_capacity: 16,
            ..CoordinatorConfig::default()
        });
        let mut events = shared.subscribe();
        let owner = Pubkey::new_unique();

        shared.set_owners([owner], 1);
        shared.upsert(Transaction::new(TxId::Chain(1), owner, owner, 1, vec![], 1));

        assert_eq!(events.recv().await.unwrap(), StoreEvent::ConfigChanged);
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Upserted(TxId::Chain(1)));
        assert_eq!(shared.list().len(), 1);
    }
}
