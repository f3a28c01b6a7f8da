use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorResult, ProxyResult};
use crate::proxy::ContractProxy;
use crate::state::WalletConfig;
use crate::store::SharedStore;

/// Reads owners and quorum. The combined config is dated by the older read.
pub(crate) async fn load_config<P: ContractProxy>(proxy: &P) -> ProxyResult<WalletConfig> {
    let owners = proxy.get_owners().await?;
    let required = proxy.get_required_approvals().await?;
    Ok(WalletConfig {
        owners: owners.value.into_iter().collect(),
        required_approvals: required.value,
        slot: owners.slot.min(required.slot),
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub slot: u64,
    pub config_changed: bool,
    pub merged: usize,
    pub vanished: usize,
    pub stale: bool,
}

/// Pulls chain state into the store on a fixed interval and whenever a
/// write asks for it.
pub struct SyncScheduler<P> {
    proxy: Arc<P>,
    store: SharedStore,
    interval: Duration,
    missing_limit: u32,
    trigger: Arc<Notify>,
}

impl<P: ContractProxy> SyncScheduler<P> {
    pub fn new(proxy: Arc<P>, store: SharedStore, config: &CoordinatorConfig) -> Self {
        Self {
            proxy,
            store,
            interval: config.sync_interval(),
            missing_limit: config.missing_limit(),
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting an out-of-band sync.
    pub fn trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    pub async fn sync_once(&self) -> CoordinatorResult<SyncReport> {
        let epoch = self.store.read(|store| store.epoch());
        let config = load_config(self.proxy.as_ref()).await?;
        let snapshot = self.proxy.list_transactions().await?;

        let report = self.store.update(|store| {
            if store.epoch() != epoch {
                // Session was reset while the reads were in flight.
                return SyncReport {
                    slot: snapshot.slot,
                    stale: true,
                    ..SyncReport::default()
                };
            }
            let config_changed = store.apply_config(config);
            let outcome = store.merge_snapshot(&snapshot, self.missing_limit);
            SyncReport {
                slot: snapshot.slot,
                config_changed,
                merged: outcome.merged,
                vanished: outcome.vanished,
                stale: outcome.stale,
            }
        });

        if report.vanished > 0 {
            warn!(slot = report.slot, vanished = report.vanished, "transactions missing from chain");
        }
        debug!(
            slot = report.slot,
            merged = report.merged,
            config_changed = report.config_changed,
            stale = report.stale,
            "sync complete"
        );
        Ok(report)
    }

    pub async fn run(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "starting sync loop");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
            }
            if let Err(err) = self.sync_once().await {
                warn!(?err, "sync failed");
            }
        }
    }
}

impl<P: ContractProxy + 'static> SyncScheduler<P> {
    pub fn spawn(self) -> SyncHandle {
        let trigger = self.trigger();
        let task = tokio::spawn(self.run());
        SyncHandle { trigger, task }
    }
}

/// Owns the background sync task. Dropping the handle stops it.
pub struct SyncHandle {
    trigger: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn request_sync(&self) {
        self.trigger.notify_one();
    }

    pub fn trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
