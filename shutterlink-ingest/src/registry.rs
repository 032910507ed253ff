//! Registry of in-flight and recently-settled transfers.
//!
//! The map itself sits behind an `RwLock` that is only held long enough to
//! find or insert an entry; each transfer's state has its own `Mutex`, so
//! concurrent messages for different transfers never contend.

use std::collections::HashMap;
use std::sync::Arc;

use shutterlink_protocol::types::TransferId;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::config::IngestConfig;
use crate::state::TransferState;

/// Counters from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Collecting transfers moved to `Expired`.
    pub expired: usize,
    /// Terminal entries dropped after their grace window.
    pub purged: usize,
}

/// Shared map of transfer id to reassembly state.
pub struct TransferRegistry {
    transfers: RwLock<HashMap<TransferId, Arc<Mutex<TransferState>>>>,
    idle_timeout: Duration,
    max_transfer_duration: Duration,
    grace_window: Duration,
    max_buffered_bytes: usize,
}

impl TransferRegistry {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            idle_timeout: config.idle_timeout(),
            max_transfer_duration: config.max_transfer_duration(),
            grace_window: config.grace_window(),
            max_buffered_bytes: config.max_transfer_size as usize,
        }
    }

    /// Fetch the state for `transfer_id`, creating a fresh entry if this is
    /// the first message seen for it.
    pub async fn entry(&self, transfer_id: &TransferId, now: Instant) -> Arc<Mutex<TransferState>> {
        {
            let transfers = self.transfers.read().await;
            if let Some(entry) = transfers.get(transfer_id) {
                return Arc::clone(entry);
            }
        }
        let mut transfers = self.transfers.write().await;
        Arc::clone(transfers.entry(transfer_id.clone()).or_insert_with(|| {
            tracing::debug!(%transfer_id, "tracking new transfer");
            Arc::new(Mutex::new(TransferState::new(now, self.max_buffered_bytes)))
        }))
    }

    /// Look up a transfer without creating it.
    pub async fn get(&self, transfer_id: &TransferId) -> Option<Arc<Mutex<TransferState>>> {
        self.transfers.read().await.get(transfer_id).cloned()
    }

    /// Number of tracked transfers, terminal entries included.
    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transfers.read().await.is_empty()
    }

    /// One sweep pass: expire stalled transfers, then drop terminal entries
    /// whose grace window has elapsed.
    ///
    /// Works from a snapshot of the entries so per-transfer locks are taken
    /// without holding the map lock.
    pub async fn sweep(&self, now: Instant) -> SweepStats {
        let snapshot: Vec<(TransferId, Arc<Mutex<TransferState>>)> = {
            let transfers = self.transfers.read().await;
            transfers
                .iter()
                .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
                .collect()
        };

        let mut stats = SweepStats::default();
        let mut purge = Vec::new();
        for (transfer_id, entry) in snapshot {
            let mut state = entry.lock().await;
            if state.expire_if_due(now, self.idle_timeout, self.max_transfer_duration) {
                tracing::info!(%transfer_id, "transfer expired while collecting");
                stats.expired += 1;
            }
            if state.purge_due(now, self.grace_window) {
                purge.push(transfer_id);
            }
        }

        if !purge.is_empty() {
            let mut transfers = self.transfers.write().await;
            for transfer_id in purge {
                transfers.remove(&transfer_id);
                tracing::debug!(%transfer_id, "purged settled transfer");
                stats.purged += 1;
            }
        }
        stats
    }

    /// Run [`sweep`](Self::sweep) on a fixed interval until the handle is
    /// dropped or aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let stats = registry.sweep(Instant::now()).await;
                if stats.expired > 0 || stats.purged > 0 {
                    tracing::debug!(expired = stats.expired, purged = stats.purged, "sweep pass");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use shutterlink_protocol::transfer::{Fragment, TransferEnvelope};
    use shutterlink_protocol::types::SourceId;

    use super::*;
    use crate::state::TransferStatus;

    fn config() -> IngestConfig {
        IngestConfig {
            idle_timeout_ms: 30_000,
            max_transfer_duration_ms: 300_000,
            grace_window_ms: 60_000,
            ..IngestConfig::default()
        }
    }

    fn envelope(id: &str, fragment_count: u32) -> TransferEnvelope {
        TransferEnvelope {
            transfer_id: TransferId::from(id),
            source_id: SourceId::from("camera-1"),
            created_at_ms: 0,
            total_size: fragment_count as u64 * 4,
            fragment_count,
            fragment_size: 4,
            checksum: [0u8; 32],
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn entry_is_created_once_and_shared() {
        let registry = TransferRegistry::new(&config());
        let id = TransferId::from("t-1");
        let now = Instant::now();

        let a = registry.entry(&id, now).await;
        let b = registry.entry(&id, now).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_expires_stalled_then_purges_after_grace() {
        let registry = TransferRegistry::new(&config());
        let id = TransferId::from("t-stall");
        let start = Instant::now();

        let entry = registry.entry(&id, start).await;
        entry.lock().await.apply_envelope(envelope("t-stall", 3), start);
        entry.lock().await.apply_fragment(
            Fragment {
                transfer_id: id.clone(),
                sequence_index: 0,
                payload_chunk: "aaaa".into(),
                is_last: false,
            },
            start,
        );

        // Not yet idle: nothing happens.
        let stats = registry.sweep(start + Duration::from_secs(10)).await;
        assert_eq!(stats, SweepStats::default());

        // Idle timeout elapsed: expired but retained for the grace window.
        let expiry = start + Duration::from_secs(31);
        let stats = registry.sweep(expiry).await;
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.purged, 0);
        assert_eq!(registry.len().await, 1);
        assert_eq!(
            *registry.get(&id).await.unwrap().lock().await.status(),
            TransferStatus::Expired
        );

        // Grace window elapsed since the terminal transition: entry dropped.
        let stats = registry.sweep(expiry + Duration::from_secs(61)).await;
        assert_eq!(stats.purged, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_entries_survive_sweeps_until_grace_elapses() {
        let registry = TransferRegistry::new(&config());
        let id = TransferId::from("t-done");
        let start = Instant::now();

        let entry = registry.entry(&id, start).await;
        entry.lock().await.apply_envelope(envelope("t-done", 0), start);
        entry.lock().await.mark_complete(start);

        let stats = registry.sweep(start + Duration::from_secs(59)).await;
        assert_eq!(stats, SweepStats::default());
        assert_eq!(registry.len().await, 1);

        let stats = registry.sweep(start + Duration::from_secs(60)).await;
        assert_eq!(stats.purged, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_purges_on_its_own() {
        let registry = Arc::new(TransferRegistry::new(&config()));
        let id = TransferId::from("t-bg");
        registry.entry(&id, Instant::now()).await;

        let handle = registry.spawn_sweeper(Duration::from_secs(5));

        // Idle timeout (30s) + grace window (60s), plus a tick of slack.
        tokio::time::sleep(Duration::from_secs(96)).await;
        assert!(registry.is_empty().await);
        handle.abort();
    }
}
