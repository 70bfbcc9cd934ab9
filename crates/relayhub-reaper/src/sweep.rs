//! The periodic sweep (§4.11, C11): one fixed job, not a user-schedulable
//! queue. Runs steps 1-7 in order on every tick; an interruption part-way
//! through (the store going away, say) just means the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use relayhub_core::config::{ROOM_RING_CAP, SUMMARY_MAX_AGE_SECS, SUMMARY_MAX_COUNT};
use relayhub_room::hub::RoomHub;
use relayhub_store::MessageStore;
use relayhub_voice::VoiceManager;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::heap;
use crate::summary_cache;

/// Heap-warning tier count bound (§4.11 step 6): a tighter window than the
/// steady-state maxAge/maxCount bound in step 4.
const WARNING_SUMMARY_MAX_COUNT: usize = 50;
const WARNING_SUMMARY_MAX_AGE_SECS: i64 = 10 * 60;

/// Heap-critical tier count bound: clip down hard regardless of age.
const CRITICAL_SUMMARY_MAX_COUNT: usize = 10;

/// Idle ASR sessions older than this are reaped on every sweep (step 5).
const ASR_SESSION_MAX_AGE_SECS: u64 = 30 * 60;

pub struct Reaper {
    hub: Arc<RoomHub>,
    store: Arc<dyn MessageStore>,
    voice: Arc<VoiceManager>,
    interval: Duration,
    heap_warning_bytes: u64,
    heap_critical_bytes: u64,
}

impl Reaper {
    pub fn new(
        hub: Arc<RoomHub>,
        store: Arc<dyn MessageStore>,
        voice: Arc<VoiceManager>,
        config: &relayhub_core::config::ReaperConfig,
    ) -> Self {
        Self {
            hub,
            store,
            voice,
            interval: Duration::from_secs(config.interval_secs),
            heap_warning_bytes: config.heap_warning_bytes,
            heap_critical_bytes: config.heap_critical_bytes,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("reaper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reaper shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) {
        let reaped_rooms = self.hub.reap_idle_rooms();
        self.hub.clip_all_rings(ROOM_RING_CAP);
        let evicted_pending = self.hub.evict_expired_pending();

        let clipped_summaries =
            summary_cache::clip_summaries(&self.store, ChronoDuration::seconds(SUMMARY_MAX_AGE_SECS as i64), SUMMARY_MAX_COUNT).await;

        let reaped_asr = self.voice.reap_stale_asr_sessions(Duration::from_secs(ASR_SESSION_MAX_AGE_SECS)).await;

        info!(
            reaped_rooms,
            evicted_pending, clipped_summaries, reaped_asr, "reaper: sweep complete"
        );

        self.check_heap_pressure().await;
    }

    async fn check_heap_pressure(&self) {
        let Some(rss) = heap::resident_bytes() else {
            return;
        };

        if rss >= self.heap_critical_bytes {
            warn!(rss, critical = self.heap_critical_bytes, "reaper: heap critical, shedding aggressively");
            let cleared_pending = self.hub.clear_all_pending();
            let cleared_asr = self.voice.clear_all_asr_sessions().await;
            let clipped = summary_cache::clip_to_count(&self.store, CRITICAL_SUMMARY_MAX_COUNT).await;
            warn!(cleared_pending, cleared_asr, clipped, "reaper: heap-critical shed complete");
        } else if rss >= self.heap_warning_bytes {
            warn!(rss, warning = self.heap_warning_bytes, "reaper: heap warning, trimming summaries");
            let clipped = summary_cache::clip_summaries(
                &self.store,
                ChronoDuration::seconds(WARNING_SUMMARY_MAX_AGE_SECS),
                WARNING_SUMMARY_MAX_COUNT,
            )
            .await;
            warn!(clipped, "reaper: heap-warning trim complete");
        }

        // No managed heap to hint a GC on; the sweep itself is the only
        // pressure-relief mechanism available to us.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhub_blob::fs::FsBlobStore;
    use relayhub_store::sqlite::SqliteStore;

    fn hub() -> Arc<RoomHub> {
        let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let blob: Arc<dyn relayhub_blob::BlobStore> =
            Arc::new(FsBlobStore::new(std::env::temp_dir(), "http://localhost/blobs", "test-signing-secret"));
        Arc::new(RoomHub::new(store, blob, true))
    }

    #[tokio::test]
    async fn sweep_runs_without_a_live_upstream() {
        let hub = hub();
        let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let voice = Arc::new(VoiceManager::new(&relayhub_core::config::VoiceConfig::default()));
        let reaper = Reaper::new(hub, store, voice, &relayhub_core::config::ReaperConfig::default());
        reaper.sweep().await;
    }
}
