//! Time-based sampling: fan timer ticks out to periodic collectors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use tracing::trace;

use emgr_profile::{MethodProfile, ProfileCollector};

struct TbsEntry {
    collector: Arc<dyn ProfileCollector>,
    timeout: u64,
    next_tick: AtomicU64,
}

/// Tick counter plus one schedule per TBS client. Ticks start at 1; a client
/// with initial timeout 0 runs on the first tick.
pub struct TbsScheduler {
    tick: CachePadded<AtomicU64>,
    entries: Vec<TbsEntry>,
}

impl TbsScheduler {
    pub fn new<'a>(collectors: impl IntoIterator<Item = &'a Arc<dyn ProfileCollector>>) -> Self {
        let entries = collectors
            .into_iter()
            .filter_map(|collector| {
                let client = collector.as_tbs_client()?;
                Some(TbsEntry {
                    timeout: u64::from(client.timeout().max(1)),
                    next_tick: AtomicU64::new(u64::from(client.initial_timeout().max(1))),
                    collector: Arc::clone(collector),
                })
            })
            .collect();
        Self {
            tick: CachePadded::new(AtomicU64::new(0)),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Advance one tick and collect the profiles found hot by every client
    /// due on it.
    pub fn advance(&self) -> Vec<Arc<MethodProfile>> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;
        let mut hot = Vec::new();
        for entry in &self.entries {
            if entry.next_tick.load(Ordering::Relaxed) != tick {
                continue;
            }
            entry.next_tick.store(tick + entry.timeout, Ordering::Relaxed);
            if let Some(client) = entry.collector.as_tbs_client() {
                let found = client.on_timeout();
                trace!(collector = entry.collector.name(), tick, hot = found.len(), "tbs scan");
                hot.extend(found);
            }
        }
        hot
    }
}
