//! Entry/backedge counting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::trace;

use emgr_config::{CounterParams, EbMode};
use emgr_jit::{CollectorHandle, JitHandle, MethodHandle, ProfileKind};

use crate::collector::{CollectorInfo, ProfileCollector, ProfileMap, ScanQueue, TbsClient};
use crate::error::ProfileError;
use crate::profile::MethodProfile;

/// Two counters per method, bumped by emitted code through raw pointers.
#[derive(Debug)]
pub struct EbMethodProfile {
    method: MethodHandle,
    collector: CollectorHandle,
    entry: AtomicU32,
    backedge: AtomicU32,
}

impl EbMethodProfile {
    const fn new(method: MethodHandle, collector: CollectorHandle) -> Self {
        Self {
            method,
            collector,
            entry: AtomicU32::new(0),
            backedge: AtomicU32::new(0),
        }
    }

    pub const fn method(&self) -> MethodHandle {
        self.method
    }

    pub const fn collector(&self) -> CollectorHandle {
        self.collector
    }

    pub fn entry_count(&self) -> u32 {
        self.entry.load(Ordering::Relaxed)
    }

    pub fn backedge_count(&self) -> u32 {
        self.backedge.load(Ordering::Relaxed)
    }

    pub fn record_entry(&self) {
        self.entry.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backedge(&self) {
        self.backedge.fetch_add(1, Ordering::Relaxed);
    }

    /// Address of the entry counter.
    pub const fn entry_counter_ptr(&self) -> *mut u32 {
        self.entry.as_ptr()
    }

    pub const fn backedge_counter_ptr(&self) -> *mut u32 {
        self.backedge.as_ptr()
    }

    pub fn reset(&self) {
        self.entry.store(0, Ordering::Relaxed);
        self.backedge.store(0, Ordering::Relaxed);
    }
}

pub struct EbProfileCollector {
    info: CollectorInfo,
    params: CounterParams,
    profiles: ProfileMap,
    scan: ScanQueue,
}

impl EbProfileCollector {
    pub fn new(
        handle: CollectorHandle,
        name: impl Into<String>,
        generator: JitHandle,
        params: CounterParams,
    ) -> Self {
        Self {
            info: CollectorInfo::new(handle, name, generator),
            params,
            profiles: ProfileMap::default(),
            scan: ScanQueue::default(),
        }
    }

    pub const fn params(&self) -> &CounterParams {
        &self.params
    }

    pub fn is_sync(&self) -> bool {
        self.params.mode == EbMode::Sync
    }

    pub const fn entry_threshold(&self) -> u32 {
        self.params.entry_threshold
    }

    pub const fn backedge_threshold(&self) -> u32 {
        self.params.backedge_threshold
    }

    pub fn create_profile(&self, method: MethodHandle) -> Result<Arc<MethodProfile>, ProfileError> {
        let handle = self.info.handle();
        let profile = self.profiles.insert_new(&self.info, method, || {
            MethodProfile::EntryBackedge(EbMethodProfile::new(method, handle))
        })?;
        if !self.is_sync() {
            self.scan.push(Arc::clone(&profile));
        }
        trace!(collector = self.info.name(), ?method, "created entry/backedge profile");
        Ok(profile)
    }

    /// Hot once either counter reaches its threshold.
    pub fn is_hot(&self, profile: &EbMethodProfile) -> bool {
        profile.entry_count() >= self.params.entry_threshold
            || profile.backedge_count() >= self.params.backedge_threshold
    }
}

impl ProfileCollector for EbProfileCollector {
    fn info(&self) -> &CollectorInfo {
        &self.info
    }

    fn kind(&self) -> ProfileKind {
        ProfileKind::EntryBackedge
    }

    fn profile(&self, method: MethodHandle) -> Option<Arc<MethodProfile>> {
        self.profiles.get(method)
    }

    fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    fn as_tbs_client(&self) -> Option<&dyn TbsClient> {
        if self.is_sync() { None } else { Some(self) }
    }

    fn as_entry_backedge(&self) -> Option<&EbProfileCollector> {
        Some(self)
    }
}

impl TbsClient for EbProfileCollector {
    fn initial_timeout(&self) -> u32 {
        self.params.tbs_initial_timeout
    }

    fn timeout(&self) -> u32 {
        self.params.tbs_timeout
    }

    fn on_timeout(&self) -> Vec<Arc<MethodProfile>> {
        self.scan.scan(|profile| {
            profile
                .as_entry_backedge()
                .is_some_and(|profile| self.is_hot(profile))
        })
    }
}
