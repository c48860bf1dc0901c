//! Per-edge counters keyed by JIT-chosen instrumentation keys.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ahash::AHashSet;
use tracing::trace;

use emgr_config::CounterParams;
use emgr_jit::{CollectorHandle, JitHandle, MethodHandle, ProfileKind};

use crate::collector::{CollectorInfo, ProfileCollector, ProfileMap, ScanQueue, TbsClient};
use crate::error::ProfileError;
use crate::profile::MethodProfile;

#[derive(Debug)]
pub struct EdgeMethodProfile {
    method: MethodHandle,
    collector: CollectorHandle,
    checksum: u32,
    entry: AtomicU32,
    keys: Box<[u32]>,
    counters: Box<[AtomicU32]>,
}

impl EdgeMethodProfile {
    pub const fn method(&self) -> MethodHandle {
        self.method
    }

    pub const fn collector(&self) -> CollectorHandle {
        self.collector
    }

    /// Checksum the producer computed over the instrumented code.
    pub const fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Consumers must reject a profile built for different code.
    pub const fn validate(&self, checksum: u32) -> Result<(), ProfileError> {
        if self.checksum == checksum {
            Ok(())
        } else {
            Err(ProfileError::ChecksumMismatch {
                expected: self.checksum,
                found: checksum,
            })
        }
    }

    pub const fn num_counters(&self) -> usize {
        self.counters.len()
    }

    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    pub fn entry_count(&self) -> u32 {
        self.entry.load(Ordering::Relaxed)
    }

    pub const fn entry_counter_ptr(&self) -> *mut u32 {
        self.entry.as_ptr()
    }

    fn slot(&self, key: u32) -> Result<&AtomicU32, ProfileError> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .and_then(|index| self.counters.get(index))
            .ok_or(ProfileError::UnknownKey(key))
    }

    pub fn counter_ptr(&self, key: u32) -> Result<*mut u32, ProfileError> {
        self.slot(key).map(AtomicU32::as_ptr)
    }

    pub fn count(&self, key: u32) -> Result<u32, ProfileError> {
        self.slot(key).map(|slot| slot.load(Ordering::Relaxed))
    }

    pub fn record_entry(&self) {
        self.entry.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edge(&self, key: u32) -> Result<(), ProfileError> {
        self.slot(key)?.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Largest edge counter, the proxy for loop hotness.
    pub fn max_count(&self) -> u32 {
        self.counters
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }
}

/// Edge collectors are always scanned on timer ticks.
pub struct EdgeProfileCollector {
    info: CollectorInfo,
    params: CounterParams,
    profiles: ProfileMap,
    scan: ScanQueue,
}

impl EdgeProfileCollector {
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

    pub const fn entry_threshold(&self) -> u32 {
        self.params.entry_threshold
    }

    pub const fn backedge_threshold(&self) -> u32 {
        self.params.backedge_threshold
    }

    /// One zeroed counter per key, in key order. Keys must be distinct.
    pub fn create_profile(
        &self,
        method: MethodHandle,
        keys: &[u32],
        checksum: u32,
    ) -> Result<Arc<MethodProfile>, ProfileError> {
        let mut seen = AHashSet::with_capacity(keys.len());
        if let Some(&dup) = keys.iter().find(|&&key| !seen.insert(key)) {
            return Err(ProfileError::DuplicateKey(dup));
        }

        let handle = self.info.handle();
        let profile = self.profiles.insert_new(&self.info, method, || {
            MethodProfile::Edge(EdgeMethodProfile {
                method,
                collector: handle,
                checksum,
                entry: AtomicU32::new(0),
                keys: keys.into(),
                counters: keys.iter().map(|_| AtomicU32::new(0)).collect(),
            })
        })?;
        self.scan.push(Arc::clone(&profile));
        trace!(
            collector = self.info.name(),
            ?method,
            counters = keys.len(),
            checksum,
            "created edge profile"
        );
        Ok(profile)
    }

    pub fn is_hot(&self, profile: &EdgeMethodProfile) -> bool {
        profile.entry_count() >= self.params.entry_threshold
            || profile.max_count() >= self.params.backedge_threshold
    }
}

impl ProfileCollector for EdgeProfileCollector {
    fn info(&self) -> &CollectorInfo {
        &self.info
    }

    fn kind(&self) -> ProfileKind {
        ProfileKind::Edge
    }

    fn profile(&self, method: MethodHandle) -> Option<Arc<MethodProfile>> {
        self.profiles.get(method)
    }

    fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    fn as_tbs_client(&self) -> Option<&dyn TbsClient> {
        Some(self)
    }

    fn as_edge(&self) -> Option<&EdgeProfileCollector> {
        Some(self)
    }
}

impl TbsClient for EdgeProfileCollector {
    fn initial_timeout(&self) -> u32 {
        self.params.tbs_initial_timeout
    }

    fn timeout(&self) -> u32 {
        self.params.tbs_timeout
    }

    fn on_timeout(&self) -> Vec<Arc<MethodProfile>> {
        self.scan
            .scan(|profile| profile.as_edge().is_some_and(|profile| self.is_hot(profile)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> EdgeProfileCollector {
        EdgeProfileCollector::new(
            CollectorHandle::from_raw(2).unwrap(),
            "EDGE_PROF",
            JitHandle::from_raw(1).unwrap(),
            CounterParams {
                entry_threshold: 5,
                backedge_threshold: 8,
                ..CounterParams::default()
            },
        )
    }

    fn method(raw: usize) -> MethodHandle {
        MethodHandle::from_raw(raw).unwrap()
    }

    #[test]
    fn test_profile_layout_follows_keys() {
        let collector = collector();
        let profile = collector
            .create_profile(method(0x40), &[7, 3, 11], 0xBEEF)
            .unwrap();
        let edge = profile.as_edge().unwrap();

        assert_eq!(edge.num_counters(), 3);
        assert_eq!(edge.keys(), &[7, 3, 11]);
        assert_eq!(edge.checksum(), 0xBEEF);
        assert!(edge.validate(0xBEEF).is_ok());
        assert_eq!(
            edge.validate(0xDEAD),
            Err(ProfileError::ChecksumMismatch {
                expected: 0xBEEF,
                found: 0xDEAD
            })
        );

        edge.record_edge(3).unwrap();
        unsafe { *edge.counter_ptr(11).unwrap() += 4 };
        assert_eq!(edge.count(3), Ok(1));
        assert_eq!(edge.count(11), Ok(4));
        assert_eq!(edge.count(7), Ok(0));
        assert_eq!(edge.count(99), Err(ProfileError::UnknownKey(99)));
    }

    #[test]
    fn test_rejects_duplicate_keys_and_methods() {
        let collector = collector();
        assert_eq!(
            collector.create_profile(method(0x40), &[1, 2, 1], 0).unwrap_err(),
            ProfileError::DuplicateKey(1)
        );
        assert_eq!(collector.profile_count(), 0);

        collector.create_profile(method(0x40), &[1], 0).unwrap();
        assert!(matches!(
            collector.create_profile(method(0x40), &[1], 0),
            Err(ProfileError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_hot_by_entry_or_any_edge() {
        let collector = collector();
        let quiet = collector.create_profile(method(0x10), &[1, 2], 0).unwrap();
        let looping = collector.create_profile(method(0x20), &[1, 2], 0).unwrap();
        let called = collector.create_profile(method(0x30), &[], 0).unwrap();

        for _ in 0..8 {
            looping.as_edge().unwrap().record_edge(2).unwrap();
        }
        for _ in 0..5 {
            called.as_edge().unwrap().record_entry();
        }
        quiet.as_edge().unwrap().record_edge(1).unwrap();

        let mut hot: Vec<_> = collector.on_timeout().iter().map(|p| p.method()).collect();
        hot.sort();
        assert_eq!(hot, vec![method(0x20), method(0x30)]);
        assert!(collector.on_timeout().is_empty());
        assert_eq!(collector.scan.pending_len(), 1);
    }

    #[test]
    fn test_edge_collector_is_always_tbs_client() {
        assert!(collector().as_tbs_client().is_some());
    }
}
