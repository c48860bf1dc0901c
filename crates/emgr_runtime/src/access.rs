//! The [`ProfileAccess`] implementation handed to JITs.

use std::sync::{Arc, Weak};

use tracing::debug;

use emgr_jit::{
    CollectorHandle, JitHandle, MethodHandle, ProfileAccess, ProfileHandle, ProfileKind,
    ProfileRole,
};
use emgr_profile::{EbProfileCollector, EdgeProfileCollector, MethodProfile, ValueProfileCollector};

use crate::manager::ExecutionManager;
use crate::registry::CollectorRegistry;

/// Resolves handles against one attempt's registry. Sync-mode callbacks are
/// routed to the manager, which may already be gone during teardown.
pub struct ProfileAccessBridge {
    registry: Arc<CollectorRegistry>,
    manager: Weak<ExecutionManager>,
}

impl ProfileAccessBridge {
    pub const fn new(registry: Arc<CollectorRegistry>, manager: Weak<ExecutionManager>) -> Self {
        Self { registry, manager }
    }

    fn profile(&self, profile: ProfileHandle) -> Option<Arc<MethodProfile>> {
        self.registry.profile(profile)
    }

    /// Run `f` with a value profile and the collector that owns it.
    fn with_value<T>(
        &self,
        profile: ProfileHandle,
        f: impl FnOnce(&ValueProfileCollector, &MethodProfile) -> Option<T>,
    ) -> Option<T> {
        let profile = self.profile(profile)?;
        let owner = self.registry.get(profile.collector())?;
        f(owner.as_value()?, &profile)
    }
}

impl ProfileAccess for ProfileAccessBridge {
    fn collector_kind(&self, collector: CollectorHandle) -> Option<ProfileKind> {
        self.registry.get(collector).map(|c| c.kind())
    }

    fn collector(
        &self,
        kind: ProfileKind,
        jit: JitHandle,
        role: ProfileRole,
    ) -> Option<CollectorHandle> {
        self.registry.find(kind, jit, role)
    }

    fn method_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
    ) -> Option<ProfileHandle> {
        self.registry.method_profile(collector, method)
    }

    fn eb_create_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
    ) -> Option<ProfileHandle> {
        self.registry.create_with(collector, method, |c| {
            c.as_entry_backedge().map(|eb| eb.create_profile(method))
        })
    }

    fn eb_entry_counter(&self, profile: ProfileHandle) -> Option<*mut u32> {
        Some(self.profile(profile)?.as_entry_backedge()?.entry_counter_ptr())
    }

    fn eb_backedge_counter(&self, profile: ProfileHandle) -> Option<*mut u32> {
        Some(self.profile(profile)?.as_entry_backedge()?.backedge_counter_ptr())
    }

    fn eb_is_sync_mode(&self, collector: CollectorHandle) -> Option<bool> {
        self.registry.get(collector)?.as_entry_backedge().map(EbProfileCollector::is_sync)
    }

    fn eb_sync_callback(&self, profile: ProfileHandle) {
        let Some(profile) = self.profile(profile) else {
            debug!(?profile, "sync callback for unknown profile");
            return;
        };
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if let Err(err) = manager.profile_ready(&profile) {
            debug!(method = ?profile.method(), %err, "sync callback ignored");
        }
    }

    fn eb_entry_threshold(&self, collector: CollectorHandle) -> Option<u32> {
        self.registry
            .get(collector)?
            .as_entry_backedge()
            .map(EbProfileCollector::entry_threshold)
    }

    fn eb_backedge_threshold(&self, collector: CollectorHandle) -> Option<u32> {
        self.registry
            .get(collector)?
            .as_entry_backedge()
            .map(EbProfileCollector::backedge_threshold)
    }

    fn edge_create_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
        keys: &[u32],
        checksum: u32,
    ) -> Option<ProfileHandle> {
        self.registry.create_with(collector, method, |c| {
            c.as_edge().map(|edge| edge.create_profile(method, keys, checksum))
        })
    }

    fn edge_num_counters(&self, profile: ProfileHandle) -> Option<u32> {
        let count = self.profile(profile)?.as_edge()?.num_counters();
        u32::try_from(count).ok()
    }

    fn edge_checksum(&self, profile: ProfileHandle) -> Option<u32> {
        Some(self.profile(profile)?.as_edge()?.checksum())
    }

    fn edge_entry_counter(&self, profile: ProfileHandle) -> Option<*mut u32> {
        Some(self.profile(profile)?.as_edge()?.entry_counter_ptr())
    }

    fn edge_counter(&self, profile: ProfileHandle, key: u32) -> Option<*mut u32> {
        self.profile(profile)?.as_edge()?.counter_ptr(key).ok()
    }

    fn edge_entry_threshold(&self, collector: CollectorHandle) -> Option<u32> {
        self.registry
            .get(collector)?
            .as_edge()
            .map(EdgeProfileCollector::entry_threshold)
    }

    fn edge_backedge_threshold(&self, collector: CollectorHandle) -> Option<u32> {
        self.registry
            .get(collector)?
            .as_edge()
            .map(EdgeProfileCollector::backedge_threshold)
    }

    fn value_create_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
        keys: &[u32],
    ) -> Option<ProfileHandle> {
        self.registry.create_with(collector, method, |c| {
            c.as_value().map(|value| value.create_profile(method, keys))
        })
    }

    fn value_add(&self, profile: ProfileHandle, key: u32, value: u64) -> bool {
        self.with_value(profile, |collector, profile| {
            collector.add_value(profile.as_value()?, key, value).ok()
        })
        .unwrap_or(false)
    }

    fn value_top(&self, profile: ProfileHandle, key: u32) -> Option<u64> {
        self.with_value(profile, |collector, profile| {
            collector.top_value(profile.as_value()?, key).ok().flatten()
        })
    }

    fn value_dump(&self, profile: ProfileHandle, key: u32) -> Vec<(u64, u32)> {
        self.with_value(profile, |collector, profile| {
            collector.dump(profile.as_value()?, key).ok()
        })
        .unwrap_or_default()
    }
}
