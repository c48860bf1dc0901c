//! Profile access interface handed to JITs once profiling is negotiated.
//!
//! All arguments are opaque handles so the same surface can be exported
//! through the C table in [`crate::ffi`]. Counter getters return addresses
//! that stay valid until the execution manager is destroyed; emitted code may
//! increment them directly.

use crate::handle::{CollectorHandle, JitHandle, MethodHandle, ProfileHandle};
use crate::plugin::{ProfileKind, ProfileRole};

pub trait ProfileAccess: Send + Sync {
    fn collector_kind(&self, collector: CollectorHandle) -> Option<ProfileKind>;

    /// The collector of `kind` that `jit` produces (`Generate`) or reads
    /// (`Use`).
    fn collector(&self, kind: ProfileKind, jit: JitHandle, role: ProfileRole)
        -> Option<CollectorHandle>;

    fn method_profile(&self, collector: CollectorHandle, method: MethodHandle)
        -> Option<ProfileHandle>;

    // entry/backedge

    /// `None` if the collector is unknown, of another kind, or already holds
    /// a profile for `method`.
    fn eb_create_profile(&self, collector: CollectorHandle, method: MethodHandle)
        -> Option<ProfileHandle>;
    fn eb_entry_counter(&self, profile: ProfileHandle) -> Option<*mut u32>;
    fn eb_backedge_counter(&self, profile: ProfileHandle) -> Option<*mut u32>;
    fn eb_is_sync_mode(&self, collector: CollectorHandle) -> Option<bool>;
    /// Emitted code crossed a threshold in sync mode.
    fn eb_sync_callback(&self, profile: ProfileHandle);
    fn eb_entry_threshold(&self, collector: CollectorHandle) -> Option<u32>;
    fn eb_backedge_threshold(&self, collector: CollectorHandle) -> Option<u32>;

    // edge

    fn edge_create_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
        keys: &[u32],
        checksum: u32,
    ) -> Option<ProfileHandle>;
    fn edge_num_counters(&self, profile: ProfileHandle) -> Option<u32>;
    fn edge_checksum(&self, profile: ProfileHandle) -> Option<u32>;
    fn edge_entry_counter(&self, profile: ProfileHandle) -> Option<*mut u32>;
    fn edge_counter(&self, profile: ProfileHandle, key: u32) -> Option<*mut u32>;
    fn edge_entry_threshold(&self, collector: CollectorHandle) -> Option<u32>;
    fn edge_backedge_threshold(&self, collector: CollectorHandle) -> Option<u32>;

    // value

    fn value_create_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
        keys: &[u32],
    ) -> Option<ProfileHandle>;
    /// Record one occurrence of `value` at instruction `key`.
    fn value_add(&self, profile: ProfileHandle, key: u32, value: u64) -> bool;
    fn value_top(&self, profile: ProfileHandle, key: u32) -> Option<u64>;
    /// Steady-table contents as `(value, frequency)`, most frequent first.
    fn value_dump(&self, profile: ProfileHandle, key: u32) -> Vec<(u64, u32)>;
}
