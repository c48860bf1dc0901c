//! C ABI of JIT plugins.
//!
//! A shared-library JIT exports the mandatory `JIT_init` and
//! `JIT_compile_method` symbols and any of the optional ones below. When it
//! exports `JIT_set_profile_access_interface` it receives
//! [`PROFILE_ACCESS_TABLE`] together with an opaque context pointer that must
//! be passed back as the first argument of every table function.
//!
//! Handles cross the boundary as `usize` with zero meaning null. Table
//! functions never unwind: a panic on the Rust side is turned into the null
//! or zero result of that function.

use std::ffi::{c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::access::ProfileAccess;
use crate::handle::{CollectorHandle, JitHandle, MethodHandle, ProfileHandle};
use crate::plugin::{ProfileKind, ProfileRole};

pub const INIT_SYMBOL: &[u8] = b"JIT_init";
pub const COMPILE_SYMBOL: &[u8] = b"JIT_compile_method";
pub const SET_PROFILE_ACCESS_SYMBOL: &[u8] = b"JIT_set_profile_access_interface";
pub const ENABLE_PROFILING_SYMBOL: &[u8] = b"JIT_enable_profiling";
pub const PROFILE_NOTIFICATION_SYMBOL: &[u8] = b"JIT_profile_notification_callback";
pub const EXECUTE_METHOD_SYMBOL: &[u8] = b"JIT_execute_method";

/// VM-provided resolver the JIT uses to find runtime helpers by name.
pub type AdaptorLookupFn = unsafe extern "C" fn(name: *const c_char) -> *const c_void;

pub type InitFn =
    unsafe extern "C" fn(jit: usize, name: *const c_char, lookup: Option<AdaptorLookupFn>);
/// Returns zero on success.
pub type CompileFn = unsafe extern "C" fn(jit: usize, method: usize) -> u32;
pub type SetProfileAccessFn =
    unsafe extern "C" fn(jit: usize, em: *const c_void, table: *const ProfileAccessTable);
pub type EnableProfilingFn = unsafe extern "C" fn(jit: usize, collector: usize, role: u32) -> bool;
pub type ProfileNotificationFn = unsafe extern "C" fn(jit: usize, profile: usize, method: usize);
pub type ExecuteMethodFn = unsafe extern "C" fn(
    jit: usize,
    method: usize,
    args: *const u64,
    num_args: usize,
    ret: *mut u64,
) -> bool;

/// Returned by `get_collector_kind` for an unknown collector.
pub const UNKNOWN_KIND: u32 = u32::MAX;

#[repr(C)]
pub struct ProfileAccessTable {
    pub get_collector_kind: unsafe extern "C" fn(em: *const c_void, collector: usize) -> u32,
    pub get_collector:
        unsafe extern "C" fn(em: *const c_void, kind: u32, jit: usize, role: u32) -> usize,
    pub get_method_profile:
        unsafe extern "C" fn(em: *const c_void, collector: usize, method: usize) -> usize,

    pub eb_create_profile:
        unsafe extern "C" fn(em: *const c_void, collector: usize, method: usize) -> usize,
    pub eb_get_entry_counter_addr:
        unsafe extern "C" fn(em: *const c_void, profile: usize) -> *mut u32,
    pub eb_get_backedge_counter_addr:
        unsafe extern "C" fn(em: *const c_void, profile: usize) -> *mut u32,
    pub eb_is_in_sync_mode: unsafe extern "C" fn(em: *const c_void, collector: usize) -> bool,
    pub eb_sync_mode_callback: unsafe extern "C" fn(em: *const c_void, profile: usize),
    pub eb_get_entry_threshold: unsafe extern "C" fn(em: *const c_void, collector: usize) -> u32,
    pub eb_get_backedge_threshold: unsafe extern "C" fn(em: *const c_void, collector: usize) -> u32,

    pub edge_create_profile: unsafe extern "C" fn(
        em: *const c_void,
        collector: usize,
        method: usize,
        num_keys: u32,
        keys: *const u32,
        checksum: u32,
    ) -> usize,
    pub edge_get_num_counters: unsafe extern "C" fn(em: *const c_void, profile: usize) -> u32,
    pub edge_get_checksum: unsafe extern "C" fn(em: *const c_void, profile: usize) -> u32,
    pub edge_get_entry_counter_addr:
        unsafe extern "C" fn(em: *const c_void, profile: usize) -> *mut u32,
    pub edge_get_counter_addr:
        unsafe extern "C" fn(em: *const c_void, profile: usize, key: u32) -> *mut u32,
    pub edge_get_entry_threshold: unsafe extern "C" fn(em: *const c_void, collector: usize) -> u32,
    pub edge_get_backedge_threshold:
        unsafe extern "C" fn(em: *const c_void, collector: usize) -> u32,

    pub value_create_profile: unsafe extern "C" fn(
        em: *const c_void,
        collector: usize,
        method: usize,
        num_keys: u32,
        keys: *const u32,
    ) -> usize,
    pub value_add_profile_value:
        unsafe extern "C" fn(em: *const c_void, profile: usize, key: u32, value: u64) -> bool,
    pub value_get_top_value:
        unsafe extern "C" fn(em: *const c_void, profile: usize, key: u32, out: *mut u64) -> bool,
    pub value_dump_values: unsafe extern "C" fn(em: *const c_void, profile: usize, key: u32),
}

pub static PROFILE_ACCESS_TABLE: ProfileAccessTable = ProfileAccessTable {
    get_collector_kind,
    get_collector,
    get_method_profile,
    eb_create_profile,
    eb_get_entry_counter_addr,
    eb_get_backedge_counter_addr,
    eb_is_in_sync_mode,
    eb_sync_mode_callback,
    eb_get_entry_threshold,
    eb_get_backedge_threshold,
    edge_create_profile,
    edge_get_num_counters,
    edge_get_checksum,
    edge_get_entry_counter_addr,
    edge_get_counter_addr,
    edge_get_entry_threshold,
    edge_get_backedge_threshold,
    value_create_profile,
    value_add_profile_value,
    value_get_top_value,
    value_dump_values,
};

/// Context pointer to hand out alongside [`PROFILE_ACCESS_TABLE`]. The caller
/// must keep `access` (the `Arc` itself, not just its target) alive and
/// unmoved for as long as the JIT may call the table.
pub fn context_ptr(access: &Arc<dyn ProfileAccess>) -> *const c_void {
    std::ptr::from_ref(access).cast()
}

/// # Safety
/// `em` must be null or a pointer produced by [`context_ptr`] whose `Arc` is
/// still alive.
unsafe fn with_access<R>(
    em: *const c_void,
    fallback: R,
    f: impl FnOnce(&dyn ProfileAccess) -> R,
) -> R {
    if em.is_null() {
        return fallback;
    }
    // SAFETY: guaranteed by the caller.
    let access = unsafe { &*em.cast::<Arc<dyn ProfileAccess>>() };
    catch_unwind(AssertUnwindSafe(|| f(access.as_ref()))).unwrap_or(fallback)
}

/// # Safety
/// `keys` must be null or point at `num_keys` readable `u32`s.
unsafe fn key_slice<'a>(keys: *const u32, num_keys: u32) -> &'a [u32] {
    if keys.is_null() || num_keys == 0 {
        &[]
    } else {
        // SAFETY: guaranteed by the caller.
        unsafe { std::slice::from_raw_parts(keys, num_keys as usize) }
    }
}

fn raw_profile(profile: Option<ProfileHandle>) -> usize {
    profile.map_or(0, ProfileHandle::to_raw)
}

fn raw_counter(counter: Option<*mut u32>) -> *mut u32 {
    counter.unwrap_or(std::ptr::null_mut())
}

unsafe extern "C" fn get_collector_kind(em: *const c_void, collector: usize) -> u32 {
    unsafe {
        with_access(em, UNKNOWN_KIND, |access| {
            CollectorHandle::from_raw(collector)
                .and_then(|c| access.collector_kind(c))
                .map_or(UNKNOWN_KIND, |kind| kind as u32)
        })
    }
}

unsafe extern "C" fn get_collector(em: *const c_void, kind: u32, jit: usize, role: u32) -> usize {
    unsafe {
        with_access(em, 0, |access| {
            let (Some(kind), Some(jit), Some(role)) = (
                ProfileKind::from_raw(kind),
                JitHandle::from_raw(jit),
                ProfileRole::from_raw(role),
            ) else {
                return 0;
            };
            access
                .collector(kind, jit, role)
                .map_or(0, CollectorHandle::to_raw)
        })
    }
}

unsafe extern "C" fn get_method_profile(
    em: *const c_void,
    collector: usize,
    method: usize,
) -> usize {
    unsafe {
        with_access(em, 0, |access| {
            let (Some(collector), Some(method)) =
                (CollectorHandle::from_raw(collector), MethodHandle::from_raw(method))
            else {
                return 0;
            };
            raw_profile(access.method_profile(collector, method))
        })
    }
}

unsafe extern "C" fn eb_create_profile(
    em: *const c_void,
    collector: usize,
    method: usize,
) -> usize {
    unsafe {
        with_access(em, 0, |access| {
            let (Some(collector), Some(method)) =
                (CollectorHandle::from_raw(collector), MethodHandle::from_raw(method))
            else {
                return 0;
            };
            raw_profile(access.eb_create_profile(collector, method))
        })
    }
}

unsafe extern "C" fn eb_get_entry_counter_addr(em: *const c_void, profile: usize) -> *mut u32 {
    unsafe {
        with_access(em, std::ptr::null_mut(), |access| {
            raw_counter(ProfileHandle::from_raw(profile).and_then(|p| access.eb_entry_counter(p)))
        })
    }
}

unsafe extern "C" fn eb_get_backedge_counter_addr(em: *const c_void, profile: usize) -> *mut u32 {
    unsafe {
        with_access(em, std::ptr::null_mut(), |access| {
            raw_counter(
                ProfileHandle::from_raw(profile).and_then(|p| access.eb_backedge_counter(p)),
            )
        })
    }
}

unsafe extern "C" fn eb_is_in_sync_mode(em: *const c_void, collector: usize) -> bool {
    unsafe {
        with_access(em, false, |access| {
            CollectorHandle::from_raw(collector)
                .and_then(|c| access.eb_is_sync_mode(c))
                .unwrap_or(false)
        })
    }
}

unsafe extern "C" fn eb_sync_mode_callback(em: *const c_void, profile: usize) {
    unsafe {
        with_access(em, (), |access| {
            if let Some(profile) = ProfileHandle::from_raw(profile) {
                access.eb_sync_callback(profile);
            }
        });
    }
}

unsafe extern "C" fn eb_get_entry_threshold(em: *const c_void, collector: usize) -> u32 {
    unsafe {
        with_access(em, 0, |access| {
            CollectorHandle::from_raw(collector)
                .and_then(|c| access.eb_entry_threshold(c))
                .unwrap_or(0)
        })
    }
}

unsafe extern "C" fn eb_get_backedge_threshold(em: *const c_void, collector: usize) -> u32 {
    unsafe {
        with_access(em, 0, |access| {
            CollectorHandle::from_raw(collector)
                .and_then(|c| access.eb_backedge_threshold(c))
                .unwrap_or(0)
        })
    }
}

unsafe extern "C" fn edge_create_profile(
    em: *const c_void,
    collector: usize,
    method: usize,
    num_keys: u32,
    keys: *const u32,
    checksum: u32,
) -> usize {
    unsafe {
        let keys = key_slice(keys, num_keys);
        with_access(em, 0, |access| {
            let (Some(collector), Some(method)) =
                (CollectorHandle::from_raw(collector), MethodHandle::from_raw(method))
            else {
                return 0;
            };
            raw_profile(access.edge_create_profile(collector, method, keys, checksum))
        })
    }
}

unsafe extern "C" fn edge_get_num_counters(em: *const c_void, profile: usize) -> u32 {
    unsafe {
        with_access(em, 0, |access| {
            ProfileHandle::from_raw(profile)
                .and_then(|p| access.edge_num_counters(p))
                .unwrap_or(0)
        })
    }
}

unsafe extern "C" fn edge_get_checksum(em: *const c_void, profile: usize) -> u32 {
    unsafe {
        with_access(em, 0, |access| {
            ProfileHandle::from_raw(profile)
                .and_then(|p| access.edge_checksum(p))
                .unwrap_or(0)
        })
    }
}

unsafe extern "C" fn edge_get_entry_counter_addr(em: *const c_void, profile: usize) -> *mut u32 {
    unsafe {
        with_access(em, std::ptr::null_mut(), |access| {
            raw_counter(ProfileHandle::from_raw(profile).and_then(|p| access.edge_entry_counter(p)))
        })
    }
}

unsafe extern "C" fn edge_get_counter_addr(
    em: *const c_void,
    profile: usize,
    key: u32,
) -> *mut u32 {
    unsafe {
        with_access(em, std::ptr::null_mut(), |access| {
            raw_counter(ProfileHandle::from_raw(profile).and_then(|p| access.edge_counter(p, key)))
        })
    }
}

unsafe extern "C" fn edge_get_entry_threshold(em: *const c_void, collector: usize) -> u32 {
    unsafe {
        with_access(em, 0, |access| {
            CollectorHandle::from_raw(collector)
                .and_then(|c| access.edge_entry_threshold(c))
                .unwrap_or(0)
        })
    }
}

unsafe extern "C" fn edge_get_backedge_threshold(em: *const c_void, collector: usize) -> u32 {
    unsafe {
        with_access(em, 0, |access| {
            CollectorHandle::from_raw(collector)
                .and_then(|c| access.edge_backedge_threshold(c))
                .unwrap_or(0)
        })
    }
}

unsafe extern "C" fn value_create_profile(
    em: *const c_void,
    collector: usize,
    method: usize,
    num_keys: u32,
    keys: *const u32,
) -> usize {
    unsafe {
        let keys = key_slice(keys, num_keys);
        with_access(em, 0, |access| {
            let (Some(collector), Some(method)) =
                (CollectorHandle::from_raw(collector), MethodHandle::from_raw(method))
            else {
                return 0;
            };
            raw_profile(access.value_create_profile(collector, method, keys))
        })
    }
}

unsafe extern "C" fn value_add_profile_value(
    em: *const c_void,
    profile: usize,
    key: u32,
    value: u64,
) -> bool {
    unsafe {
        with_access(em, false, |access| {
            ProfileHandle::from_raw(profile).is_some_and(|p| access.value_add(p, key, value))
        })
    }
}

unsafe extern "C" fn value_get_top_value(
    em: *const c_void,
    profile: usize,
    key: u32,
    out: *mut u64,
) -> bool {
    unsafe {
        let top = with_access(em, None, |access| {
            ProfileHandle::from_raw(profile).and_then(|p| access.value_top(p, key))
        });
        match top {
            Some(value) if !out.is_null() => {
                out.write(value);
                true
            }
            _ => false,
        }
    }
}

unsafe extern "C" fn value_dump_values(em: *const c_void, profile: usize, key: u32) {
    unsafe {
        with_access(em, (), |access| {
            let Some(handle) = ProfileHandle::from_raw(profile) else {
                return;
            };
            let dump = access.value_dump(handle, key);
            for (slot, (value, frequency)) in dump.into_iter().enumerate() {
                tracing::info!(profile = ?handle, key, slot, value, frequency, "value profile");
            }
        });
    }
}
