//! The collector contract and the bookkeeping every strategy shares.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use emgr_jit::{ClassHandle, CollectorHandle, JitHandle, MethodHandle, ProfileKind};

use crate::eb::EbProfileCollector;
use crate::edge::EdgeProfileCollector;
use crate::error::ProfileError;
use crate::profile::MethodProfile;
use crate::value::ValueProfileCollector;

/// A named source of method profiles, produced by one JIT and read by any
/// number of later JITs in the same chain.
pub trait ProfileCollector: Send + Sync {
    fn info(&self) -> &CollectorInfo;

    fn kind(&self) -> ProfileKind;

    fn handle(&self) -> CollectorHandle {
        self.info().handle()
    }

    fn name(&self) -> &str {
        self.info().name()
    }

    fn generator(&self) -> JitHandle {
        self.info().generator()
    }

    fn consumers(&self) -> Vec<JitHandle> {
        self.info().consumers()
    }

    fn profile(&self, method: MethodHandle) -> Option<Arc<MethodProfile>>;

    fn profile_count(&self) -> usize;

    /// Collectors that scan their profiles on timer ticks.
    fn as_tbs_client(&self) -> Option<&dyn TbsClient> {
        None
    }

    /// Profiles of unloaded classes stay in place; counters may still be
    /// referenced by code the VM has not discarded yet.
    fn on_class_unload(&self, _class: ClassHandle) {}

    fn as_entry_backedge(&self) -> Option<&EbProfileCollector> {
        None
    }

    fn as_edge(&self) -> Option<&EdgeProfileCollector> {
        None
    }

    fn as_value(&self) -> Option<&ValueProfileCollector> {
        None
    }
}

/// Periodic callback driven by the execution manager's tick thread.
pub trait TbsClient: Send + Sync {
    /// Tick of the first callback.
    fn initial_timeout(&self) -> u32;

    /// Ticks between callbacks after the first.
    fn timeout(&self) -> u32;

    /// Scan for profiles that became hot since the last call. Each returned
    /// profile is reported exactly once.
    fn on_timeout(&self) -> Vec<Arc<MethodProfile>>;
}

/// Identity and JIT wiring of a collector.
#[derive(Debug)]
pub struct CollectorInfo {
    handle: CollectorHandle,
    name: String,
    generator: JitHandle,
    consumers: RwLock<Vec<JitHandle>>,
}

impl CollectorInfo {
    pub fn new(handle: CollectorHandle, name: impl Into<String>, generator: JitHandle) -> Self {
        Self {
            handle,
            name: name.into(),
            generator,
            consumers: RwLock::new(Vec::new()),
        }
    }

    pub const fn handle(&self) -> CollectorHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn generator(&self) -> JitHandle {
        self.generator
    }

    pub fn consumers(&self) -> Vec<JitHandle> {
        self.consumers.read().clone()
    }

    pub fn add_consumer(&self, jit: JitHandle) {
        let mut consumers = self.consumers.write();
        if !consumers.contains(&jit) {
            consumers.push(jit);
        }
    }

    pub(crate) fn check_owner(&self, collector: CollectorHandle) -> Result<(), ProfileError> {
        if collector == self.handle {
            Ok(())
        } else {
            Err(ProfileError::ForeignProfile(self.name.clone()))
        }
    }
}

/// Per-method profile map with exclusive creation.
#[derive(Debug, Default)]
pub(crate) struct ProfileMap {
    profiles: RwLock<AHashMap<MethodHandle, Arc<MethodProfile>>>,
}

impl ProfileMap {
    pub fn get(&self, method: MethodHandle) -> Option<Arc<MethodProfile>> {
        self.profiles.read().get(&method).cloned()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    /// Runs `build` under the write lock so two racing creators cannot both
    /// succeed.
    pub fn insert_new(
        &self,
        info: &CollectorInfo,
        method: MethodHandle,
        build: impl FnOnce() -> MethodProfile,
    ) -> Result<Arc<MethodProfile>, ProfileError> {
        let mut profiles = self.profiles.write();
        if profiles.contains_key(&method) {
            return Err(ProfileError::AlreadyExists {
                collector: info.name().to_string(),
                method,
            });
        }
        let profile = Arc::new(build());
        profiles.insert(method, Arc::clone(&profile));
        Ok(profile)
    }
}

/// Incremental hotness scan.
///
/// Freshly created profiles land in `fresh` without touching the scan set;
/// each scan first folds them in, then keeps only those still cold. A profile
/// leaves the scan set the moment it is reported hot.
#[derive(Debug, Default)]
pub(crate) struct ScanQueue {
    fresh: Mutex<Vec<Arc<MethodProfile>>>,
    pending: Mutex<Vec<Arc<MethodProfile>>>,
}

impl ScanQueue {
    pub fn push(&self, profile: Arc<MethodProfile>) {
        self.fresh.lock().push(profile);
    }

    pub fn scan(&self, is_hot: impl Fn(&MethodProfile) -> bool) -> Vec<Arc<MethodProfile>> {
        let fresh = std::mem::take(&mut *self.fresh.lock());
        let mut pending = self.pending.lock();
        pending.extend(fresh);

        let mut hot = Vec::new();
        pending.retain(|profile| {
            if is_hot(profile) {
                hot.push(Arc::clone(profile));
                false
            } else {
                true
            }
        });
        hot
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
