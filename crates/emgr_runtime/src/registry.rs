//! Collectors of one initialization attempt and the profile handles given
//! out for them.

use std::num::NonZeroUsize;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use emgr_jit::{
    ClassHandle, CollectorHandle, JitHandle, MethodHandle, ProfileHandle, ProfileKind, ProfileRole,
};
use emgr_profile::{MethodProfile, ProfileCollector, ProfileError};

/// Collector handles are one-based positions in registration order. The
/// list only grows while chains are built.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: RwLock<Vec<Arc<dyn ProfileCollector>>>,
    profiles: RwLock<AHashMap<ProfileHandle, Arc<MethodProfile>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the next registered collector will get.
    pub fn next_handle(&self) -> CollectorHandle {
        let len = self.collectors.read().len();
        CollectorHandle::from_nonzero(NonZeroUsize::MIN.saturating_add(len))
    }

    pub fn register(&self, collector: Arc<dyn ProfileCollector>) {
        debug!(
            collector = collector.name(),
            kind = collector.kind().name(),
            handle = ?collector.handle(),
            "registered profile collector"
        );
        self.collectors.write().push(collector);
    }

    pub fn get(&self, handle: CollectorHandle) -> Option<Arc<dyn ProfileCollector>> {
        let index = handle.to_raw().checked_sub(1)?;
        self.collectors.read().get(index).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn ProfileCollector>> {
        self.collectors
            .read()
            .iter()
            .find(|collector| collector.name() == name)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn ProfileCollector>> {
        self.collectors.read().clone()
    }

    pub fn len(&self) -> usize {
        self.collectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.read().is_empty()
    }

    /// The collector of `kind` that `jit` produces or consumes.
    pub fn find(
        &self,
        kind: ProfileKind,
        jit: JitHandle,
        role: ProfileRole,
    ) -> Option<CollectorHandle> {
        self.collectors
            .read()
            .iter()
            .find(|collector| {
                collector.kind() == kind
                    && match role {
                        ProfileRole::Generate => collector.generator() == jit,
                        ProfileRole::Use => collector.consumers().contains(&jit),
                    }
            })
            .map(|collector| collector.handle())
    }

    /// Make `profile` resolvable through its handle.
    pub fn track(&self, profile: Arc<MethodProfile>) -> ProfileHandle {
        let handle = profile.handle();
        self.profiles.write().entry(handle).or_insert(profile);
        handle
    }

    pub fn profile(&self, handle: ProfileHandle) -> Option<Arc<MethodProfile>> {
        self.profiles.read().get(&handle).cloned()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn method_profile(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
    ) -> Option<ProfileHandle> {
        let profile = self.get(collector)?.profile(method)?;
        Some(self.track(profile))
    }

    /// Create through `create` and track the result; failures are logged
    /// and reported as `None`.
    pub fn create_with(
        &self,
        collector: CollectorHandle,
        method: MethodHandle,
        create: impl FnOnce(
            &dyn ProfileCollector,
        ) -> Option<Result<Arc<MethodProfile>, ProfileError>>,
    ) -> Option<ProfileHandle> {
        let owner = self.get(collector)?;
        match create(owner.as_ref())? {
            Ok(profile) => Some(self.track(profile)),
            Err(err) => {
                debug!(collector = owner.name(), ?method, %err, "profile not created");
                None
            }
        }
    }

    pub fn class_unloading(&self, class: ClassHandle) {
        for collector in self.collectors.read().iter() {
            collector.on_class_unload(class);
        }
    }

    pub fn layout(&self) -> Vec<CollectorLayout> {
        self.collectors
            .read()
            .iter()
            .map(|collector| CollectorLayout {
                name: collector.name().to_string(),
                kind: collector.kind(),
                handle: collector.handle().to_raw(),
                generator: collector.generator().to_raw(),
                consumers: collector.consumers().iter().map(|jit| jit.to_raw()).collect(),
                periodic: collector.as_tbs_client().is_some(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorLayout {
    pub name: String,
    pub kind: ProfileKind,
    pub handle: usize,
    pub generator: usize,
    pub consumers: Vec<usize>,
    /// Scanned on timer ticks.
    pub periodic: bool,
}
