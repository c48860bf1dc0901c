//! Value profiling: one top-N table per instrumented instruction.

mod tnv;
mod update;

use std::sync::Arc;

use tracing::trace;

use emgr_config::ValueParams;
use emgr_jit::{CollectorHandle, JitHandle, MethodHandle, ProfileKind};

pub use tnv::{Divided, FirstN, TnvAlgorithm, TnvTable, algorithm_for};
pub use update::{UpdateDiscipline, UpdateGuards, discipline_for};

use crate::collector::{CollectorInfo, ProfileCollector, ProfileMap};
use crate::error::ProfileError;
use crate::profile::MethodProfile;

#[derive(Debug)]
pub struct ValueMethodProfile {
    method: MethodHandle,
    collector: CollectorHandle,
    keys: Box<[u32]>,
    tables: Box<[TnvTable]>,
    guards: UpdateGuards,
}

impl ValueMethodProfile {
    pub const fn method(&self) -> MethodHandle {
        self.method
    }

    pub const fn collector(&self) -> CollectorHandle {
        self.collector
    }

    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    fn table(&self, key: u32) -> Result<&TnvTable, ProfileError> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .and_then(|index| self.tables.get(index))
            .ok_or(ProfileError::UnknownKey(key))
    }
}

/// Value collectors never report hotness; they are read by consuming JITs.
pub struct ValueProfileCollector {
    info: CollectorInfo,
    params: ValueParams,
    algorithm: Box<dyn TnvAlgorithm>,
    discipline: Box<dyn UpdateDiscipline>,
    profiles: ProfileMap,
}

impl ValueProfileCollector {
    pub fn new(
        handle: CollectorHandle,
        name: impl Into<String>,
        generator: JitHandle,
        params: ValueParams,
    ) -> Self {
        Self {
            info: CollectorInfo::new(handle, name, generator),
            algorithm: algorithm_for(&params),
            discipline: discipline_for(params.update_strategy),
            params,
            profiles: ProfileMap::default(),
        }
    }

    pub const fn params(&self) -> &ValueParams {
        &self.params
    }

    /// One table per key. Keys must be distinct.
    pub fn create_profile(
        &self,
        method: MethodHandle,
        keys: &[u32],
    ) -> Result<Arc<MethodProfile>, ProfileError> {
        for (index, key) in keys.iter().enumerate() {
            if keys[..index].contains(key) {
                return Err(ProfileError::DuplicateKey(*key));
            }
        }

        let handle = self.info.handle();
        let profile = self.profiles.insert_new(&self.info, method, || {
            MethodProfile::Value(ValueMethodProfile {
                method,
                collector: handle,
                keys: keys.into(),
                tables: keys
                    .iter()
                    .map(|_| TnvTable::new(self.params.steady_size, self.params.clear_size))
                    .collect(),
                guards: UpdateGuards::default(),
            })
        })?;
        trace!(
            collector = self.info.name(),
            ?method,
            keys = keys.len(),
            "created value profile"
        );
        Ok(profile)
    }

    /// Record one occurrence of `value` at `key`. `Ok(false)` means a flagged
    /// discipline dropped the sample under contention.
    pub fn add_value(
        &self,
        profile: &ValueMethodProfile,
        key: u32,
        value: u64,
    ) -> Result<bool, ProfileError> {
        self.info.check_owner(profile.collector)?;
        let table = profile.table(key)?;
        Ok(self
            .discipline
            .add_value(&profile.guards, table, self.algorithm.as_ref(), value))
    }

    /// Most frequent value at `key`, after folding the pending run.
    pub fn top_value(
        &self,
        profile: &ValueMethodProfile,
        key: u32,
    ) -> Result<Option<u64>, ProfileError> {
        let table = self.flushed(profile, key)?;
        Ok(table.find_max())
    }

    /// Steady contents at `key`, most frequent first.
    pub fn dump(
        &self,
        profile: &ValueMethodProfile,
        key: u32,
    ) -> Result<Vec<(u64, u32)>, ProfileError> {
        let table = self.flushed(profile, key)?;
        Ok(table.dump())
    }

    fn flushed<'p>(
        &self,
        profile: &'p ValueMethodProfile,
        key: u32,
    ) -> Result<&'p TnvTable, ProfileError> {
        self.info.check_owner(profile.collector)?;
        let table = profile.table(key)?;
        self.discipline
            .flush(&profile.guards, table, self.algorithm.as_ref());
        Ok(table)
    }
}

impl ProfileCollector for ValueProfileCollector {
    fn info(&self) -> &CollectorInfo {
        &self.info
    }

    fn kind(&self) -> ProfileKind {
        ProfileKind::Value
    }

    fn profile(&self, method: MethodHandle) -> Option<Arc<MethodProfile>> {
        self.profiles.get(method)
    }

    fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    fn as_value(&self) -> Option<&ValueProfileCollector> {
        Some(self)
    }
}
