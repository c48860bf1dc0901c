//! Update disciplines for value profiles.
//!
//! The discipline is picked once per collector and decides how a profile's
//! mutex and busy flag guard the two phases of an update: counting a repeat
//! of the pending value, and folding a run into the slots.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use emgr_config::UpdateStrategy;

use super::tnv::{TnvAlgorithm, TnvTable};

/// Per-profile synchronization state.
#[derive(Debug, Default)]
pub struct UpdateGuards {
    lock: Mutex<()>,
    busy: AtomicBool,
}

impl UpdateGuards {
    fn try_claim(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

pub trait UpdateDiscipline: Send + Sync {
    /// Record `value`; `false` when the update was dropped because another
    /// thread held the profile.
    fn add_value(
        &self,
        guards: &UpdateGuards,
        table: &TnvTable,
        algo: &dyn TnvAlgorithm,
        value: u64,
    ) -> bool;

    /// Fold any pending run before a read. Flagged disciplines skip the fold
    /// while a writer is active and report the slots as they stand.
    fn flush(&self, guards: &UpdateGuards, table: &TnvTable, algo: &dyn TnvAlgorithm);
}

pub fn discipline_for(strategy: UpdateStrategy) -> Box<dyn UpdateDiscipline> {
    match strategy {
        UpdateStrategy::Locked => Box::new(Locked),
        UpdateStrategy::LockedInsert => Box::new(LockedInsert),
        UpdateStrategy::FlaggedAll => Box::new(FlaggedAll),
        UpdateStrategy::FlaggedInsert => Box::new(FlaggedInsert),
        UpdateStrategy::Unsafe => Box::new(Unsynchronized),
    }
}

fn apply(table: &TnvTable, algo: &dyn TnvAlgorithm, value: u64) {
    if !table.record_repeat(value) {
        table.switch_value(value, algo);
    }
}

/// Whole update under the profile mutex.
struct Locked;

impl UpdateDiscipline for Locked {
    fn add_value(
        &self,
        guards: &UpdateGuards,
        table: &TnvTable,
        algo: &dyn TnvAlgorithm,
        value: u64,
    ) -> bool {
        let _guard = guards.lock.lock();
        apply(table, algo, value);
        true
    }

    fn flush(&self, guards: &UpdateGuards, table: &TnvTable, algo: &dyn TnvAlgorithm) {
        let _guard = guards.lock.lock();
        table.flush(algo);
    }
}

/// Repeats counted lock-free; only the fold takes the mutex.
struct LockedInsert;

impl UpdateDiscipline for LockedInsert {
    fn add_value(
        &self,
        guards: &UpdateGuards,
        table: &TnvTable,
        algo: &dyn TnvAlgorithm,
        value: u64,
    ) -> bool {
        if !table.record_repeat(value) {
            let _guard = guards.lock.lock();
            table.switch_value(value, algo);
        }
        true
    }

    fn flush(&self, guards: &UpdateGuards, table: &TnvTable, algo: &dyn TnvAlgorithm) {
        let _guard = guards.lock.lock();
        table.flush(algo);
    }
}

/// Whole update under the busy flag; contended updates are dropped.
struct FlaggedAll;

impl UpdateDiscipline for FlaggedAll {
    fn add_value(
        &self,
        guards: &UpdateGuards,
        table: &TnvTable,
        algo: &dyn TnvAlgorithm,
        value: u64,
    ) -> bool {
        if !guards.try_claim() {
            return false;
        }
        apply(table, algo, value);
        guards.release();
        true
    }

    fn flush(&self, guards: &UpdateGuards, table: &TnvTable, algo: &dyn TnvAlgorithm) {
        if guards.try_claim() {
            table.flush(algo);
            guards.release();
        }
    }
}

/// Repeats counted freely; a contended fold is dropped.
struct FlaggedInsert;

impl UpdateDiscipline for FlaggedInsert {
    fn add_value(
        &self,
        guards: &UpdateGuards,
        table: &TnvTable,
        algo: &dyn TnvAlgorithm,
        value: u64,
    ) -> bool {
        if table.record_repeat(value) {
            return true;
        }
        if !guards.try_claim() {
            return false;
        }
        table.switch_value(value, algo);
        guards.release();
        true
    }

    fn flush(&self, guards: &UpdateGuards, table: &TnvTable, algo: &dyn TnvAlgorithm) {
        if guards.try_claim() {
            table.flush(algo);
            guards.release();
        }
    }
}

/// No synchronization. Racing writers may lose counts.
struct Unsynchronized;

impl UpdateDiscipline for Unsynchronized {
    fn add_value(
        &self,
        _guards: &UpdateGuards,
        table: &TnvTable,
        algo: &dyn TnvAlgorithm,
        value: u64,
    ) -> bool {
        apply(table, algo, value);
        true
    }

    fn flush(&self, _guards: &UpdateGuards, table: &TnvTable, algo: &dyn TnvAlgorithm) {
        table.flush(algo);
    }
}
