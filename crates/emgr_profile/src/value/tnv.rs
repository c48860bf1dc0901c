//! Top-N-value tables.
//!
//! A table keeps the most frequent values seen at one instrumentation point.
//! Consecutive repeats of one value are coalesced into `(last_value,
//! num_times_profiled)` and only folded into the slot arrays when a different
//! value shows up or a reader asks for the result.
//!
//! Every cell is an atomic. Under the unsynchronized update disciplines
//! concurrent writers can lose or misattribute counts, but never corrupt
//! memory.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use emgr_config::{TnvAlgo, ValueParams};

/// One `(value, frequency)` cell; frequency 0 marks an empty slot.
#[derive(Debug, Default)]
pub struct TnvSlot {
    value: AtomicU64,
    frequency: AtomicU32,
}

impl TnvSlot {
    fn load(&self) -> (u64, u32) {
        (
            self.value.load(Ordering::Relaxed),
            self.frequency.load(Ordering::Relaxed),
        )
    }

    fn store(&self, value: u64, frequency: u32) {
        self.value.store(value, Ordering::Relaxed);
        self.frequency.store(frequency, Ordering::Relaxed);
    }

    fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Relaxed)
    }

    fn holds(&self, value: u64) -> bool {
        let (held, frequency) = self.load();
        frequency > 0 && held == value
    }

    /// Frequencies stick at `u32::MAX` instead of wrapping.
    fn bump(&self, count: u32) -> u32 {
        saturating_add(&self.frequency, count)
    }
}

fn saturating_add(cell: &AtomicU32, count: u32) -> u32 {
    let previous = cell
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some(current.saturating_add(count))
        })
        .unwrap_or_else(|current| current);
    previous.saturating_add(count)
}

#[derive(Debug)]
pub struct TnvTable {
    steady: Box<[TnvSlot]>,
    clear: Box<[TnvSlot]>,
    last_value: AtomicU64,
    num_times_profiled: AtomicU32,
    flushes: AtomicU32,
}

impl TnvTable {
    pub fn new(steady_size: usize, clear_size: usize) -> Self {
        Self {
            steady: (0..steady_size).map(|_| TnvSlot::default()).collect(),
            clear: (0..clear_size).map(|_| TnvSlot::default()).collect(),
            last_value: AtomicU64::new(0),
            num_times_profiled: AtomicU32::new(0),
            flushes: AtomicU32::new(0),
        }
    }

    /// Count another occurrence if `value` repeats the pending one.
    pub(crate) fn record_repeat(&self, value: u64) -> bool {
        if self.num_times_profiled.load(Ordering::Relaxed) > 0
            && self.last_value.load(Ordering::Relaxed) == value
        {
            saturating_add(&self.num_times_profiled, 1);
            true
        } else {
            false
        }
    }

    /// Fold the pending run into the slots and start a new run of `value`.
    pub(crate) fn switch_value(&self, value: u64, algo: &dyn TnvAlgorithm) {
        self.flush(algo);
        self.last_value.store(value, Ordering::Relaxed);
        self.num_times_profiled.store(1, Ordering::Relaxed);
    }

    pub(crate) fn flush(&self, algo: &dyn TnvAlgorithm) {
        let count = self.num_times_profiled.swap(0, Ordering::Relaxed);
        if count > 0 {
            algo.insert(self, self.last_value.load(Ordering::Relaxed), count);
        }
    }

    /// Most frequent steady value; ties go to the earliest slot.
    pub(crate) fn find_max(&self) -> Option<u64> {
        let mut best: Option<(u64, u32)> = None;
        for (value, frequency) in self.steady.iter().map(TnvSlot::load) {
            if frequency > best.map_or(0, |(_, f)| f) {
                best = Some((value, frequency));
            }
        }
        best.map(|(value, _)| value)
    }

    /// Non-empty steady slots, most frequent first.
    pub(crate) fn dump(&self) -> Vec<(u64, u32)> {
        let mut entries: Vec<_> = self
            .steady
            .iter()
            .map(TnvSlot::load)
            .filter(|&(_, frequency)| frequency > 0)
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }

    pub fn steady_size(&self) -> usize {
        self.steady.len()
    }

    pub fn clear_size(&self) -> usize {
        self.clear.len()
    }

    fn find(slots: &[TnvSlot], value: u64) -> Option<&TnvSlot> {
        slots.iter().find(|slot| slot.holds(value))
    }

    fn min_slot(slots: &[TnvSlot]) -> Option<&TnvSlot> {
        let mut min: Option<&TnvSlot> = None;
        for slot in slots {
            if min.is_none_or(|current| slot.frequency() < current.frequency()) {
                min = Some(slot);
            }
        }
        min
    }

    fn reset_clear(&self) {
        for slot in &self.clear {
            slot.store(0, 0);
        }
    }
}

/// Policy folding a coalesced run into a table's slots.
pub trait TnvAlgorithm: Send + Sync {
    fn insert(&self, table: &TnvTable, value: u64, count: u32);
}

pub fn algorithm_for(params: &ValueParams) -> Box<dyn TnvAlgorithm> {
    match params.algo {
        TnvAlgo::FirstN => Box::new(FirstN),
        TnvAlgo::Divided => Box::new(Divided {
            clear_interval: params.clear_interval,
        }),
    }
}

/// Known values accumulate; an unknown value takes the least frequent slot
/// only when its run beats that slot's frequency.
#[derive(Debug, Clone, Copy)]
pub struct FirstN;

impl TnvAlgorithm for FirstN {
    fn insert(&self, table: &TnvTable, value: u64, count: u32) {
        if let Some(slot) = TnvTable::find(&table.steady, value) {
            slot.bump(count);
            return;
        }
        match TnvTable::min_slot(&table.steady) {
            Some(slot) if count > slot.frequency() => slot.store(value, count),
            _ => {}
        }
    }
}

/// Steady/clear split.
///
/// Values outside the steady array are staged in the clear array, evicting
/// its least frequent entry. A staged value is promoted once its frequency
/// exceeds the steady minimum; the evicted steady entry takes its clear slot.
/// The clear array is emptied every `clear_interval` flushes (0 never).
#[derive(Debug, Clone, Copy)]
pub struct Divided {
    pub clear_interval: u32,
}

impl Divided {
    fn stage(table: &TnvTable, value: u64, count: u32) {
        let staged = if let Some(slot) = TnvTable::find(&table.clear, value) {
            slot.bump(count);
            slot
        } else if let Some(slot) = TnvTable::min_slot(&table.clear) {
            slot.store(value, count);
            slot
        } else {
            return;
        };

        let Some(steady_min) = TnvTable::min_slot(&table.steady) else {
            return;
        };
        let (staged_value, staged_frequency) = staged.load();
        let (evicted_value, evicted_frequency) = steady_min.load();
        if staged_frequency > evicted_frequency {
            steady_min.store(staged_value, staged_frequency);
            staged.store(evicted_value, evicted_frequency);
        }
    }
}

impl TnvAlgorithm for Divided {
    fn insert(&self, table: &TnvTable, value: u64, count: u32) {
        if let Some(slot) = TnvTable::find(&table.steady, value) {
            slot.bump(count);
        } else {
            Self::stage(table, value, count);
        }

        let flushes = table.flushes.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if self.clear_interval > 0 && flushes % self.clear_interval == 0 {
            table.reset_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(table: &TnvTable, algo: &dyn TnvAlgorithm, values: &[u64]) {
        for &value in values {
            if !table.record_repeat(value) {
                table.switch_value(value, algo);
            }
        }
        table.flush(algo);
    }

    #[test]
    fn test_first_n_counts_and_max() {
        let table = TnvTable::new(2, 0);
        let a = 0xA;
        let c = 0xC;
        feed(&table, &FirstN, &[a, a, a, c, c, c, c, c, c, c, a, a]);

        assert_eq!(table.dump(), vec![(c, 7), (a, 5)]);
        assert_eq!(table.find_max(), Some(c));
    }

    fn runs(runs: &[(u64, usize)]) -> Vec<u64> {
        runs.iter()
            .flat_map(|&(value, times)| std::iter::repeat_n(value, times))
            .collect()
    }

    #[test]
    fn test_heaviest_runs_survive_in_both_algorithms() {
        let (a, b, c) = (0xA, 0xB, 0xC);
        let values = runs(&[(a, 5), (b, 3), (c, 7)]);
        let algorithms: [&dyn TnvAlgorithm; 2] = [&FirstN, &Divided { clear_interval: 0 }];

        for algo in algorithms {
            let table = TnvTable::new(2, 1);
            feed(&table, algo, &values);
            assert_eq!(table.dump(), vec![(c, 7), (a, 5)]);
            assert_eq!(table.find_max(), Some(c));
        }
    }

    #[test]
    fn test_frequencies_saturate() {
        let table = TnvTable::new(1, 0);
        FirstN.insert(&table, 1, u32::MAX - 1);
        FirstN.insert(&table, 1, 5);
        assert_eq!(table.dump(), vec![(1, u32::MAX)]);

        table.switch_value(2, &FirstN);
        table.num_times_profiled.store(u32::MAX - 1, Ordering::Relaxed);
        assert!(table.record_repeat(2));
        assert!(table.record_repeat(2));
        assert_eq!(table.num_times_profiled.load(Ordering::Relaxed), u32::MAX);
    }

    #[test]
    fn test_first_n_replaces_minimum_only_when_beaten() {
        let table = TnvTable::new(2, 0);
        FirstN.insert(&table, 1, 5);
        FirstN.insert(&table, 2, 3);
        FirstN.insert(&table, 3, 3);
        assert_eq!(table.dump(), vec![(1, 5), (2, 3)]);

        FirstN.insert(&table, 3, 4);
        assert_eq!(table.dump(), vec![(1, 5), (3, 4)]);
    }

    #[test]
    fn test_coalescing_defers_until_value_changes() {
        let table = TnvTable::new(2, 0);
        for _ in 0..4 {
            if !table.record_repeat(9) {
                table.switch_value(9, &FirstN);
            }
        }
        assert_eq!(table.dump(), Vec::new());
        assert_eq!(table.num_times_profiled.load(Ordering::Relaxed), 4);

        table.flush(&FirstN);
        assert_eq!(table.dump(), vec![(9, 4)]);
        assert_eq!(table.num_times_profiled.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_zero_is_an_ordinary_value() {
        let table = TnvTable::new(2, 0);
        feed(&table, &FirstN, &[0, 0, 5]);
        assert_eq!(table.dump(), vec![(0, 2), (5, 1)]);
        assert_eq!(table.find_max(), Some(0));
    }

    #[test]
    fn test_find_max_ties_go_to_first_slot() {
        let table = TnvTable::new(3, 0);
        FirstN.insert(&table, 4, 2);
        FirstN.insert(&table, 8, 2);
        assert_eq!(table.find_max(), Some(4));
        assert_eq!(TnvTable::new(3, 0).find_max(), None);
    }

    #[test]
    fn test_divided_stages_before_promotion() {
        let divided = Divided { clear_interval: 0 };
        let table = TnvTable::new(2, 1);
        divided.insert(&table, 1, 5);
        divided.insert(&table, 2, 3);
        assert_eq!(table.dump(), vec![(1, 5), (2, 3)]);

        divided.insert(&table, 7, 2);
        assert_eq!(table.dump(), vec![(1, 5), (2, 3)]);
        assert_eq!(table.clear[0].load(), (7, 2));

        divided.insert(&table, 7, 2);
        assert_eq!(table.dump(), vec![(1, 5), (7, 4)]);
        assert_eq!(table.clear[0].load(), (2, 3));
    }

    #[test]
    fn test_divided_clear_reset_interval() {
        let divided = Divided { clear_interval: 3 };
        let table = TnvTable::new(1, 1);
        divided.insert(&table, 1, 10);
        divided.insert(&table, 2, 1);
        assert_eq!(table.clear[0].load(), (2, 1));

        divided.insert(&table, 2, 1);
        assert_eq!(table.clear[0].frequency(), 0);
        assert_eq!(table.dump(), vec![(1, 10)]);
    }

    #[test]
    fn test_algorithm_selection() {
        let table = TnvTable::new(1, 1);
        let params = ValueParams {
            algo: TnvAlgo::Divided,
            steady_size: 1,
            clear_size: 1,
            clear_interval: 0,
            ..ValueParams::default()
        };
        let algo = algorithm_for(&params);
        algo.insert(&table, 3, 1);
        assert_eq!(table.dump(), vec![(3, 1)]);
        assert_eq!(table.clear[0].load(), (0, 0));
    }
}
