//! Executable target bookkeeping.
//!
//! `ExecutableTargets` maps each binary to the set of cores it will be
//! flooded onto. The planner builds one incrementally; the execution driver
//! consumes it to load binaries and to know which cores to poll.

use std::collections::{BTreeMap, BTreeSet};

use spinn_machine::ChipLocation;

/// How a binary is loaded and accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableType {
    /// Toolchain-internal binary (expanders, compressors); not part of the
    /// user's application and stopped once its job is done.
    System,
    /// User application binary.
    Application,
}

/// A set of cores, grouped by chip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreSubsets {
    cores: BTreeMap<ChipLocation, BTreeSet<u8>>,
}

impl CoreSubsets {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one core.
    pub fn add_processor(&mut self, chip: ChipLocation, processor: u8) {
        self.cores.entry(chip).or_default().insert(processor);
    }

    /// Whether a specific core is in the set.
    #[must_use]
    pub fn contains(&self, chip: ChipLocation, processor: u8) -> bool {
        self.cores.get(&chip).is_some_and(|s| s.contains(&processor))
    }

    /// Processors on one chip, ascending.
    pub fn processors_on(&self, chip: ChipLocation) -> impl Iterator<Item = u8> + '_ {
        self.cores.get(&chip).into_iter().flatten().copied()
    }

    /// Per-chip view, in chip order.
    pub fn iter(&self) -> impl Iterator<Item = (ChipLocation, &BTreeSet<u8>)> {
        self.cores.iter().map(|(chip, set)| (*chip, set))
    }

    /// Chips with at least one core.
    pub fn chips(&self) -> impl Iterator<Item = ChipLocation> + '_ {
        self.cores.keys().copied()
    }

    /// Total cores across all chips.
    #[must_use]
    pub fn n_cores(&self) -> usize {
        self.cores.values().map(BTreeSet::len).sum()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cores.values().all(BTreeSet::is_empty)
    }

    /// Union with another set.
    pub fn extend_from(&mut self, other: &CoreSubsets) {
        for (chip, set) in &other.cores {
            self.cores.entry(*chip).or_default().extend(set);
        }
    }
}

/// A mapping from binary name to the cores it runs on.
#[derive(Debug, Clone, Default)]
pub struct ExecutableTargets {
    targets: BTreeMap<String, (CoreSubsets, ExecutableType)>,
}

impl ExecutableTargets {
    /// Empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register cores for a binary, merging with any already registered.
    pub fn add_subsets(
        &mut self,
        binary: impl Into<String>,
        subsets: CoreSubsets,
        executable_type: ExecutableType,
    ) {
        let entry = self
            .targets
            .entry(binary.into())
            .or_insert_with(|| (CoreSubsets::new(), executable_type));
        entry.0.extend_from(&subsets);
    }

    /// Cores registered for a binary.
    #[must_use]
    pub fn cores_for(&self, binary: &str) -> Option<&CoreSubsets> {
        self.targets.get(binary).map(|(subsets, _)| subsets)
    }

    /// Binary names in name order.
    pub fn binaries(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Union of all binaries' cores.
    #[must_use]
    pub fn all_core_subsets(&self) -> CoreSubsets {
        let mut all = CoreSubsets::new();
        for (subsets, _) in self.targets.values() {
            all.extend_from(subsets);
        }
        all
    }

    /// Total cores across all binaries.
    #[must_use]
    pub fn total_processors(&self) -> usize {
        self.all_core_subsets().n_cores()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsets_deduplicate_cores() {
        let mut subsets = CoreSubsets::new();
        let chip = ChipLocation::new(0, 0);
        subsets.add_processor(chip, 1);
        subsets.add_processor(chip, 1);
        subsets.add_processor(chip, 2);
        assert_eq!(subsets.n_cores(), 2);
        assert!(subsets.contains(chip, 1));
        assert!(!subsets.contains(chip, 3));
    }

    #[test]
    fn targets_union_covers_all_binaries() {
        let chip_a = ChipLocation::new(0, 0);
        let chip_b = ChipLocation::new(1, 0);
        let mut sorters = CoreSubsets::new();
        sorters.add_processor(chip_a, 1);
        let mut compressors = CoreSubsets::new();
        compressors.add_processor(chip_a, 2);
        compressors.add_processor(chip_b, 1);

        let mut targets = ExecutableTargets::new();
        targets.add_subsets("sorter.aplx", sorters, ExecutableType::System);
        targets.add_subsets("compressor.aplx", compressors, ExecutableType::System);

        assert_eq!(targets.total_processors(), 3);
        assert_eq!(targets.cores_for("sorter.aplx").unwrap().n_cores(), 1);
        assert_eq!(targets.binaries().count(), 2);
    }
}
