//! Sorter/compressor core allocation.
//!
//! For every chip with a routing table, the planner picks the first
//! non-monitor core not already claimed by another system binary as the
//! sorter, and hands every remaining free non-monitor core to the compressor
//! binary. A chip left with no free cores gets no targets here; the loader
//! surfaces it as a host-fallback candidate.

use tracing::{debug, warn};

use spinn_machine::{ChipLocation, Machine, RoutingTables};

use crate::targets::{CoreSubsets, ExecutableTargets, ExecutableType};

/// The planner's output: targets plus the binary names the rest of the
/// pipeline keys lookups by.
#[derive(Debug, Clone)]
pub struct CompressionPlan {
    /// Sorter and compressor binaries mapped to their cores.
    pub targets: ExecutableTargets,
    /// Sorter binary name.
    pub sorter_binary: String,
    /// Compressor binary name.
    pub compressor_binary: String,
}

impl CompressionPlan {
    /// The sorter core for a chip, if one was allocated.
    #[must_use]
    pub fn sorter_for(&self, chip: ChipLocation) -> Option<u8> {
        self.targets
            .cores_for(&self.sorter_binary)
            .and_then(|subsets| subsets.processors_on(chip).next())
    }

    /// Compressor cores for a chip, ascending.
    #[must_use]
    pub fn compressors_for(&self, chip: ChipLocation) -> Vec<u8> {
        self.targets
            .cores_for(&self.compressor_binary)
            .map(|subsets| subsets.processors_on(chip).collect())
            .unwrap_or_default()
    }
}

/// Allocate sorter and compressor cores for every chip with a routing table.
///
/// `cores_in_use` names cores already claimed by other system binaries;
/// monitor cores and virtual chips are skipped unconditionally.
#[must_use]
pub fn plan_cores(
    machine: &Machine,
    tables: &RoutingTables,
    sorter_binary: &str,
    compressor_binary: &str,
    cores_in_use: &CoreSubsets,
) -> CompressionPlan {
    let mut sorter_cores = CoreSubsets::new();
    let mut compressor_cores = CoreSubsets::new();

    for table in tables.iter() {
        let chip = table.location;
        let Some(chip_model) = machine.chip_at(chip) else {
            warn!("routing table for unknown chip {chip}; skipping");
            continue;
        };
        if chip_model.virtual_chip {
            continue;
        }

        let mut sorter = None;
        for processor in chip_model.placable_processors() {
            if cores_in_use.contains(chip, processor.id) {
                continue;
            }
            if sorter.is_none() {
                sorter = Some(processor.id);
                sorter_cores.add_processor(chip, processor.id);
            } else {
                compressor_cores.add_processor(chip, processor.id);
            }
        }

        match sorter {
            Some(p) => debug!(
                "chip {chip}: sorter on core {p}, {} compressor cores",
                compressor_cores.processors_on(chip).count()
            ),
            // Surfaced later as a host-fallback candidate by the loader.
            None => warn!("chip {chip}: no free cores for on-chip compression"),
        }
    }

    let mut targets = ExecutableTargets::new();
    targets.add_subsets(sorter_binary, sorter_cores, ExecutableType::System);
    targets.add_subsets(compressor_binary, compressor_cores, ExecutableType::System);

    CompressionPlan {
        targets,
        sorter_binary: sorter_binary.to_owned(),
        compressor_binary: compressor_binary.to_owned(),
    }
}
