//! Machine bitfield compression orchestrator.
//!
//! Runs the sorter-and-searcher/compressor pair on every chip with a routing
//! table: provisions SDRAM through the loader, floods and runs the binaries
//! behind a SYNC0 barrier, classifies every sorter's USER1/USER2 result, and
//! hands each failed chip to the host compressor. Chips that cannot even be
//! provisioned (no SDRAM, no cores) skip the on-chip run entirely and go
//! straight to the host path.
//!
//! Failure of one chip never aborts the run; only wire-protocol faults and a
//! cores-won't-run condition are fatal.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use spinn_machine::{ChipLocation, Machine, RoutingTable, RoutingTables};

use crate::arena::{SdramArena, SdramBlock};
use crate::config::CompressionConfig;
use crate::error::Result;
use crate::executor::run_system_application;
use crate::host::{host_fallback, KeyAtomMap};
use crate::loader::{load_chip, BitFieldSource};
use crate::planner::{plan_cores, CompressionPlan};
use crate::provenance::{CompressionProvenance, ProvenanceItem};
use crate::targets::{CoreSubsets, ExecutableTargets, ExecutableType};
use crate::transceiver::Transceiver;

/// Sorter-and-searcher binary, one core per chip.
pub const SORTER_APLX: &str = "bit_field_sorter_and_searcher.aplx";

/// Which compression algorithm the compressor cores run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressorKind {
    /// Ordered-covering compression; slower, best ratios.
    OrderedCovering,
    /// Pairwise merging; fast, weaker ratios.
    Pair,
}

impl CompressorKind {
    /// Compressor binary for this algorithm.
    #[must_use]
    pub const fn aplx(self) -> &'static str {
        match self {
            Self::OrderedCovering => "bit_field_ordered_covering_compressor.aplx",
            Self::Pair => "bit_field_pair_compressor.aplx",
        }
    }

    /// Human-readable algorithm name for logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::OrderedCovering => "ordered covering",
            Self::Pair => "pair",
        }
    }
}

/// What a bitfield compression run produced.
#[derive(Debug, Default)]
pub struct CompressionOutcome {
    /// Per-sorter results, covering every chip that ran on-chip.
    pub provenance: CompressionProvenance,
    /// Tables compressed on the host because their chip could not.
    pub host_compressed: Vec<RoutingTable>,
}

/// The machine bitfield compressor.
#[derive(Debug)]
pub struct MachineBitFieldCompressor<'a> {
    machine: &'a Machine,
    kind: CompressorKind,
    config: CompressionConfig,
}

impl<'a> MachineBitFieldCompressor<'a> {
    /// Compressor over a machine, with the given algorithm and tuning.
    #[must_use]
    pub const fn new(machine: &'a Machine, kind: CompressorKind, config: CompressionConfig) -> Self {
        Self { machine, kind, config }
    }

    /// Compress every table, merging bitfields in on-chip where possible.
    ///
    /// `routing_app_id` owns the loaded router entries; `compressor_app_id`
    /// is a free id the compressor binaries run (and are stopped) under.
    /// `usable_sdram` lists per chip the SDRAM regions the sorter may hand to
    /// its compressors, and that the loader may steal from.
    ///
    /// # Errors
    ///
    /// Wire-protocol failures and cores refusing to run are fatal;
    /// [`crate::CompressionError::TableTooBig`] if a host-fallback table
    /// cannot be made to fit.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        txrx: &mut dyn Transceiver,
        tables: &RoutingTables,
        routing_app_id: u8,
        compressor_app_id: u8,
        bitfield_sources: &BTreeMap<ChipLocation, Vec<BitFieldSource>>,
        usable_sdram: &BTreeMap<ChipLocation, Vec<SdramBlock>>,
        cores_in_use: &CoreSubsets,
        atoms: &KeyAtomMap,
    ) -> Result<CompressionOutcome> {
        info!(
            "compressing {} routing tables with bitfields ({} compressor)",
            tables.len(),
            self.kind.label()
        );
        let plan = plan_cores(
            self.machine,
            tables,
            SORTER_APLX,
            self.kind.aplx(),
            cores_in_use,
        );

        let mut host_chips: Vec<ChipLocation> = Vec::new();
        let mut loaded_chips: Vec<ChipLocation> = Vec::new();
        for table in tables.iter() {
            let chip = table.location;
            let mut arena = SdramArena::new(chip);
            for block in usable_sdram.get(&chip).into_iter().flatten() {
                arena.add_block(block.base, block.size);
            }
            let sources = bitfield_sources
                .get(&chip)
                .map_or(&[] as &[BitFieldSource], Vec::as_slice);
            match load_chip(
                txrx,
                table,
                routing_app_id,
                compressor_app_id,
                &plan,
                &mut arena,
                sources,
                &self.config,
            ) {
                Ok(()) => loaded_chips.push(chip),
                Err(e) if e.is_recoverable_per_chip() => {
                    warn!("chip {chip}: cannot run on-chip compression ({e})");
                    host_chips.push(chip);
                }
                Err(e) => return Err(e),
            }
        }

        let mut provenance = CompressionProvenance::new();
        if !loaded_chips.is_empty() {
            let targets = targets_excluding(&plan, &host_chips);
            run_system_application(
                txrx,
                &targets,
                compressor_app_id,
                true,
                Some(&[SORTER_APLX]),
                Some(self.config.time_per_attempt),
            )?;

            // Classification is total: every sorter is read and recorded,
            // whatever the first one said.
            for &chip in &loaded_chips {
                let Some(sorter) = plan.sorter_for(chip) else {
                    continue;
                };
                let result_code = txrx.read_user_register(chip, sorter, 1)?;
                let bitfields_merged = txrx.read_user_register(chip, sorter, 2)?;
                provenance.record(ProvenanceItem {
                    chip,
                    processor: sorter,
                    result_code,
                    bitfields_merged,
                });
                if result_code == 0 {
                    debug!("chip {chip}: on-chip compression merged {bitfields_merged} bitfields");
                } else {
                    warn!("chip {chip}: on-chip compression failed (code {result_code})");
                    host_chips.push(chip);
                }
            }

            txrx.stop_application(compressor_app_id)?;
        }

        let host_compressed = if host_chips.is_empty() {
            Vec::new()
        } else {
            warn!(
                "{} of {} chips falling back to host compression",
                host_chips.len(),
                tables.len()
            );
            host_fallback(txrx, tables, &host_chips, atoms, routing_app_id)?
        };

        Ok(CompressionOutcome {
            provenance,
            host_compressed,
        })
    }
}

/// The plan's targets with the named chips' cores removed.
fn targets_excluding(plan: &CompressionPlan, excluded: &[ChipLocation]) -> ExecutableTargets {
    let mut targets = ExecutableTargets::new();
    for binary in plan.targets.binaries() {
        let Some(subsets) = plan.targets.cores_for(binary) else {
            continue;
        };
        let mut kept = CoreSubsets::new();
        for (chip, processors) in subsets.iter() {
            if excluded.contains(&chip) {
                continue;
            }
            for &p in processors {
                kept.add_processor(chip, p);
            }
        }
        if !kept.is_empty() {
            targets.add_subsets(binary, kept, ExecutableType::System);
        }
    }
    targets
}
