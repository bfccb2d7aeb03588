//! Plain on-chip compression (no bitfields).
//!
//! The simple drivers: one compressor core per chip reads the packed table
//! out of SDRAM, compresses it and loads the router itself. No sorter, no
//! SYNC barrier, no SDRAM stealing and no host fallback; any core reporting
//! a nonzero result fails the whole run.
//!
//! Tables that already fit the router are skipped entirely unless the
//! configuration asks for compression regardless.

use tracing::{debug, info};

use spinn_machine::{ChipLocation, Machine, RoutingTables};

use crate::config::CompressionConfig;
use crate::encoder::encode_table_plain;
use crate::error::{CompressionError, Result};
use crate::executor::run_system_application;
use crate::loader::ROUTING_TABLE_SDRAM_TAG;
use crate::planner::plan_cores;
use crate::targets::CoreSubsets;
use crate::transceiver::Transceiver;

/// Unordered (ordered-covering style) plain compressor binary.
pub const UNORDERED_COMPRESSOR_APLX: &str = "simple_unordered_compressor.aplx";
/// Pairwise plain compressor binary.
pub const PAIR_COMPRESSOR_APLX: &str = "simple_pair_compressor.aplx";

/// What a plain on-chip run did per chip.
#[derive(Debug, Default)]
pub struct OnChipOutcome {
    /// Chips whose tables were compressed on-chip.
    pub compressed: Vec<ChipLocation>,
    /// Chips skipped because their tables already fit the router.
    pub skipped: Vec<ChipLocation>,
}

/// Run the unordered plain compressor over every routing table.
///
/// # Errors
///
/// See [`run_plain_compression`].
pub fn ordered_covering_compression(
    txrx: &mut dyn Transceiver,
    machine: &Machine,
    tables: &RoutingTables,
    routing_app_id: u8,
    compressor_app_id: u8,
    config: &CompressionConfig,
) -> Result<OnChipOutcome> {
    run_plain_compression(
        txrx,
        machine,
        tables,
        routing_app_id,
        compressor_app_id,
        config,
        UNORDERED_COMPRESSOR_APLX,
    )
}

/// Run the pairwise plain compressor over every routing table.
///
/// # Errors
///
/// See [`run_plain_compression`].
pub fn pair_compression(
    txrx: &mut dyn Transceiver,
    machine: &Machine,
    tables: &RoutingTables,
    routing_app_id: u8,
    compressor_app_id: u8,
    config: &CompressionConfig,
) -> Result<OnChipOutcome> {
    run_plain_compression(
        txrx,
        machine,
        tables,
        routing_app_id,
        compressor_app_id,
        config,
        PAIR_COMPRESSOR_APLX,
    )
}

/// Load tables into SDRAM, run `binary` on one core per chip and verify the
/// result codes.
///
/// # Errors
///
/// [`CompressionError::NoCoresAvailable`] if a chip has no free core;
/// [`CompressionError::MallocFailed`] if a table cannot be placed (the plain
/// path does not steal); [`CompressionError::CompressionFailed`] naming every
/// chip whose compressor reported a nonzero result.
pub fn run_plain_compression(
    txrx: &mut dyn Transceiver,
    machine: &Machine,
    tables: &RoutingTables,
    routing_app_id: u8,
    compressor_app_id: u8,
    config: &CompressionConfig,
    binary: &str,
) -> Result<OnChipOutcome> {
    let mut outcome = OnChipOutcome::default();
    let mut to_compress = RoutingTables::new();
    for table in tables.iter() {
        if table.fits_router() && !config.compress_as_much_as_possible {
            debug!(
                "chip {}: table fits the router ({} entries); not compressing",
                table.location,
                table.number_of_entries()
            );
            outcome.skipped.push(table.location);
        } else {
            to_compress.add(table.clone());
        }
    }
    if to_compress.is_empty() {
        info!("all routing tables fit the router; nothing to compress");
        return Ok(outcome);
    }

    // One core per chip; reuse the planner and take only its first pick.
    let plan = plan_cores(machine, &to_compress, binary, binary, &CoreSubsets::new());
    let mut run_cores = CoreSubsets::new();
    for table in to_compress.iter() {
        let chip = table.location;
        let core = plan
            .sorter_for(chip)
            .ok_or(CompressionError::NoCoresAvailable { chip })?;
        run_cores.add_processor(chip, core);

        let data = encode_table_plain(routing_app_id, config.compress_as_much_as_possible, table);
        let address = txrx.malloc_sdram(
            chip,
            data.len(),
            compressor_app_id,
            ROUTING_TABLE_SDRAM_TAG,
        )?;
        txrx.write_memory(chip, address, &data)?;
        txrx.write_user_register(chip, core, 1, address)?;
        debug!(
            "chip {chip}: plain table ({} entries) at {address:#x}, core {core}",
            table.number_of_entries()
        );
    }

    let targets = single_binary_targets(binary, &run_cores);
    run_system_application(
        txrx,
        &targets,
        compressor_app_id,
        false,
        None,
        Some(config.time_per_attempt),
    )?;

    let mut failed: Vec<ChipLocation> = Vec::new();
    for (chip, processors) in run_cores.iter() {
        for &core in processors {
            let result = txrx.read_user_register(chip, core, 1)?;
            if result == 0 {
                outcome.compressed.push(chip);
            } else {
                failed.push(chip);
            }
        }
    }
    txrx.stop_application(compressor_app_id)?;

    if failed.is_empty() {
        info!(
            "on-chip compression done: {} chips compressed, {} skipped",
            outcome.compressed.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    } else {
        Err(CompressionError::CompressionFailed { chips: failed })
    }
}

fn single_binary_targets(binary: &str, cores: &CoreSubsets) -> crate::targets::ExecutableTargets {
    let mut targets = crate::targets::ExecutableTargets::new();
    targets.add_subsets(binary, cores.clone(), crate::targets::ExecutableType::System);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTransceiver;
    use spinn_machine::{Chip, MulticastRoutingEntry, RoutingTable};

    fn setup(chips: &[ChipLocation]) -> (Machine, SimTransceiver, RoutingTables) {
        let mut machine = Machine::new();
        let mut tables = RoutingTables::new();
        for &location in chips {
            machine.add_chip(Chip::new(location, 4));
            let mut table = RoutingTable::new(location);
            for i in 0..4u32 {
                table
                    .entries
                    .push(MulticastRoutingEntry::new(i, 0xFFFF_FFFF).with_links(&[0]));
            }
            tables.add(table);
        }
        let txrx = SimTransceiver::new(machine.clone());
        (machine, txrx, tables)
    }

    fn compress_everything() -> CompressionConfig {
        CompressionConfig {
            compress_as_much_as_possible: true,
            ..Default::default()
        }
    }

    #[test]
    fn compresses_every_chip_and_stops_the_app() {
        let chips = [ChipLocation::new(0, 0), ChipLocation::new(1, 1)];
        let (machine, mut txrx, tables) = setup(&chips);
        let outcome =
            pair_compression(&mut txrx, &machine, &tables, 30, 17, &compress_everything())
                .unwrap();
        assert_eq!(outcome.compressed, chips);
        assert!(outcome.skipped.is_empty());
        assert_eq!(
            txrx.loaded_binaries(),
            &[(PAIR_COMPRESSOR_APLX.to_owned(), 17)]
        );
        assert_eq!(txrx.stopped_apps(), &[17]);
    }

    #[test]
    fn small_tables_are_skipped_by_default() {
        let chips = [ChipLocation::new(0, 0)];
        let (machine, mut txrx, tables) = setup(&chips);
        let outcome = ordered_covering_compression(
            &mut txrx,
            &machine,
            &tables,
            30,
            17,
            &CompressionConfig::default(),
        )
        .unwrap();
        assert_eq!(outcome.skipped, chips);
        assert!(outcome.compressed.is_empty());
        assert!(txrx.loaded_binaries().is_empty());
    }

    #[test]
    fn failed_core_names_its_chip() {
        let chips = [ChipLocation::new(0, 0), ChipLocation::new(1, 0)];
        let (machine, mut txrx, tables) = setup(&chips);
        txrx.script_core_result(ChipLocation::new(1, 0), 1, 2, 0);
        let err =
            pair_compression(&mut txrx, &machine, &tables, 30, 17, &compress_everything())
                .unwrap_err();
        match err {
            CompressionError::CompressionFailed { chips } => {
                assert_eq!(chips, vec![ChipLocation::new(1, 0)]);
            }
            other => panic!("unexpected error: {other}"),
        }
        // the app is still torn down on the failure path
        assert_eq!(txrx.stopped_apps(), &[17]);
    }

    #[test]
    fn table_header_carries_the_as_much_flag() {
        let chips = [ChipLocation::new(0, 0)];
        let (machine, mut txrx, tables) = setup(&chips);
        pair_compression(&mut txrx, &machine, &tables, 30, 17, &compress_everything()).unwrap();

        // the result code overwrote USER1, but the table is the chip's first
        // heap allocation
        let header = txrx.memory_at(chips[0], 0x6000_0000, 12);
        assert_eq!(&header[0..4], &30u32.to_le_bytes());
        assert_eq!(&header[4..8], &1u32.to_le_bytes());
        assert_eq!(&header[8..12], &4u32.to_le_bytes());
    }
}
