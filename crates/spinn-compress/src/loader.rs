//! Per-chip SDRAM loading.
//!
//! Writes the four blocks the sorter firmware reads at start-up (the encoded
//! routing table, the communications scratch block, the bitfield-address
//! block and the stealable-SDRAM matrix), then parameterises
//! the compressor cores through their USER registers.
//!
//! Every allocation is malloc-first: a rejected malloc falls back to stealing
//! from the chip's [`SdramArena`]. A chip that cannot be provisioned even by
//! stealing raises [`CompressionError::NoSdramToUse`], which the orchestrator
//! converts into host-fallback status for that chip alone.

use tracing::{debug, trace};

use spinn_machine::{ChipLocation, RoutingTable};

use crate::arena::SdramArena;
use crate::config::CompressionConfig;
use crate::encoder::{encode_address_block, encode_matrix_block, encode_table};
use crate::error::{CompressionError, Result};
use crate::planner::CompressionPlan;
use crate::transceiver::Transceiver;

/// SDRAM tag the sorter expects the routing table under.
pub const ROUTING_TABLE_SDRAM_TAG: u32 = 1;
/// SDRAM tag for the bitfield-address block.
pub const BIT_FIELD_ADDRESSES_SDRAM_TAG: u32 = 2;
/// SDRAM tag for the stealable-SDRAM matrix block.
pub const USABLE_SDRAM_TAG: u32 = 3;
/// SDRAM tag for the sorter/compressor communications block.
pub const COMMS_SDRAM_TAG: u32 = 4;

/// Communications block size: 7 words per core, 18 cores max.
pub const COMMS_SDRAM_SIZE: usize = 7 * 4 * 18;

/// One bitfield-producing vertex on a chip, as located by the placement
/// layer.
#[derive(Debug, Clone, Copy)]
pub struct BitFieldSource {
    /// SDRAM address of the vertex's bitfield region.
    pub bit_field_address: u32,
    /// Core the vertex is placed on.
    pub processor: u8,
}

/// Allocate `size` bytes, stealing from the arena when the heap is out.
fn malloc_or_steal(
    txrx: &mut dyn Transceiver,
    chip: ChipLocation,
    size: usize,
    app_id: u8,
    tag: u32,
    arena: &mut SdramArena,
) -> Result<u32> {
    match txrx.malloc_sdram(chip, size, app_id, tag) {
        Ok(address) => Ok(address),
        Err(CompressionError::MallocFailed { .. }) => {
            trace!("chip {chip}: malloc of {size} bytes (tag {tag}) rejected; stealing");
            arena.steal(size as u32)
        }
        Err(e) => Err(e),
    }
}

/// Provision one chip for on-chip compression.
///
/// # Errors
///
/// [`CompressionError::NoCoresAvailable`] if the planner found no sorter
/// core; [`CompressionError::NoSdramToUse`] if a block could not be placed
/// even by stealing. Both are per-chip recoverable.
pub fn load_chip(
    txrx: &mut dyn Transceiver,
    table: &RoutingTable,
    app_id: u8,
    compressor_app_id: u8,
    plan: &CompressionPlan,
    arena: &mut SdramArena,
    bitfield_sources: &[BitFieldSource],
    config: &CompressionConfig,
) -> Result<()> {
    let chip = table.location;
    let sorter = plan
        .sorter_for(chip)
        .ok_or(CompressionError::NoCoresAvailable { chip })?;

    // Routing table block; firmware finds it through the sorter's USER1.
    let table_data = encode_table(app_id, table);
    let table_address = malloc_or_steal(
        txrx,
        chip,
        table_data.len(),
        compressor_app_id,
        ROUTING_TABLE_SDRAM_TAG,
        arena,
    )?;
    txrx.write_memory(chip, table_address, &table_data)?;
    txrx.write_user_register(chip, sorter, 1, table_address)?;
    debug!(
        "chip {chip}: table ({} entries, {} bytes) at {table_address:#x}",
        table.number_of_entries(),
        table_data.len()
    );

    // Sorter/compressor communications scratch.
    let comms_sdram = malloc_or_steal(
        txrx,
        chip,
        COMMS_SDRAM_SIZE,
        compressor_app_id,
        COMMS_SDRAM_TAG,
        arena,
    )?;

    // Bitfield-address block; sorter's USER2.
    let addresses: Vec<(u32, u8)> = bitfield_sources
        .iter()
        .map(|s| (s.bit_field_address, s.processor))
        .collect();
    let address_data = encode_address_block(
        config.threshold_percentage,
        config.retry_count,
        comms_sdram,
        &addresses,
    );
    let address_base = malloc_or_steal(
        txrx,
        chip,
        address_data.len(),
        compressor_app_id,
        BIT_FIELD_ADDRESSES_SDRAM_TAG,
        arena,
    )?;
    txrx.write_memory(chip, address_base, &address_data)?;
    txrx.write_user_register(chip, sorter, 2, address_base)?;

    // Stealable-SDRAM matrix; sorter's USER3. Encoded after every steal above
    // so the firmware sees the post-steal state, and re-encoded if placing the
    // matrix itself had to steal.
    let mut matrix_data = encode_matrix_block(arena.blocks());
    let matrix_base = match txrx.malloc_sdram(
        chip,
        matrix_data.len(),
        compressor_app_id,
        USABLE_SDRAM_TAG,
    ) {
        Ok(address) => address,
        Err(CompressionError::MallocFailed { .. }) => {
            let address = arena.steal(matrix_data.len() as u32)?;
            matrix_data = encode_matrix_block(arena.blocks());
            address
        }
        Err(e) => return Err(e),
    };
    txrx.write_memory(chip, matrix_base, &matrix_data)?;
    txrx.write_user_register(chip, sorter, 3, matrix_base)?;

    // Compressor cores are parameterised entirely through USER registers.
    for processor in plan.compressors_for(chip) {
        txrx.write_user_register(chip, processor, 1, config.attempt_micros())?;
        txrx.write_user_register(
            chip,
            processor,
            2,
            u32::from(config.compress_as_much_as_possible),
        )?;
        txrx.write_user_register(chip, processor, 3, comms_sdram)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_cores;
    use crate::sim::SimTransceiver;
    use crate::targets::CoreSubsets;
    use spinn_machine::{regs, Chip, Machine, MulticastRoutingEntry, RoutingTables};

    fn setup() -> (SimTransceiver, RoutingTables, CompressionPlan) {
        let chip = ChipLocation::new(0, 0);
        let mut machine = Machine::new();
        machine.add_chip(Chip::new(chip, 4));
        let mut table = RoutingTable::new(chip);
        table.entries.push(MulticastRoutingEntry::new(0x10, 0xFFFF_FFFF).with_links(&[1]));
        let mut tables = RoutingTables::new();
        tables.add(table);
        let plan = plan_cores(&machine, &tables, "sorter.aplx", "comp.aplx", &CoreSubsets::new());
        (SimTransceiver::new(machine), tables, plan)
    }

    #[test]
    fn sorter_registers_point_at_written_blocks() {
        let (mut txrx, tables, plan) = setup();
        let chip = ChipLocation::new(0, 0);
        let table = tables.table_for(chip).unwrap();
        let mut arena = SdramArena::new(chip);
        load_chip(
            &mut txrx,
            table,
            30,
            17,
            &plan,
            &mut arena,
            &[BitFieldSource { bit_field_address: 0x9000, processor: 2 }],
            &CompressionConfig::default(),
        )
        .unwrap();

        let sorter = plan.sorter_for(chip).unwrap();
        let table_address = txrx.read_word(chip, regs::user_1_address(sorter)).unwrap();
        let written = txrx.memory_at(chip, table_address, 8 + 16);
        // header: app_id 30, one entry
        assert_eq!(&written[0..4], &30u32.to_le_bytes());
        assert_eq!(&written[4..8], &1u32.to_le_bytes());

        let address_base = txrx.read_word(chip, regs::user_2_address(sorter)).unwrap();
        let block = txrx.memory_at(chip, address_base, 24);
        // one (address, processor) pair after the 4-word header
        assert_eq!(&block[12..16], &1u32.to_le_bytes());
        assert_eq!(&block[16..20], &0x9000u32.to_le_bytes());
        assert_eq!(&block[20..24], &2u32.to_le_bytes());
    }

    #[test]
    fn compressor_cores_get_timing_and_comms() {
        let (mut txrx, tables, plan) = setup();
        let chip = ChipLocation::new(0, 0);
        let table = tables.table_for(chip).unwrap();
        let mut arena = SdramArena::new(chip);
        let config = CompressionConfig {
            compress_as_much_as_possible: true,
            ..Default::default()
        };
        load_chip(&mut txrx, table, 30, 17, &plan, &mut arena, &[], &config).unwrap();

        for p in plan.compressors_for(chip) {
            let micros = txrx.read_word(chip, regs::user_1_address(p)).unwrap();
            assert_eq!(micros, 10_000_000);
            let as_much = txrx.read_word(chip, regs::user_2_address(p)).unwrap();
            assert_eq!(as_much, 1);
            let comms = txrx.read_word(chip, regs::user_3_address(p)).unwrap();
            assert_ne!(comms, 0);
        }
    }

    #[test]
    fn malloc_exhaustion_steals_from_arena() {
        let (mut txrx, tables, plan) = setup();
        let chip = ChipLocation::new(0, 0);
        txrx.set_sdram_budget(chip, 0); // force every malloc to fail
        let table = tables.table_for(chip).unwrap();
        let mut arena = SdramArena::new(chip);
        arena.add_block(0x7000_0000, 4096);
        load_chip(
            &mut txrx,
            table,
            30,
            17,
            &plan,
            &mut arena,
            &[],
            &CompressionConfig::default(),
        )
        .unwrap();

        let sorter = plan.sorter_for(chip).unwrap();
        let table_address = txrx.read_word(chip, regs::user_1_address(sorter)).unwrap();
        assert_eq!(table_address, 0x7000_0000);
        assert!(arena.total_free() < 4096);
    }

    #[test]
    fn no_memory_anywhere_is_a_per_chip_error() {
        let (mut txrx, tables, plan) = setup();
        let chip = ChipLocation::new(0, 0);
        txrx.set_sdram_budget(chip, 0);
        let table = tables.table_for(chip).unwrap();
        let mut arena = SdramArena::new(chip);
        let err = load_chip(
            &mut txrx,
            table,
            30,
            17,
            &plan,
            &mut arena,
            &[],
            &CompressionConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_recoverable_per_chip());
    }
}
