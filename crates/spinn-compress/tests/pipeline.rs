//! End-to-end compression pipeline tests over the simulated machine.
//!
//! These drive the public entry points exactly as the toolchain does: build a
//! machine, hand over routing tables, run, and inspect what ended up on the
//! (simulated) wire.

use std::collections::BTreeMap;

use spinn_compress::sim::SimTransceiver;
use spinn_compress::{
    compress_table, pair_compression, CompressionConfig, CompressionError, CompressorKind,
    CoreSubsets, KeyAtomMap, MachineBitFieldCompressor, SdramBlock,
};
use spinn_machine::{
    ChipLocation, Machine, MulticastRoutingEntry, RoutingTable, RoutingTables,
    ROUTER_AVAILABLE_ENTRIES,
};

const ROUTING_APP_ID: u8 = 30;
const COMPRESSOR_APP_ID: u8 = 17;

/// Runs of four consecutive keys share a route, so the table compresses 4:1.
fn mergeable_table(chip: ChipLocation, n_entries: u32) -> RoutingTable {
    let mut table = RoutingTable::new(chip);
    for i in 0..n_entries {
        let link = ((i / 4) % 6) as u8;
        table
            .entries
            .push(MulticastRoutingEntry::new(i, 0xFFFF_FFFF).with_links(&[link]));
    }
    table
}

/// Every entry routes differently; nothing can merge.
fn incompressible_table(chip: ChipLocation, n_entries: u32) -> RoutingTable {
    let mut table = RoutingTable::new(chip);
    for i in 0..n_entries {
        table.entries.push(
            MulticastRoutingEntry::new(i, 0xFFFF_FFFF)
                .with_links(&[(i % 6) as u8])
                .with_processors(&[(i % 7) as u8]),
        );
    }
    table
}

fn sdram_everywhere(machine: &Machine) -> BTreeMap<ChipLocation, Vec<SdramBlock>> {
    machine
        .chips()
        .map(|chip| {
            (
                chip.location,
                vec![SdramBlock { base: 0x7000_0000, size: 4 << 20 }],
            )
        })
        .collect()
}

#[test]
fn bitfield_pipeline_compresses_a_grid() {
    let machine = Machine::grid(2, 2, 18);
    let mut tables = RoutingTables::new();
    for chip in machine.chips() {
        tables.add(mergeable_table(chip.location, 64));
    }
    let mut txrx = SimTransceiver::new(machine.clone());
    for chip in machine.chips() {
        // sorter lands on core 1 everywhere
        txrx.script_core_result(chip.location, 1, 0, 5);
    }

    let compressor = MachineBitFieldCompressor::new(
        &machine,
        CompressorKind::OrderedCovering,
        CompressionConfig::default(),
    );
    let outcome = compressor
        .run(
            &mut txrx,
            &tables,
            ROUTING_APP_ID,
            COMPRESSOR_APP_ID,
            &BTreeMap::new(),
            &sdram_everywhere(&machine),
            &CoreSubsets::new(),
            &KeyAtomMap::new(),
        )
        .unwrap();

    assert_eq!(outcome.provenance.items().len(), 4);
    assert_eq!(outcome.provenance.total_bitfields_merged(), 20);
    assert!(outcome.host_compressed.is_empty());
    // the compressor application is gone, the routing application untouched
    assert_eq!(txrx.stopped_apps(), &[COMPRESSOR_APP_ID]);
    assert!(txrx.route_loads().is_empty());
}

#[test]
fn failed_chips_are_reloaded_with_host_compressed_tables() {
    let good = ChipLocation::new(0, 0);
    let bad = ChipLocation::new(1, 0);
    let mut machine = Machine::new();
    machine.add_chip(spinn_machine::Chip::new(good, 18));
    machine.add_chip(spinn_machine::Chip::new(bad, 18));

    let mut tables = RoutingTables::new();
    tables.add(mergeable_table(good, 64));
    tables.add(mergeable_table(bad, 64));

    let mut txrx = SimTransceiver::new(machine.clone());
    txrx.script_core_result(bad, 1, 3, 0);

    let compressor = MachineBitFieldCompressor::new(
        &machine,
        CompressorKind::Pair,
        CompressionConfig::default(),
    );
    let outcome = compressor
        .run(
            &mut txrx,
            &tables,
            ROUTING_APP_ID,
            COMPRESSOR_APP_ID,
            &BTreeMap::new(),
            &sdram_everywhere(&machine),
            &CoreSubsets::new(),
            &KeyAtomMap::new(),
        )
        .unwrap();

    // only the failed chip's router was rewritten, with a 4:1 merge
    assert_eq!(txrx.cleared_chips(), &[bad]);
    assert_eq!(txrx.route_loads(), &[bad]);
    assert_eq!(txrx.routes_on(bad).unwrap().len(), 16);
    assert!(txrx.routes_on(good).is_none());

    assert_eq!(outcome.provenance.failed_chips(), vec![bad]);
    assert_eq!(outcome.host_compressed.len(), 1);
    assert_eq!(outcome.host_compressed[0].number_of_entries(), 16);
}

#[test]
fn exhausted_heap_is_survived_by_stealing() {
    let chip = ChipLocation::new(0, 0);
    let mut machine = Machine::new();
    machine.add_chip(spinn_machine::Chip::new(chip, 18));
    let mut tables = RoutingTables::new();
    tables.add(mergeable_table(chip, 32));

    let mut txrx = SimTransceiver::new(machine.clone());
    txrx.set_sdram_budget(chip, 0); // every malloc rejected; only stealing works

    let compressor = MachineBitFieldCompressor::new(
        &machine,
        CompressorKind::OrderedCovering,
        CompressionConfig::default(),
    );
    let outcome = compressor
        .run(
            &mut txrx,
            &tables,
            ROUTING_APP_ID,
            COMPRESSOR_APP_ID,
            &BTreeMap::new(),
            &sdram_everywhere(&machine),
            &CoreSubsets::new(),
            &KeyAtomMap::new(),
        )
        .unwrap();

    // on-chip compression still ran; nothing fell back
    assert_eq!(outcome.provenance.items().len(), 1);
    assert!(outcome.provenance.items()[0].succeeded());
    assert!(outcome.host_compressed.is_empty());
}

#[test]
fn host_compression_brings_oversized_tables_under_the_limit() {
    let chip = ChipLocation::new(0, 0);
    let table = mergeable_table(chip, 1200);
    assert!(!table.fits_router());

    let compressed = compress_table(&table, &KeyAtomMap::new()).unwrap();
    assert!(compressed.fits_router());
    assert_eq!(compressed.number_of_entries(), 1200 / 4);
}

#[test]
fn incompressible_oversized_table_is_reported_too_big() {
    let chip = ChipLocation::new(0, 0);
    let table = incompressible_table(chip, ROUTER_AVAILABLE_ENTRIES as u32 + 5);

    let err = compress_table(&table, &KeyAtomMap::new()).unwrap_err();
    match err {
        CompressionError::TableTooBig { chip: c, entries, capacity } => {
            assert_eq!(c, chip);
            assert_eq!(entries, ROUTER_AVAILABLE_ENTRIES + 5);
            assert_eq!(capacity, ROUTER_AVAILABLE_ENTRIES);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn plain_compression_skips_fitting_tables_until_asked() {
    let machine = Machine::grid(2, 1, 18);
    let mut tables = RoutingTables::new();
    for chip in machine.chips() {
        tables.add(mergeable_table(chip.location, 64));
    }

    // default config: everything already fits, nothing runs
    let mut txrx = SimTransceiver::new(machine.clone());
    let outcome = pair_compression(
        &mut txrx,
        &machine,
        &tables,
        ROUTING_APP_ID,
        COMPRESSOR_APP_ID,
        &CompressionConfig::default(),
    )
    .unwrap();
    assert_eq!(outcome.skipped.len(), 2);
    assert!(txrx.loaded_binaries().is_empty());

    // asked to compress regardless: every chip runs
    let mut txrx = SimTransceiver::new(machine.clone());
    let config = CompressionConfig {
        compress_as_much_as_possible: true,
        ..Default::default()
    };
    let outcome = pair_compression(
        &mut txrx,
        &machine,
        &tables,
        ROUTING_APP_ID,
        COMPRESSOR_APP_ID,
        &config,
    )
    .unwrap();
    assert_eq!(outcome.compressed.len(), 2);
    assert_eq!(txrx.stopped_apps(), &[COMPRESSOR_APP_ID]);
}
