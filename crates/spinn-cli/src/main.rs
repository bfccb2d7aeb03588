//! `spinn-compress` — run the routing-table compression pipeline against a
//! simulated machine.
//!
//! ```text
//! USAGE:
//!   spinn-compress bitfield [opts]   Bitfield compression with host fallback
//!   spinn-compress plain [opts]      Plain on-chip compression, no bitfields
//!   spinn-compress host [opts]       Host-only compression of one table
//! ```
//!
//! There is no hardware transport here; every command builds a
//! [`spinn_compress::sim::SimTransceiver`] over a synthetic chip grid and
//! synthetic routing tables, then drives the same code paths the toolchain
//! runs against real boards. Useful for protocol debugging and for eyeballing
//! compression ratios.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use spinn_compress::sim::SimTransceiver;
use spinn_compress::{
    compress_table, pair_compression, CompressionConfig, CompressorKind, CoreSubsets, KeyAtomMap,
    MachineBitFieldCompressor, SdramBlock,
};
use spinn_machine::{ChipLocation, Machine, MulticastRoutingEntry, RoutingTable, RoutingTables};

/// Application id synthetic routing tables are loaded under.
const ROUTING_APP_ID: u8 = 30;
/// Free application id the compressor binaries run under.
const COMPRESSOR_APP_ID: u8 = 17;

#[derive(Parser)]
#[command(name = "spinn-compress", about = "SpiNNaker routing-table compression", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    /// Ordered-covering compression (slow, best ratios).
    OrderedCovering,
    /// Pairwise merging (fast, weaker ratios).
    Pair,
}

#[derive(Subcommand)]
enum Cmd {
    /// Bitfield compression: sorter plus compressor cores per chip, host
    /// fallback for chips that cannot run.
    Bitfield {
        /// Machine width in chips.
        #[arg(long, default_value_t = 2)]
        width: u8,
        /// Machine height in chips.
        #[arg(long, default_value_t = 2)]
        height: u8,
        /// Cores per chip.
        #[arg(long, default_value_t = 18)]
        cores: u8,
        /// Entries per synthetic routing table.
        #[arg(long, default_value_t = 256)]
        entries: u32,
        /// Compression algorithm for the compressor cores.
        #[arg(long, value_enum, default_value = "ordered-covering")]
        algorithm: Algorithm,
        /// Keep compressing below the router limit.
        #[arg(long)]
        as_much_as_possible: bool,
    },
    /// Plain on-chip compression: one compressor core per chip, no bitfields.
    Plain {
        /// Machine width in chips.
        #[arg(long, default_value_t = 2)]
        width: u8,
        /// Machine height in chips.
        #[arg(long, default_value_t = 2)]
        height: u8,
        /// Cores per chip.
        #[arg(long, default_value_t = 18)]
        cores: u8,
        /// Entries per synthetic routing table.
        #[arg(long, default_value_t = 256)]
        entries: u32,
        /// Compress even tables that already fit the router.
        #[arg(long)]
        as_much_as_possible: bool,
    },
    /// Compress one synthetic table on the host and print the ratio.
    Host {
        /// Entries in the synthetic table.
        #[arg(long, default_value_t = 512)]
        entries: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Bitfield {
            width,
            height,
            cores,
            entries,
            algorithm,
            as_much_as_possible,
        } => cmd_bitfield(width, height, cores, entries, algorithm, as_much_as_possible)?,
        Cmd::Plain {
            width,
            height,
            cores,
            entries,
            as_much_as_possible,
        } => cmd_plain(width, height, cores, entries, as_much_as_possible)?,
        Cmd::Host { entries } => cmd_host(entries)?,
    }

    Ok(())
}

/// A mergeable synthetic table: runs of four consecutive keys share a route.
fn synthetic_table(chip: ChipLocation, n_entries: u32) -> RoutingTable {
    let mut table = RoutingTable::new(chip);
    for i in 0..n_entries {
        let link = ((i / 4) % u32::from(spinn_machine::ROUTER_LINKS)) as u8;
        table
            .entries
            .push(MulticastRoutingEntry::new(i, 0xFFFF_FFFF).with_links(&[link]));
    }
    table
}

fn synthetic_tables(machine: &Machine, n_entries: u32) -> RoutingTables {
    let mut tables = RoutingTables::new();
    for chip in machine.chips() {
        tables.add(synthetic_table(chip.location, n_entries));
    }
    tables
}

fn usable_sdram(machine: &Machine) -> BTreeMap<ChipLocation, Vec<SdramBlock>> {
    machine
        .chips()
        .map(|chip| {
            (
                chip.location,
                vec![SdramBlock { base: 0x7000_0000, size: 8 << 20 }],
            )
        })
        .collect()
}

fn cmd_bitfield(
    width: u8,
    height: u8,
    cores: u8,
    entries: u32,
    algorithm: Algorithm,
    as_much_as_possible: bool,
) -> Result<()> {
    let machine = Machine::grid(width, height, cores);
    let tables = synthetic_tables(&machine, entries);
    let mut txrx = SimTransceiver::new(machine.clone());
    let kind = match algorithm {
        Algorithm::OrderedCovering => CompressorKind::OrderedCovering,
        Algorithm::Pair => CompressorKind::Pair,
    };
    let config = CompressionConfig {
        compress_as_much_as_possible: as_much_as_possible,
        ..Default::default()
    };

    let compressor = MachineBitFieldCompressor::new(&machine, kind, config);
    let outcome = compressor.run(
        &mut txrx,
        &tables,
        ROUTING_APP_ID,
        COMPRESSOR_APP_ID,
        &BTreeMap::new(),
        &usable_sdram(&machine),
        &CoreSubsets::new(),
        &KeyAtomMap::new(),
    )?;

    println!(
        "{} chips, {} entries per table, {} compressor",
        machine.n_chips(),
        entries,
        kind.label()
    );
    println!(
        "on-chip: {} sorters ran, {} bitfields merged",
        outcome.provenance.items().len(),
        outcome.provenance.total_bitfields_merged()
    );
    if outcome.host_compressed.is_empty() {
        println!("host fallback: not needed");
    } else {
        println!("host fallback: {} chips", outcome.host_compressed.len());
        for table in &outcome.host_compressed {
            println!(
                "  {}: {} entries after host compression",
                table.location,
                table.number_of_entries()
            );
        }
    }
    Ok(())
}

fn cmd_plain(
    width: u8,
    height: u8,
    cores: u8,
    entries: u32,
    as_much_as_possible: bool,
) -> Result<()> {
    let machine = Machine::grid(width, height, cores);
    let tables = synthetic_tables(&machine, entries);
    let mut txrx = SimTransceiver::new(machine.clone());
    let config = CompressionConfig {
        compress_as_much_as_possible: as_much_as_possible,
        ..Default::default()
    };

    let outcome = pair_compression(
        &mut txrx,
        &machine,
        &tables,
        ROUTING_APP_ID,
        COMPRESSOR_APP_ID,
        &config,
    )?;

    println!("{} chips, {} entries per table", machine.n_chips(), entries);
    println!(
        "compressed on-chip: {}   skipped (already fit): {}",
        outcome.compressed.len(),
        outcome.skipped.len()
    );
    Ok(())
}

fn cmd_host(entries: u32) -> Result<()> {
    let table = synthetic_table(ChipLocation::new(0, 0), entries);
    let compressed = compress_table(&table, &KeyAtomMap::new())?;
    println!(
        "{} entries -> {} entries ({:.1}% of original)",
        table.number_of_entries(),
        compressed.number_of_entries(),
        100.0 * compressed.number_of_entries() as f64 / table.number_of_entries() as f64
    );
    Ok(())
}
