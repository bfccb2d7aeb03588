//! SpiNNaker routing-table compression.
//!
//! Multicast routing tables routinely exceed the router's 1023 usable
//! entries. This crate drives the on-chip compressor binaries that shrink
//! them in place, in two flavours:
//!
//! - **bitfield compression** ([`bitfield`]): a sorter core per chip merges
//!   redundant-packet bitfields into the table while compressor cores shrink
//!   it, with per-chip host fallback ([`host`]) when a chip cannot run or
//!   its sorter reports defeat;
//! - **plain compression** ([`onchip`]): one compressor core per chip, no
//!   bitfields, all-or-nothing.
//!
//! All hardware access goes through the [`Transceiver`] trait;
//! [`sim::SimTransceiver`] implements it against an in-memory machine so the
//! whole protocol runs in CI.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`bitfield`] | The machine bitfield compression orchestrator |
//! | [`onchip`] | Plain (no-bitfield) on-chip compression drivers |
//! | [`host`] | Host fallback compressor and the key/atom map |
//! | [`planner`] | Sorter/compressor core allocation |
//! | [`loader`] | Per-chip SDRAM block loading and USER-register setup |
//! | [`executor`] | Flood / arm / start / wait driver for system binaries |
//! | [`encoder`] | Wire-format block encoders and decoders |
//! | [`arena`] | Stealable-SDRAM bookkeeping |
//! | [`targets`] | Core subsets and binary-to-core maps |
//! | [`provenance`] | Per-sorter run results |
//! | [`transceiver`] | The wire-protocol trait |
//! | [`sim`] | In-memory machine simulation |

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod arena;
pub mod bitfield;
pub mod config;
pub mod encoder;
pub mod error;
pub mod executor;
pub mod host;
pub mod loader;
pub mod onchip;
pub mod planner;
pub mod provenance;
pub mod sim;
pub mod targets;
pub mod transceiver;

pub use arena::{SdramArena, SdramBlock};
pub use bitfield::{CompressionOutcome, CompressorKind, MachineBitFieldCompressor, SORTER_APLX};
pub use config::CompressionConfig;
pub use error::{CompressionError, Result};
pub use host::{compress_table, host_fallback, KeyAtomMap};
pub use loader::BitFieldSource;
pub use onchip::{ordered_covering_compression, pair_compression, OnChipOutcome};
pub use provenance::{CompressionProvenance, ProvenanceItem};
pub use targets::{CoreSubsets, ExecutableTargets, ExecutableType};
pub use transceiver::Transceiver;
