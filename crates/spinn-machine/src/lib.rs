//! Pure model of a SpiNNaker machine.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! model of the silicon as the toolchain sees it: the chip grid, the cores on
//! each chip, multicast routing tables, the VCPU register block layout, and
//! the core-state / signal enums used by the wire protocol.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`machine`] | Chip grid, per-chip cores and SDRAM, monitor flags |
//! | [`route`] | Multicast routing entries and per-chip routing tables |
//! | [`regs`] | VCPU register block — USER0..USER3 address helpers |
//! | [`state`] | Core execution states and control signals |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod machine;
pub mod regs;
pub mod route;
pub mod state;

pub use machine::{Chip, ChipLocation, Machine, Processor, MAX_CORES_PER_CHIP, SDRAM_PER_CHIP};
pub use route::{
    MulticastRoutingEntry, RoutingTable, RoutingTables, ROUTER_AVAILABLE_ENTRIES, ROUTER_LINKS,
};
pub use state::{CpuState, Signal};
