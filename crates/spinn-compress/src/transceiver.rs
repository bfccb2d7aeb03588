//! The wire-protocol boundary.
//!
//! Everything the compression subsystem needs from the machine goes through
//! the [`Transceiver`] trait: SDRAM allocation, memory reads/writes, binary
//! flooding, signals, state polling and multicast-route loading. The real
//! SCAMP/SCP implementation lives outside this crate; [`crate::sim`] provides
//! an in-memory implementation for CI and end-to-end tests.

use std::time::Duration;

use spinn_machine::{regs, ChipLocation, CpuState, MulticastRoutingEntry, Signal};

use crate::error::Result;
use crate::targets::CoreSubsets;

/// Host-side handle onto the machine's wire protocol.
///
/// Methods take `&mut self`: the protocol is connection-oriented and the
/// orchestration is strictly sequential on the host side.
pub trait Transceiver {
    /// Allocate `size` bytes of SDRAM on a chip, tagged for the firmware.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CompressionError::MallocFailed`] when the chip's heap
    /// is exhausted; callers treat that as "try stealing".
    fn malloc_sdram(&mut self, chip: ChipLocation, size: usize, app_id: u8, tag: u32)
        -> Result<u32>;

    /// Write bytes to a chip's memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the wire protocol rejects the write.
    fn write_memory(&mut self, chip: ChipLocation, address: u32, data: &[u8]) -> Result<()>;

    /// Read one little-endian word from a chip's memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the wire protocol rejects the read.
    fn read_word(&mut self, chip: ChipLocation, address: u32) -> Result<u32>;

    /// Write a USER register (0..=3) of one core.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory write fails.
    fn write_user_register(
        &mut self,
        chip: ChipLocation,
        processor: u8,
        register: u8,
        value: u32,
    ) -> Result<()> {
        let address = regs::user_register_address(processor, register);
        self.write_memory(chip, address, &value.to_le_bytes())
    }

    /// Read a USER register (0..=3) of one core.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory read fails.
    fn read_user_register(
        &mut self,
        chip: ChipLocation,
        processor: u8,
        register: u8,
    ) -> Result<u32> {
        let address = regs::user_register_address(processor, register);
        self.read_word(chip, address)
    }

    /// Load a binary onto a set of cores and leave them waiting in READY.
    ///
    /// # Errors
    ///
    /// Returns an error if any core rejects the load.
    fn execute_flood(&mut self, subsets: &CoreSubsets, binary: &str, app_id: u8) -> Result<()>;

    /// Broadcast a signal to every core running under an application id.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be sent.
    fn send_signal(&mut self, app_id: u8, signal: Signal) -> Result<()>;

    /// Count cores of an application currently in a state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state query fails.
    fn count_cores_in_state(&mut self, app_id: u8, state: CpuState) -> Result<usize>;

    /// Block until every core in `subsets` reaches one of `states`.
    ///
    /// This is the orchestration's only suspension point; the implementation
    /// polls internally.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CompressionError::CoresNotInState`] on timeout or
    /// when a core lands in a failure state instead.
    fn wait_for_cores_to_be_in_state(
        &mut self,
        subsets: &CoreSubsets,
        app_id: u8,
        states: &[CpuState],
        timeout: Option<Duration>,
    ) -> Result<()>;

    /// Best-effort per-core status dump for diagnostics.
    fn core_status_string(&mut self, subsets: &CoreSubsets) -> String;

    /// Remove every multicast route from a chip's router.
    ///
    /// # Errors
    ///
    /// Returns an error if the router cannot be cleared.
    fn clear_multicast_routes(&mut self, chip: ChipLocation) -> Result<()>;

    /// Load multicast routes into a chip's router, in entry order.
    ///
    /// # Errors
    ///
    /// Returns an error if the entries do not fit or the load is rejected.
    fn load_multicast_routes(
        &mut self,
        chip: ChipLocation,
        entries: &[MulticastRoutingEntry],
        app_id: u8,
    ) -> Result<()>;

    /// Stop an application and free its cores.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop request is rejected.
    fn stop_application(&mut self, app_id: u8) -> Result<()>;
}
