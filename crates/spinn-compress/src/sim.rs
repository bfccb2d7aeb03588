//! In-memory machine simulation.
//!
//! `SimTransceiver` implements [`Transceiver`] against a modelled machine:
//! per-chip SDRAM heaps, a byte-addressed memory image, core states and a
//! router. On the START signal every loaded core "runs" instantly, writing a
//! scriptable result into its USER1/USER2 registers and moving to FINISHED.
//! That is enough to exercise the whole load/execute/verify/recover protocol
//! in CI without hardware.
//!
//! Tests script outcomes per core:
//!
//! - [`SimTransceiver::script_core_result`] — the USER1 result code and the
//!   USER2 bitfields-merged count a sorter reports;
//! - [`SimTransceiver::script_core_state`] — a terminal state other than
//!   FINISHED (e.g. an RTE), which makes the wait step fail;
//! - [`SimTransceiver::set_sdram_budget`] — shrink a chip's heap to force
//!   the steal path.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::debug;

use spinn_machine::{
    ChipLocation, CpuState, Machine, MulticastRoutingEntry, Signal, ROUTER_AVAILABLE_ENTRIES,
};

use crate::error::{CompressionError, Result};
use crate::targets::CoreSubsets;
use crate::transceiver::Transceiver;

/// Base of the simulated SDRAM heap on every chip.
const HEAP_BASE: u32 = 0x6000_0000;

/// In-memory [`Transceiver`] implementation.
#[derive(Debug)]
pub struct SimTransceiver {
    machine: Machine,
    memory: BTreeMap<ChipLocation, BTreeMap<u32, u8>>,
    sdram_remaining: HashMap<ChipLocation, usize>,
    next_alloc: HashMap<ChipLocation, u32>,
    core_app: HashMap<(ChipLocation, u8), u8>,
    core_state: HashMap<(ChipLocation, u8), CpuState>,
    scripted_results: HashMap<(ChipLocation, u8), (u32, u32)>,
    scripted_states: HashMap<(ChipLocation, u8), CpuState>,
    signals: Vec<(u8, Signal)>,
    loaded_binaries: Vec<(String, u8)>,
    routes: HashMap<ChipLocation, Vec<MulticastRoutingEntry>>,
    cleared_chips: Vec<ChipLocation>,
    route_loads: Vec<ChipLocation>,
    stopped_apps: Vec<u8>,
}

impl SimTransceiver {
    /// Simulate the given machine; every chip starts with its full SDRAM.
    #[must_use]
    pub fn new(machine: Machine) -> Self {
        let sdram_remaining = machine
            .chips()
            .map(|chip| (chip.location, chip.sdram as usize))
            .collect();
        Self {
            machine,
            memory: BTreeMap::new(),
            sdram_remaining,
            next_alloc: HashMap::new(),
            core_app: HashMap::new(),
            core_state: HashMap::new(),
            scripted_results: HashMap::new(),
            scripted_states: HashMap::new(),
            signals: Vec::new(),
            loaded_binaries: Vec::new(),
            routes: HashMap::new(),
            cleared_chips: Vec::new(),
            route_loads: Vec::new(),
            stopped_apps: Vec::new(),
        }
    }

    /// Cap a chip's remaining heap (0 makes every malloc fail).
    pub fn set_sdram_budget(&mut self, chip: ChipLocation, bytes: usize) {
        self.sdram_remaining.insert(chip, bytes);
    }

    /// Script the USER1/USER2 values a core reports when it finishes.
    pub fn script_core_result(
        &mut self,
        chip: ChipLocation,
        processor: u8,
        result_code: u32,
        bitfields_merged: u32,
    ) {
        self.scripted_results
            .insert((chip, processor), (result_code, bitfields_merged));
    }

    /// Script a terminal state other than FINISHED for a core.
    pub fn script_core_state(&mut self, chip: ChipLocation, processor: u8, state: CpuState) {
        self.scripted_states.insert((chip, processor), state);
    }

    /// Bytes at an address (unwritten bytes read as zero).
    #[must_use]
    pub fn memory_at(&self, chip: ChipLocation, address: u32, len: usize) -> Vec<u8> {
        let chip_memory = self.memory.get(&chip);
        (0..len as u32)
            .map(|i| {
                chip_memory
                    .and_then(|m| m.get(&(address + i)))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Signals sent so far, in order.
    #[must_use]
    pub fn signals(&self) -> &[(u8, Signal)] {
        &self.signals
    }

    /// Binaries flooded so far, in order.
    #[must_use]
    pub fn loaded_binaries(&self) -> &[(String, u8)] {
        &self.loaded_binaries
    }

    /// Router content of a chip, if any routes were loaded.
    #[must_use]
    pub fn routes_on(&self, chip: ChipLocation) -> Option<&[MulticastRoutingEntry]> {
        self.routes.get(&chip).map(Vec::as_slice)
    }

    /// Chips whose routers were cleared, in order.
    #[must_use]
    pub fn cleared_chips(&self) -> &[ChipLocation] {
        &self.cleared_chips
    }

    /// Chips that received a route load, in order (repeats possible).
    #[must_use]
    pub fn route_loads(&self) -> &[ChipLocation] {
        &self.route_loads
    }

    /// Application ids stopped so far.
    #[must_use]
    pub fn stopped_apps(&self) -> &[u8] {
        &self.stopped_apps
    }

    fn run_core(&mut self, chip: ChipLocation, processor: u8) {
        if let Some(&state) = self.scripted_states.get(&(chip, processor)) {
            self.core_state.insert((chip, processor), state);
            return;
        }
        let (result, merged) = self
            .scripted_results
            .get(&(chip, processor))
            .copied()
            .unwrap_or((0, 0));
        let user1 = spinn_machine::regs::user_1_address(processor);
        let user2 = spinn_machine::regs::user_2_address(processor);
        self.store(chip, user1, &result.to_le_bytes());
        self.store(chip, user2, &merged.to_le_bytes());
        self.core_state.insert((chip, processor), CpuState::Finished);
    }

    fn store(&mut self, chip: ChipLocation, address: u32, data: &[u8]) {
        let chip_memory = self.memory.entry(chip).or_default();
        for (i, &byte) in data.iter().enumerate() {
            chip_memory.insert(address + i as u32, byte);
        }
    }
}

impl Transceiver for SimTransceiver {
    fn malloc_sdram(
        &mut self,
        chip: ChipLocation,
        size: usize,
        _app_id: u8,
        tag: u32,
    ) -> Result<u32> {
        let remaining = self.sdram_remaining.entry(chip).or_insert(0);
        if size > *remaining {
            return Err(CompressionError::malloc_failed(
                chip,
                format!("heap exhausted: {size} bytes requested, {remaining} free (tag {tag})"),
            ));
        }
        *remaining -= size;
        let next = self.next_alloc.entry(chip).or_insert(HEAP_BASE);
        let address = *next;
        // word-align the next allocation
        *next += (size as u32 + 3) & !3;
        debug!("sim: chip {chip} malloc {size} bytes -> {address:#x} (tag {tag})");
        Ok(address)
    }

    fn write_memory(&mut self, chip: ChipLocation, address: u32, data: &[u8]) -> Result<()> {
        self.store(chip, address, data);
        Ok(())
    }

    fn read_word(&mut self, chip: ChipLocation, address: u32) -> Result<u32> {
        let bytes = self.memory_at(chip, address, 4);
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn execute_flood(&mut self, subsets: &CoreSubsets, binary: &str, app_id: u8) -> Result<()> {
        self.loaded_binaries.push((binary.to_owned(), app_id));
        for (chip, processors) in subsets.iter() {
            for &p in processors {
                self.core_app.insert((chip, p), app_id);
                self.core_state.insert((chip, p), CpuState::Ready);
            }
        }
        Ok(())
    }

    fn send_signal(&mut self, app_id: u8, signal: Signal) -> Result<()> {
        self.signals.push((app_id, signal));
        if signal == Signal::Start {
            let targets: Vec<(ChipLocation, u8)> = self
                .core_app
                .iter()
                .filter(|(_, &a)| a == app_id)
                .map(|(&core, _)| core)
                .collect();
            for (chip, p) in targets {
                self.run_core(chip, p);
            }
        }
        Ok(())
    }

    fn count_cores_in_state(&mut self, app_id: u8, state: CpuState) -> Result<usize> {
        Ok(self
            .core_app
            .iter()
            .filter(|(core, &a)| a == app_id && self.core_state.get(core) == Some(&state))
            .count())
    }

    fn wait_for_cores_to_be_in_state(
        &mut self,
        subsets: &CoreSubsets,
        _app_id: u8,
        states: &[CpuState],
        _timeout: Option<Duration>,
    ) -> Result<()> {
        let all_there = subsets.iter().all(|(chip, processors)| {
            processors.iter().all(|&p| {
                self.core_state
                    .get(&(chip, p))
                    .is_some_and(|s| states.contains(s))
            })
        });
        if all_there {
            Ok(())
        } else {
            Err(CompressionError::CoresNotInState {
                expected: states[0],
                status: self.core_status_string(subsets),
            })
        }
    }

    fn core_status_string(&mut self, subsets: &CoreSubsets) -> String {
        let mut out = String::new();
        for (chip, processors) in subsets.iter() {
            for &p in processors {
                let state = self
                    .core_state
                    .get(&(chip, p))
                    .map_or_else(|| "IDLE".to_owned(), ToString::to_string);
                out.push_str(&format!("{chip}:{p} {state}\n"));
            }
        }
        out
    }

    fn clear_multicast_routes(&mut self, chip: ChipLocation) -> Result<()> {
        self.routes.remove(&chip);
        self.cleared_chips.push(chip);
        Ok(())
    }

    fn load_multicast_routes(
        &mut self,
        chip: ChipLocation,
        entries: &[MulticastRoutingEntry],
        _app_id: u8,
    ) -> Result<()> {
        if entries.len() > ROUTER_AVAILABLE_ENTRIES {
            return Err(CompressionError::transceiver(format!(
                "router on {chip} cannot hold {} entries",
                entries.len()
            )));
        }
        self.routes.insert(chip, entries.to_vec());
        self.route_loads.push(chip);
        Ok(())
    }

    fn stop_application(&mut self, app_id: u8) -> Result<()> {
        for (core, &a) in &self.core_app {
            if a == app_id {
                self.core_state.insert(*core, CpuState::Idle);
            }
        }
        let cores: Vec<(ChipLocation, u8)> = self
            .core_app
            .iter()
            .filter(|(_, &a)| a == app_id)
            .map(|(&core, _)| core)
            .collect();
        for core in cores {
            self.core_app.remove(&core);
        }
        self.stopped_apps.push(app_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_with_chip() -> (SimTransceiver, ChipLocation) {
        let chip = ChipLocation::new(0, 0);
        let mut machine = Machine::new();
        machine.add_chip(spinn_machine::Chip::new(chip, 4));
        (SimTransceiver::new(machine), chip)
    }

    #[test]
    fn malloc_respects_budget() {
        let (mut sim, chip) = sim_with_chip();
        sim.set_sdram_budget(chip, 100);
        let a = sim.malloc_sdram(chip, 60, 1, 1).unwrap();
        assert_eq!(a, HEAP_BASE);
        let err = sim.malloc_sdram(chip, 60, 1, 1).unwrap_err();
        assert!(matches!(err, CompressionError::MallocFailed { .. }));
    }

    #[test]
    fn memory_round_trip() {
        let (mut sim, chip) = sim_with_chip();
        sim.write_memory(chip, 0x1000, &0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        assert_eq!(sim.read_word(chip, 0x1000).unwrap(), 0xDEAD_BEEF);
        assert_eq!(sim.read_word(chip, 0x2000).unwrap(), 0);
    }

    #[test]
    fn start_runs_cores_to_finished_with_default_success() {
        let (mut sim, chip) = sim_with_chip();
        let mut subsets = CoreSubsets::new();
        subsets.add_processor(chip, 1);
        sim.execute_flood(&subsets, "x.aplx", 9).unwrap();
        assert_eq!(sim.count_cores_in_state(9, CpuState::Ready).unwrap(), 1);
        sim.send_signal(9, Signal::Start).unwrap();
        assert_eq!(sim.count_cores_in_state(9, CpuState::Finished).unwrap(), 1);
        assert_eq!(sim.read_user_register(chip, 1, 1).unwrap(), 0);
    }

    #[test]
    fn scripted_rte_fails_the_wait() {
        let (mut sim, chip) = sim_with_chip();
        sim.script_core_state(chip, 1, CpuState::RunTimeException);
        let mut subsets = CoreSubsets::new();
        subsets.add_processor(chip, 1);
        sim.execute_flood(&subsets, "x.aplx", 9).unwrap();
        sim.send_signal(9, Signal::Start).unwrap();
        let err = sim
            .wait_for_cores_to_be_in_state(&subsets, 9, &[CpuState::Finished], None)
            .unwrap_err();
        match err {
            CompressionError::CoresNotInState { status, .. } => assert!(status.contains("RTE")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn router_rejects_oversized_tables() {
        let (mut sim, chip) = sim_with_chip();
        let entries: Vec<MulticastRoutingEntry> = (0..=ROUTER_AVAILABLE_ENTRIES as u32)
            .map(|i| MulticastRoutingEntry::new(i, 0xFFFF_FFFF))
            .collect();
        assert!(sim.load_multicast_routes(chip, &entries, 1).is_err());
        assert!(sim.load_multicast_routes(chip, &entries[..10], 1).is_ok());
        assert_eq!(sim.routes_on(chip).unwrap().len(), 10);
    }
}
