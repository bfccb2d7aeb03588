//! Chip grid model.
//!
//! A SpiNNaker machine is a 2D grid of chips, each with up to 18 cores and a
//! shared SDRAM bank. One core per chip is reserved as the monitor processor
//! and never takes part in compression work. Virtual chips stand in for
//! off-board peripherals and own no usable cores or memory.

use std::collections::BTreeMap;

/// Cores physically present on a production SpiNNaker chip.
pub const MAX_CORES_PER_CHIP: usize = 18;

/// SDRAM fitted per chip (128 MB on SpiNN-5 boards).
pub const SDRAM_PER_CHIP: u32 = 128 * 1024 * 1024;

/// Chip coordinate: the (x, y) key every per-chip structure is indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChipLocation {
    /// Grid X coordinate.
    pub x: u8,
    /// Grid Y coordinate.
    pub y: u8,
}

impl ChipLocation {
    /// Create a chip location.
    #[must_use]
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for ChipLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// One execution unit on a chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Processor {
    /// Physical processor id (0..17).
    pub id: u8,
    /// Monitor processors are reserved for the operating system.
    pub is_monitor: bool,
}

/// A single SpiNNaker processing node.
#[derive(Debug, Clone)]
pub struct Chip {
    /// Location within the grid.
    pub location: ChipLocation,
    /// Cores on this chip, in processor-id order.
    processors: Vec<Processor>,
    /// SDRAM capacity in bytes.
    pub sdram: u32,
    /// Virtual chips model off-board peripherals; they own no usable cores.
    pub virtual_chip: bool,
}

impl Chip {
    /// Build a production chip: core 0 is the monitor, the rest are usable.
    #[must_use]
    pub fn new(location: ChipLocation, n_cores: u8) -> Self {
        let processors = (0..n_cores)
            .map(|id| Processor { id, is_monitor: id == 0 })
            .collect();
        Self {
            location,
            processors,
            sdram: SDRAM_PER_CHIP,
            virtual_chip: false,
        }
    }

    /// Build a virtual chip (no usable cores, no SDRAM).
    #[must_use]
    pub fn new_virtual(location: ChipLocation) -> Self {
        Self {
            location,
            processors: Vec::new(),
            sdram: 0,
            virtual_chip: true,
        }
    }

    /// All processors, monitor included.
    pub fn processors(&self) -> impl Iterator<Item = &Processor> {
        self.processors.iter()
    }

    /// Non-monitor processors, in id order.
    pub fn placable_processors(&self) -> impl Iterator<Item = &Processor> {
        self.processors.iter().filter(|p| !p.is_monitor)
    }

    /// First non-monitor processor, if the chip has any.
    #[must_use]
    pub fn first_placable_processor(&self) -> Option<&Processor> {
        self.placable_processors().next()
    }
}

/// The machine: a grid of chips indexed by location.
#[derive(Debug, Clone, Default)]
pub struct Machine {
    chips: BTreeMap<ChipLocation, Chip>,
}

impl Machine {
    /// Empty machine; chips are added with [`Machine::add_chip`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a full `width` x `height` grid of production chips.
    #[must_use]
    pub fn grid(width: u8, height: u8, cores_per_chip: u8) -> Self {
        let mut machine = Self::new();
        for x in 0..width {
            for y in 0..height {
                machine.add_chip(Chip::new(ChipLocation::new(x, y), cores_per_chip));
            }
        }
        machine
    }

    /// Add (or replace) a chip.
    pub fn add_chip(&mut self, chip: Chip) {
        self.chips.insert(chip.location, chip);
    }

    /// Chip at a location, if present.
    #[must_use]
    pub fn chip_at(&self, location: ChipLocation) -> Option<&Chip> {
        self.chips.get(&location)
    }

    /// All chips in location order.
    pub fn chips(&self) -> impl Iterator<Item = &Chip> {
        self.chips.values()
    }

    /// Number of chips.
    #[must_use]
    pub fn n_chips(&self) -> usize {
        self.chips.len()
    }
}
