//! Per-run compression provenance.
//!
//! Collected on success and failure paths alike: one item per sorter core,
//! recording its result code and how many bitfields it merged. Post-mortem
//! debugging of partial failures starts here.

use spinn_machine::ChipLocation;

/// Result of one sorter core's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvenanceItem {
    /// Chip the sorter ran on.
    pub chip: ChipLocation,
    /// Sorter core id.
    pub processor: u8,
    /// USER1 result code (0 = success).
    pub result_code: u32,
    /// USER2 count of bitfields merged into the table.
    pub bitfields_merged: u32,
}

impl ProvenanceItem {
    /// Whether this sorter succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.result_code == 0
    }
}

/// All provenance of one compression run.
#[derive(Debug, Clone, Default)]
pub struct CompressionProvenance {
    items: Vec<ProvenanceItem>,
}

impl CompressionProvenance {
    /// Empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sorter core's outcome.
    pub fn record(&mut self, item: ProvenanceItem) {
        self.items.push(item);
    }

    /// All items, in classification order.
    #[must_use]
    pub fn items(&self) -> &[ProvenanceItem] {
        &self.items
    }

    /// Total bitfields merged across all chips.
    #[must_use]
    pub fn total_bitfields_merged(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.bitfields_merged)).sum()
    }

    /// Chips whose sorters reported failure.
    #[must_use]
    pub fn failed_chips(&self) -> Vec<ChipLocation> {
        self.items
            .iter()
            .filter(|i| !i.succeeded())
            .map(|i| i.chip)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_failures() {
        let mut prov = CompressionProvenance::new();
        prov.record(ProvenanceItem {
            chip: ChipLocation::new(0, 0),
            processor: 1,
            result_code: 0,
            bitfields_merged: 12,
        });
        prov.record(ProvenanceItem {
            chip: ChipLocation::new(1, 0),
            processor: 1,
            result_code: 4,
            bitfields_merged: 3,
        });
        assert_eq!(prov.total_bitfields_merged(), 15);
        assert_eq!(prov.failed_chips(), vec![ChipLocation::new(1, 0)]);
    }
}
