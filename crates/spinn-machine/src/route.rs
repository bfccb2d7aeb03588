//! Multicast routing tables.
//!
//! Each chip's router matches incoming packet keys against `(key, mask)`
//! pairs and forwards along the links and to the local cores named by the
//! winning entry. The hardware route word packs six link bits followed by
//! one bit per local processor.

use std::collections::BTreeMap;

use crate::machine::ChipLocation;

/// Router CAM entries usable by applications (one is reserved).
pub const ROUTER_AVAILABLE_ENTRIES: usize = 1023;

/// Inter-chip links per router.
pub const ROUTER_LINKS: u8 = 6;

/// One multicast routing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastRoutingEntry {
    /// 32-bit routing key.
    pub key: u32,
    /// 32-bit mask; a zero bit is a don't-care ("X") position.
    pub mask: u32,
    /// Outgoing link ids (0..5), ascending.
    pub link_ids: Vec<u8>,
    /// Target processor ids on this chip, ascending.
    pub processor_ids: Vec<u8>,
    /// Defaultable entries would be routed correctly even if absent
    /// (the packet would continue straight through the router).
    pub defaultable: bool,
}

impl MulticastRoutingEntry {
    /// Entry with no targets; extend via the fields directly.
    #[must_use]
    pub fn new(key: u32, mask: u32) -> Self {
        Self {
            key,
            mask,
            link_ids: Vec::new(),
            processor_ids: Vec::new(),
            defaultable: false,
        }
    }

    /// Builder-style link list.
    #[must_use]
    pub fn with_links(mut self, links: &[u8]) -> Self {
        self.link_ids = links.to_vec();
        self
    }

    /// Builder-style processor list.
    #[must_use]
    pub fn with_processors(mut self, processors: &[u8]) -> Self {
        self.processor_ids = processors.to_vec();
        self
    }

    /// Builder-style defaultable flag.
    #[must_use]
    pub fn defaultable(mut self, defaultable: bool) -> Self {
        self.defaultable = defaultable;
        self
    }

    /// Pack links and processors into the hardware route word:
    /// bit `l` for link `l`, bit `6 + p` for processor `p`.
    #[must_use]
    pub fn spinnaker_route(&self) -> u32 {
        let mut route = 0u32;
        for &link in &self.link_ids {
            route |= 1 << link;
        }
        for &p in &self.processor_ids {
            route |= 1 << (ROUTER_LINKS + p);
        }
        route
    }

    /// Rebuild link/processor lists from a hardware route word.
    #[must_use]
    pub fn from_spinnaker_route(key: u32, mask: u32, route: u32) -> Self {
        let link_ids = (0..ROUTER_LINKS).filter(|l| route & (1 << l) != 0).collect();
        let processor_ids = (0..26)
            .filter(|p| route & (1 << (ROUTER_LINKS + p)) != 0)
            .collect();
        Self {
            key,
            mask,
            link_ids,
            processor_ids,
            defaultable: false,
        }
    }

    /// Whether a packet key matches this entry.
    #[must_use]
    pub const fn matches(&self, packet_key: u32) -> bool {
        packet_key & self.mask == self.key
    }
}

/// The routing table for one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    /// Chip this table belongs to.
    pub location: ChipLocation,
    /// Entries, in insertion (priority) order.
    pub entries: Vec<MulticastRoutingEntry>,
}

impl RoutingTable {
    /// Empty table for a chip.
    #[must_use]
    pub const fn new(location: ChipLocation) -> Self {
        Self { location, entries: Vec::new() }
    }

    /// Number of entries.
    #[must_use]
    pub fn number_of_entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table fits the router without compression.
    #[must_use]
    pub fn fits_router(&self) -> bool {
        self.entries.len() <= ROUTER_AVAILABLE_ENTRIES
    }
}

/// All routing tables of a run, keyed by chip.
#[derive(Debug, Clone, Default)]
pub struct RoutingTables {
    tables: BTreeMap<ChipLocation, RoutingTable>,
}

impl RoutingTables {
    /// Empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a chip's table.
    pub fn add(&mut self, table: RoutingTable) {
        self.tables.insert(table.location, table);
    }

    /// Table for a chip, if any.
    #[must_use]
    pub fn table_for(&self, location: ChipLocation) -> Option<&RoutingTable> {
        self.tables.get(&location)
    }

    /// All tables in chip order.
    pub fn iter(&self) -> impl Iterator<Item = &RoutingTable> {
        self.tables.values()
    }

    /// Number of chips with a table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no chip has a table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_word_packs_links_then_processors() {
        let entry = MulticastRoutingEntry::new(0x100, 0xFFFF_FF00)
            .with_links(&[0, 5])
            .with_processors(&[0, 3]);
        // links 0,5 -> bits 0,5; processors 0,3 -> bits 6,9
        assert_eq!(entry.spinnaker_route(), 0b10_0100_0001 | (1 << 5));
    }

    #[test]
    fn route_word_round_trip() {
        let entry = MulticastRoutingEntry::new(0x42, 0xFFFF_FFFF)
            .with_links(&[2])
            .with_processors(&[1, 17]);
        let back = MulticastRoutingEntry::from_spinnaker_route(
            entry.key,
            entry.mask,
            entry.spinnaker_route(),
        );
        assert_eq!(back.link_ids, entry.link_ids);
        assert_eq!(back.processor_ids, entry.processor_ids);
    }

    #[test]
    fn key_matching_honours_mask() {
        let entry = MulticastRoutingEntry::new(0x1000, 0xFFFF_F000);
        assert!(entry.matches(0x1ABC));
        assert!(!entry.matches(0x2ABC));
    }

    #[test]
    fn tables_keyed_by_chip() {
        let mut tables = RoutingTables::new();
        tables.add(RoutingTable::new(ChipLocation::new(0, 0)));
        tables.add(RoutingTable::new(ChipLocation::new(1, 0)));
        assert_eq!(tables.len(), 2);
        assert!(tables.table_for(ChipLocation::new(1, 0)).is_some());
        assert!(tables.table_for(ChipLocation::new(9, 9)).is_none());
    }
}
