//! Host fallback compression.
//!
//! When a chip's on-chip compression fails (no SDRAM, no cores, or the
//! sorter reported defeat), its table is compressed here on the host instead:
//! same-route entries are merged pairwise wherever the merged key/mask cannot
//! capture traffic belonging to a different route. A key→atom-count map from
//! the machine graph bounds each key's real span, which admits merges a plain
//! key/mask overlap test would have to refuse.
//!
//! Strictly slower than the on-chip path and documented as the
//! degraded-but-correct route; the orchestrator logs a warning naming the
//! number of chips taking it.

use std::collections::BTreeMap;

use tracing::{debug, info};

use spinn_machine::{
    ChipLocation, MulticastRoutingEntry, RoutingTable, RoutingTables, ROUTER_AVAILABLE_ENTRIES,
};

use crate::encoder::generality;
use crate::error::{CompressionError, Result};
use crate::transceiver::Transceiver;

/// First key issued to each source vertex mapped to the vertex's atom count.
///
/// Needed because the link from key back to graph edge is lost by the time
/// compression runs.
#[derive(Debug, Clone, Default)]
pub struct KeyAtomMap {
    map: BTreeMap<u32, u32>,
}

impl KeyAtomMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a source key's atom count.
    pub fn insert(&mut self, key: u32, n_atoms: u32) {
        self.map.insert(key, n_atoms);
    }

    /// Atom count for a key, if known.
    #[must_use]
    pub fn n_atoms(&self, key: u32) -> Option<u32> {
        self.map.get(&key).copied()
    }
}

/// Whether two key/mask patterns can both match some key.
const fn patterns_intersect(key_a: u32, mask_a: u32, key_b: u32, mask_b: u32) -> bool {
    (key_a ^ key_b) & mask_a & mask_b == 0
}

/// Decompose `[key, key + n_atoms)` into aligned power-of-two key/mask
/// blocks. Bounded by 64 blocks for any u32 range.
fn span_blocks(key: u32, n_atoms: u32) -> Vec<(u32, u32)> {
    let mut blocks = Vec::new();
    let mut at = key;
    let mut left = n_atoms;
    while left > 0 {
        let align = if at == 0 { 31 } else { at.trailing_zeros().min(31) };
        // largest aligned power of two not exceeding what is left
        let size = 1_u32 << align.min(31 - left.leading_zeros());
        blocks.push((at, !(size - 1)));
        at = at.wrapping_add(size);
        left -= size;
    }
    blocks
}

/// Keys a pattern can really carry: the atom span when the map knows the
/// pattern's base key, otherwise the pattern itself.
fn coverage(key: u32, mask: u32, atoms: &KeyAtomMap) -> Vec<(u32, u32)> {
    match atoms.n_atoms(key) {
        Some(n) if n > 0 => span_blocks(key, n),
        _ => vec![(key, mask)],
    }
}

/// Whether two entries can both match some key that is really in flight.
fn entries_intersect(
    a_key: u32,
    a_mask: u32,
    b_key: u32,
    b_mask: u32,
    atoms: &KeyAtomMap,
) -> bool {
    let b_cover = coverage(b_key, b_mask, atoms);
    coverage(a_key, a_mask, atoms)
        .iter()
        .any(|&(ak, am)| b_cover.iter().any(|&(bk, bm)| patterns_intersect(ak, am, bk, bm)))
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    key: u32,
    mask: u32,
    route: u32,
}

/// Merge of two candidates: common bits keep their value, differing bits
/// become don't-cares.
const fn merge(a: Candidate, b: Candidate) -> Candidate {
    let mask = a.mask & b.mask & !(a.key ^ b.key);
    Candidate { key: a.key & mask, mask, route: a.route }
}

/// Compress one table on the host.
///
/// # Errors
///
/// [`CompressionError::TableTooBig`] when even the merged table exceeds the
/// router's capacity.
pub fn compress_table(table: &RoutingTable, atoms: &KeyAtomMap) -> Result<RoutingTable> {
    let mut buckets: BTreeMap<u32, Vec<Candidate>> = BTreeMap::new();
    for entry in &table.entries {
        buckets.entry(entry.spinnaker_route()).or_default().push(Candidate {
            key: entry.key,
            mask: entry.mask,
            route: entry.spinnaker_route(),
        });
    }

    let routes: Vec<u32> = buckets.keys().copied().collect();
    for route in routes {
        while let Some((i, j, candidate)) = try_merge_in_bucket(&buckets, route, atoms) {
            if let Some(bucket) = buckets.get_mut(&route) {
                bucket.swap_remove(j);
                bucket[i] = candidate;
            }
        }
    }

    let mut entries: Vec<MulticastRoutingEntry> = buckets
        .values()
        .flatten()
        .map(|c| MulticastRoutingEntry::from_spinnaker_route(c.key, c.mask, c.route))
        .collect();
    // Most specific first, so hardware match priority stays correct.
    entries.sort_by_key(|e| generality(e.key, e.mask));

    if entries.len() > ROUTER_AVAILABLE_ENTRIES {
        return Err(CompressionError::TableTooBig {
            chip: table.location,
            entries: entries.len(),
            capacity: ROUTER_AVAILABLE_ENTRIES,
        });
    }

    debug!(
        "host-compressed table for {}: {} -> {} entries",
        table.location,
        table.number_of_entries(),
        entries.len()
    );
    let mut compressed = RoutingTable::new(table.location);
    compressed.entries = entries;
    Ok(compressed)
}

/// Find the first safe merge in a route bucket.
fn try_merge_in_bucket(
    buckets: &BTreeMap<u32, Vec<Candidate>>,
    route: u32,
    atoms: &KeyAtomMap,
) -> Option<(usize, usize, Candidate)> {
    let bucket = buckets.get(&route)?;
    for i in 0..bucket.len() {
        for j in (i + 1)..bucket.len() {
            let candidate = merge(bucket[i], bucket[j]);
            if merge_is_safe(candidate, bucket[i], bucket[j], buckets, atoms) {
                return Some((i, j, candidate));
            }
        }
    }
    None
}

/// A merge is safe when the widened pattern cannot capture keys of an entry
/// with a different route, unless one of the merge's parents already could,
/// in which case the table's behaviour is unchanged by the merge.
fn merge_is_safe(
    candidate: Candidate,
    parent_a: Candidate,
    parent_b: Candidate,
    buckets: &BTreeMap<u32, Vec<Candidate>>,
    atoms: &KeyAtomMap,
) -> bool {
    for (&route, bucket) in buckets {
        if route == candidate.route {
            continue;
        }
        for other in bucket {
            if !entries_intersect(candidate.key, candidate.mask, other.key, other.mask, atoms) {
                continue;
            }
            let preexisting = entries_intersect(
                parent_a.key, parent_a.mask, other.key, other.mask, atoms,
            ) || entries_intersect(
                parent_b.key, parent_b.mask, other.key, other.mask, atoms,
            );
            if !preexisting {
                return false;
            }
        }
    }
    true
}

/// Compress and reload every chip in the failure set.
///
/// Chips not in the set are never touched; each reload clears the chip's
/// router before writing the compressed entry set.
///
/// # Errors
///
/// Propagates [`CompressionError::TableTooBig`] and wire-protocol failures;
/// a missing table for a named chip is a [`CompressionError::CompressionFailed`].
pub fn host_fallback(
    txrx: &mut dyn Transceiver,
    tables: &RoutingTables,
    failed_chips: &[ChipLocation],
    atoms: &KeyAtomMap,
    app_id: u8,
) -> Result<Vec<RoutingTable>> {
    let mut compressed_tables = Vec::with_capacity(failed_chips.len());
    for &chip in failed_chips {
        let Some(table) = tables.table_for(chip) else {
            return Err(CompressionError::CompressionFailed { chips: vec![chip] });
        };
        let compressed = compress_table(table, atoms)?;
        if !compressed.entries.is_empty() {
            txrx.clear_multicast_routes(chip)?;
            txrx.load_multicast_routes(chip, &compressed.entries, app_id)?;
        }
        info!(
            "chip {chip}: host compression loaded {} entries (was {})",
            compressed.number_of_entries(),
            table.number_of_entries()
        );
        compressed_tables.push(compressed);
    }
    Ok(compressed_tables)
}
