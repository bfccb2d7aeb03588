//! Wire-format encoders for the on-chip compressor firmware.
//!
//! All blocks are sequences of little-endian u32 words.
//!
//! ```text
//! routing table      app_id, n_entries, { key, mask, route, source } * n
//! plain table        app_id, as_much_as_possible, n_entries, entries * n
//! bitfield addresses threshold, retry | 0xFFFFFFFF, comms_ptr, n, { addr, p } * n
//! SDRAM matrix       n_blocks, { base, size } * n
//! ```
//!
//! The bitfield path sorts entries by ascending generality before packing;
//! the firmware's greedy merge relies on scanning most-specific entries
//! first. The plain path packs entries in table order.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use spinn_machine::{MulticastRoutingEntry, RoutingTable, ROUTER_LINKS};

use crate::arena::SdramBlock;
use crate::error::{CompressionError, Result};

/// Retry-count word meaning "retry until done".
pub const RETRY_FOREVER: u32 = 0xFFFF_FFFF;

/// Number of don't-care positions in a key/mask pair. Higher is more general.
#[must_use]
pub const fn generality(key: u32, mask: u32) -> u32 {
    (!key & !mask).count_ones()
}

/// The firmware's routing-source field.
///
/// For defaultable entries the link id is rotated by `(link + 3) % 6`, the
/// opposite link in the router's numbering. This is a firmware-defined
/// convention; do not simplify it.
#[must_use]
pub fn source_field(entry: &MulticastRoutingEntry) -> u32 {
    match entry.link_ids.first() {
        Some(&link) if entry.defaultable => u32::from((link + 3) % ROUTER_LINKS),
        Some(&link) => u32::from(link),
        None => 0,
    }
}

/// One packed table record, as the firmware sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedEntry {
    /// 32-bit routing key.
    pub key: u32,
    /// 32-bit mask.
    pub mask: u32,
    /// Hardware route word.
    pub route: u32,
    /// Routing-source field (see [`source_field`]).
    pub source: u32,
}

impl EncodedEntry {
    fn from_entry(entry: &MulticastRoutingEntry) -> Self {
        Self {
            key: entry.key,
            mask: entry.mask,
            route: entry.spinnaker_route(),
            source: source_field(entry),
        }
    }
}

/// Entries of a table in the order the bitfield compressor expects:
/// ascending generality, ties kept in table order.
#[must_use]
pub fn sorted_by_generality(table: &RoutingTable) -> Vec<&MulticastRoutingEntry> {
    let mut entries: Vec<&MulticastRoutingEntry> = table.entries.iter().collect();
    entries.sort_by_key(|e| generality(e.key, e.mask));
    entries
}

/// Pack a routing table for the bitfield sorter firmware.
#[must_use]
pub fn encode_table(app_id: u8, table: &RoutingTable) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + table.number_of_entries() * 16);
    buf.put_u32_le(u32::from(app_id));
    buf.put_u32_le(table.number_of_entries() as u32);
    for entry in sorted_by_generality(table) {
        put_entry(&mut buf, &EncodedEntry::from_entry(entry));
    }
    buf.freeze()
}

/// Pack a routing table for the plain (no-bitfield) compressor firmware.
///
/// Entries keep table order; the header carries the compress-as-much-as-
/// possible flag instead of relying on per-core registers.
#[must_use]
pub fn encode_table_plain(
    app_id: u8,
    compress_as_much_as_possible: bool,
    table: &RoutingTable,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(12 + table.number_of_entries() * 16);
    buf.put_u32_le(u32::from(app_id));
    buf.put_u32_le(u32::from(compress_as_much_as_possible));
    buf.put_u32_le(table.number_of_entries() as u32);
    for entry in &table.entries {
        put_entry(&mut buf, &EncodedEntry::from_entry(entry));
    }
    buf.freeze()
}

fn put_entry(buf: &mut BytesMut, entry: &EncodedEntry) {
    buf.put_u32_le(entry.key);
    buf.put_u32_le(entry.mask);
    buf.put_u32_le(entry.route);
    buf.put_u32_le(entry.source);
}

/// Unpack a bitfield-format table block: `(app_id, records)`.
///
/// # Errors
///
/// Returns [`CompressionError::MalformedData`] if the block is truncated or
/// the entry count disagrees with the payload length.
pub fn decode_table(data: &[u8]) -> Result<(u8, Vec<EncodedEntry>)> {
    let mut buf = data;
    if buf.remaining() < 8 {
        return Err(CompressionError::malformed("table block shorter than header"));
    }
    let app_id = buf.get_u32_le();
    let n_entries = buf.get_u32_le() as usize;
    if buf.remaining() != n_entries * 16 {
        return Err(CompressionError::malformed(format!(
            "table block claims {n_entries} entries but carries {} bytes",
            buf.remaining()
        )));
    }
    let mut entries = Vec::with_capacity(n_entries);
    for _ in 0..n_entries {
        entries.push(EncodedEntry {
            key: buf.get_u32_le(),
            mask: buf.get_u32_le(),
            route: buf.get_u32_le(),
            source: buf.get_u32_le(),
        });
    }
    Ok((app_id as u8, entries))
}

/// Pack the bitfield-address block the sorter reads via USER2.
#[must_use]
pub fn encode_address_block(
    threshold_percentage: u32,
    retry_count: Option<u32>,
    comms_sdram: u32,
    addresses: &[(u32, u8)],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + addresses.len() * 8);
    buf.put_u32_le(threshold_percentage);
    buf.put_u32_le(retry_count.unwrap_or(RETRY_FOREVER));
    buf.put_u32_le(comms_sdram);
    buf.put_u32_le(addresses.len() as u32);
    for &(bit_field_address, processor) in addresses {
        buf.put_u32_le(bit_field_address);
        buf.put_u32_le(u32::from(processor));
    }
    buf.freeze()
}

/// Pack the stealable-SDRAM matrix block the sorter reads via USER3.
#[must_use]
pub fn encode_matrix_block(blocks: &[SdramBlock]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + blocks.len() * 8);
    buf.put_u32_le(blocks.len() as u32);
    for block in blocks {
        buf.put_u32_le(block.base);
        buf.put_u32_le(block.size);
    }
    buf.freeze()
}
