//! Per-chip stealable SDRAM arena.
//!
//! When a fresh SDRAM allocation fails, the loader borrows space from spare
//! memory the application layer has declared stealable (unused synaptic
//! matrix regions, typically). The arena is the single mutator of that block
//! list: a first-fit steal returns the block's base and leaves the remainder
//! at `base + size`.

use spinn_machine::ChipLocation;

use crate::error::{CompressionError, Result};

/// Blocks smaller than one heap object are useless to the firmware and are
/// never tracked.
pub const MIN_HEAP_BLOCK: u32 = 32;

/// One stealable region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdramBlock {
    /// SDRAM base address.
    pub base: u32,
    /// Free bytes remaining at `base`.
    pub size: u32,
}

/// The stealable blocks of one chip.
#[derive(Debug, Clone)]
pub struct SdramArena {
    chip: ChipLocation,
    blocks: Vec<SdramBlock>,
}

impl SdramArena {
    /// Empty arena for a chip.
    #[must_use]
    pub const fn new(chip: ChipLocation) -> Self {
        Self { chip, blocks: Vec::new() }
    }

    /// Chip this arena serves.
    #[must_use]
    pub const fn chip(&self) -> ChipLocation {
        self.chip
    }

    /// Track a stealable block. Blocks below [`MIN_HEAP_BLOCK`] are dropped;
    /// the list stays sorted by base address.
    pub fn add_block(&mut self, base: u32, size: u32) {
        if size <= MIN_HEAP_BLOCK {
            return;
        }
        self.blocks.push(SdramBlock { base, size });
        self.blocks.sort_by_key(|b| b.base);
    }

    /// First-fit steal: take `size` bytes from the first block that can hold
    /// them. The stolen region sits at the block's base; the remainder keeps
    /// the tail (`base + size`, shrunk by `size`).
    ///
    /// # Errors
    ///
    /// Returns [`CompressionError::NoSdramToUse`] when no block is large
    /// enough.
    pub fn steal(&mut self, size: u32) -> Result<u32> {
        for block in &mut self.blocks {
            if block.size >= size {
                let stolen = block.base;
                block.base += size;
                block.size -= size;
                return Ok(stolen);
            }
        }
        Err(CompressionError::no_sdram(self.chip, size as usize))
    }

    /// Remaining blocks, base-ascending. Fully consumed blocks stay listed
    /// with size zero so the firmware's view matches the host's.
    #[must_use]
    pub fn blocks(&self) -> &[SdramBlock] {
        &self.blocks
    }

    /// Total stealable bytes remaining.
    #[must_use]
    pub fn total_free(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.size)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with(blocks: &[(u32, u32)]) -> SdramArena {
        let mut arena = SdramArena::new(ChipLocation::new(0, 0));
        for &(base, size) in blocks {
            arena.add_block(base, size);
        }
        arena
    }

    #[test]
    fn steal_is_first_fit() {
        let mut arena = arena_with(&[(0x1000, 64), (0x2000, 256)]);
        // 100 bytes does not fit the first block
        assert_eq!(arena.steal(100).unwrap(), 0x2000);
        assert_eq!(arena.blocks()[1], SdramBlock { base: 0x2064, size: 156 });
    }

    #[test]
    fn steal_remainder_keeps_the_tail() {
        let mut arena = arena_with(&[(0x8000, 512)]);
        let stolen = arena.steal(128).unwrap();
        assert_eq!(stolen, 0x8000);
        assert_eq!(arena.blocks(), &[SdramBlock { base: 0x8080, size: 384 }]);
    }

    #[test]
    fn exact_fit_leaves_empty_block() {
        let mut arena = arena_with(&[(0x4000, 200)]);
        assert_eq!(arena.steal(200).unwrap(), 0x4000);
        assert_eq!(arena.blocks(), &[SdramBlock { base: 0x40C8, size: 0 }]);
        assert_eq!(arena.total_free(), 0);
    }

    #[test]
    fn steal_fails_when_nothing_fits() {
        let mut arena = arena_with(&[(0x1000, 64)]);
        let err = arena.steal(65).unwrap_err();
        assert!(matches!(err, CompressionError::NoSdramToUse { needed: 65, .. }));
    }

    #[test]
    fn tiny_blocks_are_never_tracked() {
        let arena = arena_with(&[(0x1000, 32), (0x2000, 16), (0x3000, 33)]);
        assert_eq!(arena.blocks().len(), 1);
        assert_eq!(arena.blocks()[0].base, 0x3000);
    }
}
