//! Error types for compression operations

use spinn_machine::{ChipLocation, CpuState};
use thiserror::Error;

/// Result type alias for compression operations
pub type Result<T> = std::result::Result<T, CompressionError>;

/// Errors that can occur while driving the on-chip compressors
#[derive(Debug, Error)]
pub enum CompressionError {
    /// SDRAM could not be allocated or stolen on a chip.
    ///
    /// Recoverable per chip: the orchestrator moves the chip to the
    /// host-fallback set instead of aborting the run.
    #[error("no SDRAM to use on chip {chip}: needed {needed} bytes")]
    NoSdramToUse {
        /// Chip that ran out of space
        chip: ChipLocation,
        /// Bytes that could not be found
        needed: usize,
    },

    /// An SDRAM allocation request was rejected by the machine.
    ///
    /// The loader interprets this as "allocation exhausted, try stealing".
    #[error("SDRAM allocation rejected on chip {chip}: {reason}")]
    MallocFailed {
        /// Chip the request was for
        chip: ChipLocation,
        /// Monitor's rejection reason
        reason: String,
    },

    /// No free cores remained on a chip for the sorter to run on.
    ///
    /// Recoverable per chip, like [`CompressionError::NoSdramToUse`].
    #[error("no free cores on chip {chip} for on-chip compression")]
    NoCoresAvailable {
        /// Chip with no spare cores
        chip: ChipLocation,
    },

    /// Compression failed on the named chips even after any host fallback.
    #[error("the router compressor failed on chips {chips:?}")]
    CompressionFailed {
        /// Chips whose tables could not be compressed or loaded
        chips: Vec<ChipLocation>,
    },

    /// A compressed table still exceeds the router's capacity.
    #[error(
        "table for chip {chip} has {entries} entries after compression \
         (router capacity {capacity})"
    )]
    TableTooBig {
        /// Chip the table belongs to
        chip: ChipLocation,
        /// Entries remaining after compression
        entries: usize,
        /// Router hardware capacity
        capacity: usize,
    },

    /// Cores failed to reach an expected state before the timeout.
    #[error("cores did not reach {expected}; status:\n{status}")]
    CoresNotInState {
        /// State the cores were expected to reach
        expected: CpuState,
        /// Per-core status dump
        status: String,
    },

    /// Wire-protocol failure from the transceiver.
    #[error("transceiver error: {reason}")]
    Transceiver {
        /// Reason for failure
        reason: String,
    },

    /// A wire-format block could not be decoded.
    #[error("malformed data block: {reason}")]
    MalformedData {
        /// Reason for failure
        reason: String,
    },
}

impl CompressionError {
    /// Create a no-SDRAM-to-use error
    pub fn no_sdram(chip: ChipLocation, needed: usize) -> Self {
        Self::NoSdramToUse { chip, needed }
    }

    /// Create a malloc-rejected error
    pub fn malloc_failed(chip: ChipLocation, reason: impl Into<String>) -> Self {
        Self::MallocFailed { chip, reason: reason.into() }
    }

    /// Create a transceiver error
    pub fn transceiver(reason: impl Into<String>) -> Self {
        Self::Transceiver { reason: reason.into() }
    }

    /// Create a malformed-data error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedData { reason: reason.into() }
    }

    /// Whether this error means "fall back to host compression for the chip"
    pub fn is_recoverable_per_chip(&self) -> bool {
        matches!(
            self,
            Self::NoSdramToUse { .. } | Self::MallocFailed { .. } | Self::NoCoresAvailable { .. }
        )
    }
}
