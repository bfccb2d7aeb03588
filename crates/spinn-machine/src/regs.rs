//! VCPU register block layout.
//!
//! SCAMP keeps one `vcpu_t` block per core in system RAM. The four USER
//! registers inside each block are the only mailbox a host has into a running
//! system binary: the compression firmware reads its input pointers from them
//! and reports its result codes back through them.
//!
//! ```text
//! 0xE5007000: vcpu_t[0]            base of the per-core block array
//!   +0x70:    user0                four u32 USER registers per core
//!   +0x74:    user1
//!   +0x78:    user2
//!   +0x7C:    user3
//! 0xE5007080: vcpu_t[1]            blocks are 128 bytes apart
//! ```

/// Base address of the `vcpu_t` block array in system RAM.
pub const VCPU_BASE: u32 = 0xE500_7000;

/// Bytes per `vcpu_t` block.
pub const VCPU_BYTES: u32 = 128;

/// Offset of `user0` within a block.
pub const USER0_OFFSET: u32 = 0x70;

/// Address of USER register `n` (0..=3) for processor `p`.
#[must_use]
pub const fn user_register_address(p: u8, n: u8) -> u32 {
    VCPU_BASE + (p as u32) * VCPU_BYTES + USER0_OFFSET + (n as u32) * 4
}

/// Address of USER0 for processor `p`.
#[must_use]
pub const fn user_0_address(p: u8) -> u32 {
    user_register_address(p, 0)
}

/// Address of USER1 for processor `p`.
#[must_use]
pub const fn user_1_address(p: u8) -> u32 {
    user_register_address(p, 1)
}

/// Address of USER2 for processor `p`.
#[must_use]
pub const fn user_2_address(p: u8) -> u32 {
    user_register_address(p, 2)
}

/// Address of USER3 for processor `p`.
#[must_use]
pub const fn user_3_address(p: u8) -> u32 {
    user_register_address(p, 3)
}
