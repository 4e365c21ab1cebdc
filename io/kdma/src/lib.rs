// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! DMA bus address types and the transport buffer slot pool.
//!
//! A transport sees host memory only through a [`DmaBusAddress`]. This crate
//! owns the translation between host-owned buffers and those addresses:
//!
//! - [`DmaMapper`]: the platform capability that maps a CPU region to a bus
//!   address (IOMMU, linear offset, or none at all for bus-local handles).
//! - [`SlotPool`]: a fixed-capacity arena that takes ownership of a buffer
//!   while the transport holds it and hands back a [`DmaToken`]. The token
//!   is the only thing written on the wire; a completion carrying it finds
//!   the original buffer in O(1).
//! - [`addr_list`]: packing of many addresses into one address-list buffer
//!   for transports that consume an address index instead of per-buffer
//!   pushes.
#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

pub mod addr_list;
mod slot;

use core::{num::NonZeroU64, ptr::NonNull};

pub use self::slot::{BatchWrap, SlotPool, SlotState, Wrapped};

/// A bus memory address.
///
/// It's a wrapper type around an [`u64`]. Zero is never a valid address:
/// some transports encode "no buffer" as a zero address field.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct DmaBusAddress(u64);

impl DmaBusAddress {
    /// The invalid, all-zero address.
    pub const ZERO: Self = Self(0);

    /// Converts an [`u64`] to a bus address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Converts the address to an [`u64`].
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the zero address.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for DmaBusAddress {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl core::fmt::Debug for DmaBusAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("DmaBusAddress")
            .field(&format_args!("{:#X}", self.0))
            .finish()
    }
}

/// Direction of a DMA transfer, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Host memory is read by the device (TX).
    ToDevice,
    /// Host memory is written by the device (RX).
    FromDevice,
}

/// Platform capability that makes a CPU region visible to the transport.
pub trait DmaMapper: Send + Sync {
    /// Maps `len` bytes starting at `cpu` and returns the bus address.
    ///
    /// Returning [`DmaBusAddress::ZERO`] signals that no mapping could be
    /// produced.
    fn map(&self, cpu: NonNull<u8>, len: usize, dir: DmaDirection) -> DmaBusAddress;

    /// Tears down a mapping produced by [`DmaMapper::map`].
    fn unmap(&self, _addr: DmaBusAddress, _len: usize, _dir: DmaDirection) {}
}

/// A linear mapping `baddr = vaddr + offset`.
///
/// On hosts without an IOMMU the bus sees memory at a fixed offset from the
/// kernel's linear map, which is all this mapper models.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearMapper {
    offset: u64,
}

impl LinearMapper {
    /// Creates a mapper with the given bus offset.
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }
}

impl DmaMapper for LinearMapper {
    fn map(&self, cpu: NonNull<u8>, _len: usize, _dir: DmaDirection) -> DmaBusAddress {
        DmaBusAddress::new((cpu.as_ptr() as u64).wrapping_add(self.offset))
    }
}

/// How a [`SlotPool`] produces the transport-visible address of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// The buffer is mapped through a [`DmaMapper`].
    Bus,
    /// The transport copies data itself; the token doubles as a bus-local
    /// handle.
    Handle,
}

/// Opaque, never-zero reference to an occupied slot.
///
/// Encodes the slot index (plus one) in the low 32 bits and the slot
/// generation in the high 32 bits, so a token from a recycled slot is
/// detected instead of resolving to the new occupant.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DmaToken(NonZeroU64);

impl DmaToken {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        let raw = ((generation as u64) << 32) | (index as u64 + 1);
        // Low half is at least one.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Reconstructs a token from its wire representation.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// The wire representation.
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn index(self) -> Option<usize> {
        let low = self.0.get() as u32;
        (low as usize).checked_sub(1)
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl core::fmt::Debug for DmaToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "DmaToken({}#{})", self.0.get() as u32, self.generation())
    }
}

/// A buffer that can be lent to the transport.
pub trait DmaRegion {
    /// The CPU address and length the transport may access.
    fn dma_region(&self) -> (NonNull<u8>, usize);
}

/// The error type for slot pool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaError {
    /// Translation produced the zero address.
    ZeroAddress,
    /// The token does not name a slot of this pool.
    InvalidToken,
    /// The token names a slot that is free or was recycled since.
    StaleToken,
    /// All slots are occupied.
    Exhausted,
    /// An address list does not fit its buffer.
    BatchTooLarge,
}

impl DmaError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            DmaError::ZeroAddress => "Zero bus address",
            DmaError::InvalidToken => "Invalid slot token",
            DmaError::StaleToken => "Stale slot token",
            DmaError::Exhausted => "Slot pool exhausted",
            DmaError::BatchTooLarge => "Address list too large",
        }
    }

    /// Whether the condition indicates corruption rather than exhaustion.
    ///
    /// Fatal conditions must be escalated; they are never retried.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            DmaError::ZeroAddress | DmaError::InvalidToken | DmaError::StaleToken
        )
    }
}

impl core::fmt::Display for DmaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

/// A specialized `Result` type for DMA operations.
pub type DmaResult<T = ()> = Result<T, DmaError>;
