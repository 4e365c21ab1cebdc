// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Core traits and types for WLAN datapath transports.
//!
//! A WLAN chip is reached over a bus transport (PCIe, SDIO, shared memory)
//! that moves opaque buffers between host memory and the radio firmware.
//! This crate defines the narrow contract the datapath engine consumes from
//! such a transport ([`TransportOps`]), the RAII frame buffers it moves
//! ([`FrameBuf`], [`FrameBufPool`]) and the shared error type.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

#[cfg(feature = "mock")]
/// In-memory transport for tests.
pub mod mock;

mod frame_buf;
mod transport;

pub use self::{
    frame_buf::{FrameBuf, FrameBufPool},
    transport::{BufDesc, Channel, DescSlot, RxBuffer, TransportCaps, TransportOps},
};

/// The hardware (MAC) address of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// The broadcast address.
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Reads the address from the first six bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Whether the group bit is set (multicast or broadcast).
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Whether this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

/// The error type for WLAN driver operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WlanError {
    /// An entity already exists.
    AlreadyExists,
    /// Try again, for non-blocking APIs.
    WouldBlock,
    /// Bad internal state.
    BadState,
    /// Invalid parameter/argument.
    InvalidInput,
    /// Input/output error on the transport.
    Io,
    /// Not enough space/cannot allocate memory.
    NoMemory,
    /// The requested entity is not found.
    NotFound,
    /// Device or resource is busy.
    ResourceBusy,
    /// The operation's timeout expired.
    TimedOut,
    /// This operation is unsupported or unimplemented.
    Unsupported,
}

impl WlanError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            WlanError::AlreadyExists => "Entity already exists",
            WlanError::WouldBlock => "Try again",
            WlanError::BadState => "Bad state",
            WlanError::InvalidInput => "Invalid parameter",
            WlanError::Io => "Input/output error",
            WlanError::NoMemory => "Not enough memory",
            WlanError::NotFound => "Entity not found",
            WlanError::ResourceBusy => "Resource is busy",
            WlanError::TimedOut => "Timed out",
            WlanError::Unsupported => "Unsupported operation",
        }
    }
}

impl core::fmt::Display for WlanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

impl From<kdma::DmaError> for WlanError {
    fn from(value: kdma::DmaError) -> Self {
        match value {
            kdma::DmaError::Exhausted => WlanError::NoMemory,
            kdma::DmaError::BatchTooLarge => WlanError::InvalidInput,
            _ => WlanError::BadState,
        }
    }
}

/// A specialized `Result` type for WLAN operations.
pub type WlanResult<T = ()> = Result<T, WlanError>;
