// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The bus transport contract.

use alloc::vec::Vec;

use bitflags::bitflags;
use kdma::{DmaBusAddress, DmaToken};

use crate::{FrameBuf, WlanResult};

/// A logical transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(pub u8);

impl Channel {
    /// Firmware commands (host to chip).
    pub const COMMAND: Self = Self(0);
    /// Data frames (host to chip).
    pub const DATA: Self = Self(1);
    /// Everything received from the chip.
    pub const RX: Self = Self(2);
}

bitflags! {
    /// What a transport implementation can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransportCaps: u32 {
        /// The firmware grants TX credits; the host must not exceed them.
        const CREDIT_FLOW = 1 << 0;
        /// Data pushes carry one address-list buffer instead of a
        /// descriptor per frame.
        const ADDR_LIST   = 1 << 1;
        /// Receive buffers are posted by the host and filled in place.
        const POSTED_RX   = 1 << 2;
        /// Buffers are reached through bus addresses (DMA). Without this
        /// bit the transport copies, and addresses are bus-local handles.
        const BUS_ADDRESS = 1 << 3;
    }
}

/// A ring slot reserved by [`TransportOps::alloc_buffer_descriptors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescSlot {
    /// Ring index on the channel.
    pub index: u16,
    /// Bytes the device may write into a buffer posted here.
    pub capacity: usize,
}

/// One buffer handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufDesc {
    /// Echoed back on completion.
    pub token: DmaToken,
    /// Where the transport finds the bytes.
    pub addr: DmaBusAddress,
    /// Number of valid bytes (TX) or room for the device (RX).
    pub len: usize,
    /// Ring slot for posted receive buffers.
    pub slot: Option<u16>,
}

/// A buffer the transport received from the chip.
#[derive(Debug)]
pub enum RxBuffer {
    /// A previously posted buffer, now holding `len` bytes.
    Posted {
        /// Token of the posting.
        token: DmaToken,
        /// Bytes written by the device.
        len: usize,
    },
    /// A buffer filled by a copying transport.
    Inline(FrameBuf),
}

/// Operations a bus transport implements for the datapath.
///
/// Completions are callback driven: the transport reports finished pushes
/// and received buffers through the datapath's entry points, from whatever
/// context its interrupt handling runs in.
pub trait TransportOps: Send + Sync {
    /// The name of the transport.
    fn name(&self) -> &str;

    /// Capabilities of the transport.
    fn caps(&self) -> TransportCaps;

    /// Hands a batch of buffers to `channel`, without blocking.
    ///
    /// On error none of the buffers were accepted.
    fn push_batch(&self, channel: Channel, bufs: &[BufDesc]) -> WlanResult;

    /// Reserves up to `count` ring slots on `channel` for posting buffers.
    fn alloc_buffer_descriptors(&self, channel: Channel, count: usize) -> WlanResult<Vec<DescSlot>>;
}
