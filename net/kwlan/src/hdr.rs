// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The host-interface header carried in front of every buffer exchanged
//! with the firmware.
//!
//! ```text
//!  0        1        2        3        4 ...
//! +--------+--------+--------+--------+----------------
//! |kind|mod| flags  |   payload len   | kind extension
//! +--------+--------+--------+--------+----------------
//! ```
//!
//! Byte 0 holds the frame kind in bits 0-2 and the mode in bits 3-5. The
//! data extension is six bytes: peer, TID, credit color, reserved and the
//! little-endian sequence control (fragment number in the low four bits,
//! sequence number in the high twelve). The command extension is a
//! little-endian sequence number followed by two reserved bytes. Credit
//! reports carry one little-endian `u16` delta per color as payload.

use alloc::vec::Vec;

use bitflags::bitflags;
use wlan::{WlanError, WlanResult};

use crate::{Mode, PeerIndex, consts::MAX_TID, flow::ColorId};

/// Length of the header shared by all kinds.
pub const COMMON_LEN: usize = 4;
/// Length of a data frame header.
pub const DATA_HDR_LEN: usize = COMMON_LEN + 6;
/// Length of a command frame header.
pub const CMD_HDR_LEN: usize = COMMON_LEN + 4;
/// Header room producers must leave in front of TX payloads.
pub const TX_HEADROOM: usize = DATA_HDR_LEN;

/// Color value meaning "no credit color" on the wire.
const NO_COLOR: u8 = 0xff;

/// What a buffer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Data = 0,
    Command = 1,
    Event = 2,
    CreditReport = 3,
}

impl FrameKind {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Data),
            1 => Some(Self::Command),
            2 => Some(Self::Event),
            3 => Some(Self::CreditReport),
            _ => None,
        }
    }
}

bitflags! {
    /// Per-buffer header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HdrFlags: u8 {
        /// More fragments of this MSDU follow.
        const MORE_FRAGS   = 1 << 0;
        /// The frame belongs to a block-ack session and must be reordered.
        const REORDER      = 1 << 1;
        /// Credit report: zero every bucket instead of applying deltas.
        const CREDIT_RESET = 1 << 2;
    }
}

/// Header of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRepr {
    pub mode: Mode,
    pub flags: HdrFlags,
    pub peer: PeerIndex,
    pub tid: u8,
    pub color: Option<ColorId>,
    pub seq: u16,
    pub frag: u8,
    pub payload_len: u16,
}

/// Header of a command or command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRepr {
    pub mode: Mode,
    pub seq: u16,
    pub payload_len: u16,
}

/// A parsed host-interface header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRepr {
    Data(DataRepr),
    Command(CommandRepr),
    Event { mode: Mode, payload_len: u16 },
    Credit { reset: bool, payload_len: u16 },
}

impl HostRepr {
    /// Parses the header at the start of `buf`, checking that the whole
    /// payload is present.
    pub fn parse(buf: &[u8]) -> WlanResult<Self> {
        if buf.len() < COMMON_LEN {
            return Err(WlanError::InvalidInput);
        }
        let kind = FrameKind::from_bits(buf[0] & 0x7).ok_or(WlanError::InvalidInput)?;
        let mode = Mode::from_repr((buf[0] >> 3) & 0x7);
        let flags = HdrFlags::from_bits_truncate(buf[1]);
        let payload_len = u16::from_le_bytes([buf[2], buf[3]]);

        let repr = match kind {
            FrameKind::Data => {
                if buf.len() < DATA_HDR_LEN {
                    return Err(WlanError::InvalidInput);
                }
                let tid = buf[5];
                if tid as usize >= MAX_TID {
                    return Err(WlanError::InvalidInput);
                }
                let seqctl = u16::from_le_bytes([buf[8], buf[9]]);
                HostRepr::Data(DataRepr {
                    mode: mode.ok_or(WlanError::InvalidInput)?,
                    flags,
                    peer: PeerIndex(buf[4]),
                    tid,
                    color: (buf[6] != NO_COLOR).then_some(ColorId(buf[6])),
                    seq: seqctl >> 4,
                    frag: (seqctl & 0xf) as u8,
                    payload_len,
                })
            }
            FrameKind::Command => {
                if buf.len() < CMD_HDR_LEN {
                    return Err(WlanError::InvalidInput);
                }
                HostRepr::Command(CommandRepr {
                    mode: mode.ok_or(WlanError::InvalidInput)?,
                    seq: u16::from_le_bytes([buf[4], buf[5]]),
                    payload_len,
                })
            }
            FrameKind::Event => HostRepr::Event {
                mode: mode.ok_or(WlanError::InvalidInput)?,
                payload_len,
            },
            FrameKind::CreditReport => HostRepr::Credit {
                reset: flags.contains(HdrFlags::CREDIT_RESET),
                payload_len,
            },
        };
        if buf.len() < repr.header_len() + payload_len as usize {
            return Err(WlanError::InvalidInput);
        }
        Ok(repr)
    }

    /// Length of the header including the kind extension.
    pub const fn header_len(&self) -> usize {
        match self {
            HostRepr::Data(_) => DATA_HDR_LEN,
            HostRepr::Command(_) => CMD_HDR_LEN,
            HostRepr::Event { .. } | HostRepr::Credit { .. } => COMMON_LEN,
        }
    }

    pub const fn payload_len(&self) -> usize {
        match self {
            HostRepr::Data(d) => d.payload_len as usize,
            HostRepr::Command(c) => c.payload_len as usize,
            HostRepr::Event { payload_len, .. } | HostRepr::Credit { payload_len, .. } => {
                *payload_len as usize
            }
        }
    }

    /// Writes the header into the start of `buf`.
    pub fn emit(&self, buf: &mut [u8]) -> WlanResult {
        let len = self.header_len();
        if buf.len() < len {
            return Err(WlanError::InvalidInput);
        }
        let (kind, mode, flags) = match self {
            HostRepr::Data(d) => (FrameKind::Data, d.mode as u8, d.flags),
            HostRepr::Command(c) => (FrameKind::Command, c.mode as u8, HdrFlags::empty()),
            HostRepr::Event { mode, .. } => (FrameKind::Event, *mode as u8, HdrFlags::empty()),
            HostRepr::Credit { reset, .. } => {
                let mut flags = HdrFlags::empty();
                flags.set(HdrFlags::CREDIT_RESET, *reset);
                (FrameKind::CreditReport, 0, flags)
            }
        };
        buf[0] = kind as u8 | (mode << 3);
        buf[1] = flags.bits();
        buf[2..4].copy_from_slice(&(self.payload_len() as u16).to_le_bytes());
        match self {
            HostRepr::Data(d) => {
                buf[4] = d.peer.0;
                buf[5] = d.tid;
                buf[6] = d.color.map_or(NO_COLOR, |c| c.0);
                buf[7] = 0;
                let seqctl = ((d.seq & 0x0fff) << 4) | (d.frag & 0xf) as u16;
                buf[8..10].copy_from_slice(&seqctl.to_le_bytes());
            }
            HostRepr::Command(c) => {
                buf[4..6].copy_from_slice(&c.seq.to_le_bytes());
                buf[6..8].fill(0);
            }
            HostRepr::Event { .. } | HostRepr::Credit { .. } => {}
        }
        Ok(())
    }
}

/// Reads the per-color deltas of a credit report payload.
pub fn credit_deltas(payload: &[u8]) -> impl Iterator<Item = (ColorId, u32)> + '_ {
    payload
        .chunks_exact(2)
        .enumerate()
        .map(|(i, d)| (ColorId(i as u8), u16::from_le_bytes([d[0], d[1]]) as u32))
}

/// Encodes a credit report payload with one delta per color.
pub fn encode_credit_deltas(deltas: &[u16]) -> Vec<u8> {
    deltas.iter().flat_map(|d| d.to_le_bytes()).collect()
}
