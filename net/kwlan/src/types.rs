// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Interface modes, access categories and peer indices.

use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumCount, EnumIter, FromRepr};

use crate::consts::{MAX_STATIONS, PEER_TABLE_SIZE};

/// A virtual interface role sharing the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumCount, EnumIter, FromRepr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Mode {
    Station = 0,
    Ap = 1,
    P2pClient = 2,
    P2pGo = 3,
    P2pDevice = 4,
    Ibss = 5,
}

impl Mode {
    /// Position of the mode in per-mode tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether the mode associates with a single upstream peer.
    pub const fn is_station_side(self) -> bool {
        matches!(self, Mode::Station | Mode::P2pClient)
    }

    /// Reserved peer index carrying this mode's group-addressed traffic.
    pub const fn group_peer(self) -> PeerIndex {
        PeerIndex((MAX_STATIONS + self as usize) as u8)
    }
}

bitflags! {
    /// A set of [`Mode`]s.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModeSet: u8 {
        const STATION    = 1 << Mode::Station as u8;
        const AP         = 1 << Mode::Ap as u8;
        const P2P_CLIENT = 1 << Mode::P2pClient as u8;
        const P2P_GO     = 1 << Mode::P2pGo as u8;
        const P2P_DEVICE = 1 << Mode::P2pDevice as u8;
        const IBSS       = 1 << Mode::Ibss as u8;
    }
}

impl ModeSet {
    /// The set holding only `mode`.
    pub const fn of(mode: Mode) -> Self {
        Self::from_bits_retain(1 << mode as u8)
    }

    /// Whether `mode` is in the set.
    pub const fn has(self, mode: Mode) -> bool {
        self.contains(Self::of(mode))
    }

    /// Iterates the modes in the set.
    pub fn modes(self) -> impl Iterator<Item = Mode> {
        use strum::IntoEnumIterator;
        Mode::iter().filter(move |m| self.has(*m))
    }
}

/// WMM access category, in decreasing priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumCount, EnumIter, FromRepr)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum AccessCategory {
    Voice = 0,
    Video = 1,
    BestEffort = 2,
    Background = 3,
}

impl AccessCategory {
    /// All categories, highest priority first.
    pub const ALL: [Self; 4] = [Self::Voice, Self::Video, Self::BestEffort, Self::Background];

    /// Maps a TID to its category following 802.1D user priorities.
    pub const fn from_tid(tid: u8) -> Self {
        match tid & 0x7 {
            1 | 2 => Self::Background,
            0 | 3 => Self::BestEffort,
            4 | 5 => Self::Video,
            _ => Self::Voice,
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Derives the TID from a producer priority hint.
pub const fn priority_to_tid(priority: u8) -> u8 {
    priority & 0x7
}

/// Index into the peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeerIndex(pub u8);

impl PeerIndex {
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether the index falls inside the peer table.
    pub const fn is_valid(self) -> bool {
        self.as_usize() < PEER_TABLE_SIZE
    }

    /// Whether the index is one of the reserved group entries.
    pub const fn is_group(self) -> bool {
        self.is_valid() && self.as_usize() >= MAX_STATIONS
    }

    /// The mode owning a reserved group entry.
    pub fn group_mode(self) -> Option<Mode> {
        if !self.is_group() {
            return None;
        }
        Mode::from_repr((self.as_usize() - MAX_STATIONS) as u8)
    }
}

impl core::fmt::Display for PeerIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}
