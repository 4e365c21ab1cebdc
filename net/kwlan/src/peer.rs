// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The table of known stations.

use core::time::Duration;

use bitflags::bitflags;
use spin::RwLock;
use wlan::{MacAddress, WlanError, WlanResult};

use crate::{
    Mode, PeerIndex,
    consts::{MAX_STATIONS, MAX_TID, PEER_TABLE_SIZE},
};

bitflags! {
    /// Capabilities reported by the firmware for a peer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PeerCaps: u8 {
        /// The peer accepts block-ack sessions.
        const BA_CAPABLE  = 1 << 0;
        /// The peer finished address acquisition.
        const IP_ACQUIRED = 1 << 1;
    }
}

/// A peer as described by a firmware event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDesc {
    pub index: PeerIndex,
    pub mode: Mode,
    pub addr: MacAddress,
    pub caps: PeerCaps,
}

/// Firmware peer lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Add(PeerDesc),
    Update(PeerDesc),
    Delete(PeerIndex),
}

/// One slot of the peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEntry {
    /// Owning mode; `None` while the slot is unused.
    pub mode: Option<Mode>,
    pub addr: MacAddress,
    pub caps: PeerCaps,
    /// TIDs with an established TX block-ack session.
    pub ba_tx: u8,
    /// TIDs with a session request outstanding.
    pub ba_pending: u8,
    /// Time of the last session request per TID.
    pub last_addba: [Option<Duration>; MAX_TID],
    /// Frames transmitted per TID.
    pub tx_frames: [u32; MAX_TID],
}

impl PeerEntry {
    pub const EMPTY: Self = Self {
        mode: None,
        addr: MacAddress([0; 6]),
        caps: PeerCaps::empty(),
        ba_tx: 0,
        ba_pending: 0,
        last_addba: [None; MAX_TID],
        tx_frames: [0; MAX_TID],
    };

    pub const fn in_use(&self) -> bool {
        self.mode.is_some()
    }

    /// Whether a TX block-ack session is established on `tid`.
    pub const fn ba_established(&self, tid: u8) -> bool {
        self.ba_tx & (1 << (tid & 0x7)) != 0
    }
}

/// Station entries plus one reserved group entry per mode.
pub struct PeerTable {
    entries: RwLock<[PeerEntry; PEER_TABLE_SIZE]>,
}

impl PeerTable {
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new([PeerEntry::EMPTY; PEER_TABLE_SIZE]),
        }
    }

    /// Adds a station. An add for an occupied index replaces it; whatever
    /// the old station held elsewhere is the caller's to tear down.
    pub fn add(&self, desc: &PeerDesc) -> WlanResult {
        if desc.index.as_usize() >= MAX_STATIONS {
            return Err(WlanError::InvalidInput);
        }
        let mut entries = self.entries.write();
        let entry = &mut entries[desc.index.as_usize()];
        if entry.in_use() {
            debug!("peer: add over existing {} ({})", desc.index, entry.addr);
        }
        *entry = PeerEntry {
            mode: Some(desc.mode),
            addr: desc.addr,
            caps: desc.caps,
            ..PeerEntry::EMPTY
        };
        Ok(())
    }

    /// Updates the address and capabilities of an existing station.
    pub fn update(&self, desc: &PeerDesc) -> WlanResult {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(desc.index.as_usize())
            .filter(|e| e.in_use() && desc.index.as_usize() < MAX_STATIONS)
            .ok_or(WlanError::NotFound)?;
        entry.mode = Some(desc.mode);
        entry.addr = desc.addr;
        entry.caps = desc.caps;
        Ok(())
    }

    /// Clears a station, returning what it held.
    pub fn remove(&self, index: PeerIndex) -> WlanResult<PeerEntry> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(index.as_usize())
            .filter(|e| e.in_use())
            .ok_or(WlanError::NotFound)?;
        Ok(core::mem::replace(entry, PeerEntry::EMPTY))
    }

    pub fn get(&self, index: PeerIndex) -> Option<PeerEntry> {
        self.entries
            .read()
            .get(index.as_usize())
            .copied()
            .filter(PeerEntry::in_use)
    }

    /// Runs `f` on an in-use entry.
    pub fn with_entry<R>(&self, index: PeerIndex, f: impl FnOnce(&mut PeerEntry) -> R) -> Option<R> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(index.as_usize()).filter(|e| e.in_use())?;
        Some(f(entry))
    }

    /// Finds the station of `mode` with address `addr`.
    pub fn lookup(&self, mode: Mode, addr: &MacAddress) -> Option<PeerIndex> {
        let entries = self.entries.read();
        entries[..MAX_STATIONS]
            .iter()
            .position(|e| e.mode == Some(mode) && e.addr == *addr)
            .map(|i| PeerIndex(i as u8))
    }

    /// The only station of `mode`, if there is exactly one.
    pub fn sole_peer(&self, mode: Mode) -> Option<PeerIndex> {
        let entries = self.entries.read();
        let mut found = None;
        for (i, e) in entries[..MAX_STATIONS].iter().enumerate() {
            if e.mode == Some(mode) {
                if found.is_some() {
                    return None;
                }
                found = Some(PeerIndex(i as u8));
            }
        }
        found
    }

    /// Indices of the stations of `mode`.
    pub fn peers_of(&self, mode: Mode) -> alloc::vec::Vec<PeerIndex> {
        let entries = self.entries.read();
        entries[..MAX_STATIONS]
            .iter()
            .enumerate()
            .filter(|(_, e)| e.mode == Some(mode))
            .map(|(i, _)| PeerIndex(i as u8))
            .collect()
    }

    /// Number of stations in use.
    pub fn len(&self) -> usize {
        self.entries.read().iter().filter(|e| e.in_use()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every station.
    pub fn clear(&self) {
        self.entries.write().fill(PeerEntry::EMPTY);
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
