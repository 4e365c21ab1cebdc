// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! TX block-ack session initiation.

use core::time::Duration;

use crate::peer::{PeerCaps, PeerEntry};

/// When to ask the firmware for a TX block-ack session.
#[derive(Debug, Clone, Copy)]
pub struct BaPolicy {
    /// Frames a TID must have sent before a session is requested.
    pub threshold: u32,
    /// Minimum gap between a failed request and the next one.
    pub cooldown: Duration,
}

impl PeerEntry {
    /// Counts one transmitted frame on `tid` and decides whether a session
    /// request should go out now. A positive decision marks the request
    /// pending.
    pub fn note_tx(&mut self, tid: u8, now: Duration, policy: &BaPolicy) -> bool {
        let tid = (tid & 0x7) as usize;
        let bit = 1u8 << tid;
        self.tx_frames[tid] = self.tx_frames[tid].saturating_add(1);
        if !self.caps.contains(PeerCaps::BA_CAPABLE)
            || self.ba_tx & bit != 0
            || self.ba_pending & bit != 0
            || self.tx_frames[tid] <= policy.threshold
        {
            return false;
        }
        if let Some(last) = self.last_addba[tid] {
            if now < last + policy.cooldown {
                return false;
            }
        }
        self.ba_pending |= bit;
        self.last_addba[tid] = Some(now);
        true
    }

    /// Records the outcome of a session request.
    pub fn on_ba_result(&mut self, tid: u8, established: bool, now: Duration) {
        let tid = (tid & 0x7) as usize;
        let bit = 1u8 << tid;
        self.ba_pending &= !bit;
        if established {
            self.ba_tx |= bit;
        } else {
            self.ba_tx &= !bit;
            self.last_addba[tid] = Some(now);
        }
    }

    /// Forgets the TX session on `tid`. Returns whether one existed.
    pub fn clear_ba(&mut self, tid: u8) -> bool {
        let bit = 1u8 << (tid & 0x7);
        let had = self.ba_tx & bit != 0;
        self.ba_tx &= !bit;
        self.ba_pending &= !bit;
        had
    }
}
