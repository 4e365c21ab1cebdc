// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Block-ack receive reordering.

use alloc::vec::Vec;
use core::time::Duration;

use hashbrown::HashMap;

use crate::{
    PeerIndex,
    consts::{SEQ_HALF, SEQ_MODULO},
};

/// `a - b` in sequence space.
pub const fn seq_sub(a: u16, b: u16) -> u16 {
    a.wrapping_sub(b) & (SEQ_MODULO - 1)
}

/// `a + n` in sequence space.
pub const fn seq_add(a: u16, n: u16) -> u16 {
    a.wrapping_add(n) & (SEQ_MODULO - 1)
}

/// Window geometry of a reorder session.
#[derive(Debug, Clone, Copy)]
pub struct ReorderParams {
    /// Window size; a power of two no larger than half the sequence space.
    pub window: u16,
    /// Frames a session may hold before it skips ahead.
    pub max_buffered: usize,
    /// How long a frame may wait for the gap before it is released.
    pub timeout: Duration,
}

/// The receive window of one (peer, TID).
pub struct ReorderSession<T> {
    base: u16,
    params: ReorderParams,
    slots: Vec<Option<(T, Duration)>>,
    buffered: usize,
}

impl<T> ReorderSession<T> {
    pub fn new(base: u16, params: ReorderParams) -> Self {
        let mut slots = Vec::with_capacity(params.window as usize);
        slots.resize_with(params.window as usize, || None);
        Self {
            base: base & (SEQ_MODULO - 1),
            params,
            slots,
            buffered: 0,
        }
    }

    /// Next expected sequence number.
    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    fn slot(&self, seq: u16) -> usize {
        seq as usize % self.slots.len()
    }

    /// Admits `item` with sequence `seq`, appending everything that becomes
    /// deliverable to `out` in order.
    ///
    /// Hands back frames that are old or duplicate.
    pub fn push(&mut self, seq: u16, item: T, now: Duration, out: &mut Vec<T>) -> Result<(), T> {
        let seq = seq & (SEQ_MODULO - 1);
        let window = self.params.window;
        let mut dist = seq_sub(seq, self.base);
        if dist >= SEQ_HALF {
            return Err(item);
        }
        if dist >= window {
            // Slide so that `seq` is the last slot of the window.
            let new_base = seq_sub(seq, window - 1);
            trace!("reorder: jump {} -> {}", self.base, new_base);
            self.release_until(new_base, out);
            dist = seq_sub(seq, self.base);
        }
        if dist == 0 {
            out.push(item);
            self.base = seq_add(self.base, 1);
            self.release_contiguous(out);
            return Ok(());
        }
        let idx = self.slot(seq);
        if self.slots[idx].is_some() {
            return Err(item);
        }
        self.slots[idx] = Some((item, now));
        self.buffered += 1;
        if self.buffered > self.params.max_buffered {
            self.skip_to_oldest(out);
        }
        Ok(())
    }

    /// Releases frames that waited longer than the timeout, skipping the
    /// gaps in front of them.
    pub fn flush_expired(&mut self, now: Duration, out: &mut Vec<T>) {
        while let Some(arrived) = self.oldest_arrival() {
            if now < arrived + self.params.timeout {
                break;
            }
            self.skip_to_oldest(out);
        }
    }

    /// When the oldest buffered frame will time out.
    pub fn next_expiry(&self) -> Option<Duration> {
        self.oldest_arrival().map(|t| t + self.params.timeout)
    }

    /// Releases every buffered frame in order, leaving the session empty.
    pub fn flush_all(&mut self, out: &mut Vec<T>) {
        while self.buffered > 0 {
            self.skip_to_oldest(out);
        }
    }

    /// Takes every buffered frame without ordering guarantees.
    pub fn drain(&mut self) -> Vec<T> {
        self.buffered = 0;
        self.slots.iter_mut().filter_map(|s| s.take().map(|(t, _)| t)).collect()
    }

    fn oldest_arrival(&self) -> Option<Duration> {
        let seq = self.oldest_seq()?;
        self.slots[self.slot(seq)].as_ref().map(|(_, t)| *t)
    }

    fn oldest_seq(&self) -> Option<u16> {
        if self.buffered == 0 {
            return None;
        }
        (1..self.params.window)
            .map(|d| seq_add(self.base, d))
            .find(|&s| self.slots[self.slot(s)].is_some())
    }

    fn skip_to_oldest(&mut self, out: &mut Vec<T>) {
        if let Some(seq) = self.oldest_seq() {
            trace!("reorder: skip {} -> {}", self.base, seq);
            self.base = seq;
            self.release_contiguous(out);
        }
    }

    fn release_until(&mut self, new_base: u16, out: &mut Vec<T>) {
        while self.base != new_base {
            let idx = self.slot(self.base);
            if let Some((item, _)) = self.slots[idx].take() {
                self.buffered -= 1;
                out.push(item);
            }
            self.base = seq_add(self.base, 1);
        }
        self.release_contiguous(out);
    }

    fn release_contiguous(&mut self, out: &mut Vec<T>) {
        loop {
            let idx = self.slot(self.base);
            let Some((item, _)) = self.slots[idx].take() else {
                break;
            };
            self.buffered -= 1;
            out.push(item);
            self.base = seq_add(self.base, 1);
        }
    }
}

/// Reorder sessions keyed by (peer, TID).
pub struct ReorderTable<T> {
    params: ReorderParams,
    sessions: HashMap<(PeerIndex, u8), ReorderSession<T>>,
}

impl<T> ReorderTable<T> {
    pub fn new(params: ReorderParams) -> Self {
        Self {
            params,
            sessions: HashMap::new(),
        }
    }

    /// Routes `item` through the session of (`peer`, `tid`), creating it on
    /// first use with `seq` as the window base.
    pub fn push(
        &mut self,
        peer: PeerIndex,
        tid: u8,
        seq: u16,
        item: T,
        now: Duration,
        out: &mut Vec<T>,
    ) -> Result<(), T> {
        let params = self.params;
        self.sessions
            .entry((peer, tid))
            .or_insert_with(|| {
                debug!("reorder: open session {} tid {} at {}", peer, tid, seq);
                ReorderSession::new(seq, params)
            })
            .push(seq, item, now, out)
    }

    pub fn session(&self, peer: PeerIndex, tid: u8) -> Option<&ReorderSession<T>> {
        self.sessions.get(&(peer, tid))
    }

    /// Ends a session, releasing its frames in order.
    pub fn teardown(&mut self, peer: PeerIndex, tid: u8, out: &mut Vec<T>) -> bool {
        match self.sessions.remove(&(peer, tid)) {
            Some(mut s) => {
                s.flush_all(out);
                true
            }
            None => false,
        }
    }

    /// Ends every session of `peer`, returning the frames they held.
    pub fn remove_peer(&mut self, peer: PeerIndex) -> Vec<T> {
        let mut dropped = Vec::new();
        self.sessions.retain(|(p, _), s| {
            if *p == peer {
                dropped.extend(s.drain());
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Releases timed-out frames from every session.
    pub fn flush_expired(&mut self, now: Duration, out: &mut Vec<T>) {
        for s in self.sessions.values_mut() {
            s.flush_expired(now, out);
        }
    }

    /// Earliest time a buffered frame times out.
    pub fn next_expiry(&self) -> Option<Duration> {
        self.sessions.values().filter_map(|s| s.next_expiry()).min()
    }

    /// Ends every session, returning the frames they held.
    pub fn clear(&mut self) -> Vec<T> {
        let mut dropped = Vec::new();
        for (_, mut s) in self.sessions.drain() {
            dropped.extend(s.drain());
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
