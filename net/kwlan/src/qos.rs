// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Per-mode, per-access-category, per-peer TX queues and the weighted
//! scheduler that merges them.

use alloc::{collections::VecDeque, vec, vec::Vec};
use core::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use spin::Mutex;
use strum::EnumCount;

use crate::{
    Mode, PeerIndex,
    consts::{AC_COUNT, PEER_TABLE_SIZE},
    msg::{ListId, Message, MsgPool, MsgState},
};

/// Splits `available` transmissions across access categories.
///
/// Each category in priority order takes `weight` percent of what is left
/// when a lower category has backlog, and everything left otherwise.
/// Rounding leftovers go to the first categories that can use them.
pub fn apportion_acs(available: usize, queued: &[usize; AC_COUNT], weights: &[u32; 3]) -> [usize; AC_COUNT] {
    let mut share = [0usize; AC_COUNT];
    let mut remaining = available;
    for ac in 0..AC_COUNT {
        if remaining == 0 {
            break;
        }
        let lower_backlog = queued[ac + 1..].iter().any(|&q| q > 0);
        let want = if ac < weights.len() && lower_backlog {
            remaining * weights[ac] as usize / 100
        } else {
            remaining
        };
        share[ac] = want.min(queued[ac]);
        remaining -= share[ac];
    }
    for ac in 0..AC_COUNT {
        if remaining == 0 {
            break;
        }
        let extra = (queued[ac] - share[ac]).min(remaining);
        share[ac] += extra;
        remaining -= extra;
    }
    share
}

/// Splits a category share across peers in proportion to their backlog,
/// giving every backlogged peer at least one while the share lasts.
pub fn apportion_peers(share: usize, backlog: &[usize]) -> Vec<usize> {
    let total: usize = backlog.iter().sum();
    if share >= total {
        return backlog.to_vec();
    }
    let mut alloc = vec![0usize; backlog.len()];
    let mut remaining = share;
    for (i, &b) in backlog.iter().enumerate() {
        if b == 0 || remaining == 0 {
            continue;
        }
        let n = (share * b / total).max(1).min(b).min(remaining);
        alloc[i] = n;
        remaining -= n;
    }
    for (i, &b) in backlog.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let extra = (b - alloc[i]).min(remaining);
        alloc[i] += extra;
        remaining -= extra;
    }
    alloc
}

/// How many expired frames one queue of `len` may lose this cycle, given
/// the mode's backlog as a percentage of the pool.
pub fn eviction_limit(len: usize, pressure_pct: usize, scale_pct: u32) -> usize {
    let pct = (pressure_pct * scale_pct as usize / 100).min(100);
    (len * pct / 100).max(1)
}

struct ModeQueues {
    nodes: Vec<Mutex<VecDeque<Message>>>,
    per_peer: Vec<AtomicUsize>,
    per_ac: [AtomicUsize; AC_COUNT],
    total: AtomicUsize,
}

impl ModeQueues {
    fn new() -> Self {
        Self {
            nodes: (0..AC_COUNT * PEER_TABLE_SIZE)
                .map(|_| Mutex::new(VecDeque::new()))
                .collect(),
            per_peer: (0..PEER_TABLE_SIZE).map(|_| AtomicUsize::new(0)).collect(),
            per_ac: core::array::from_fn(|_| AtomicUsize::new(0)),
            total: AtomicUsize::new(0),
        }
    }

    fn node(&self, ac: usize, peer: usize) -> &Mutex<VecDeque<Message>> {
        &self.nodes[ac * PEER_TABLE_SIZE + peer]
    }

    /// Pops up to `n` frames from one node, keeping the counters in step.
    fn pop(&self, ac: usize, peer: usize, n: usize, mut f: impl FnMut(Message)) -> usize {
        let mut node = self.node(ac, peer).lock();
        let n = n.min(node.len());
        for _ in 0..n {
            if let Some(msg) = node.pop_front() {
                f(msg);
            }
        }
        self.uncount(ac, peer, n);
        n
    }

    fn uncount(&self, ac: usize, peer: usize, n: usize) {
        if n > 0 {
            self.per_peer[peer].fetch_sub(n, Ordering::AcqRel);
            self.per_ac[ac].fetch_sub(n, Ordering::AcqRel);
            self.total.fetch_sub(n, Ordering::AcqRel);
        }
    }
}

/// The queue hierarchy of every mode.
pub struct QosQueues {
    modes: Vec<ModeQueues>,
}

impl QosQueues {
    pub fn new() -> Self {
        Self {
            modes: (0..Mode::COUNT).map(|_| ModeQueues::new()).collect(),
        }
    }

    fn mode(&self, mode: Mode) -> &ModeQueues {
        &self.modes[mode.index()]
    }

    /// Appends `msg` to the node named by its metadata.
    ///
    /// Hands the message back if its peer is outside the table.
    pub fn enqueue(&self, msg: Message) -> Result<(), Message> {
        let meta = *msg.meta();
        if !meta.peer.is_valid() {
            return Err(msg);
        }
        let q = self.mode(meta.mode);
        let (ac, peer) = (meta.ac().index(), meta.peer.as_usize());
        let mut node = q.node(ac, peer).lock();
        node.push_back(msg);
        q.per_peer[peer].fetch_add(1, Ordering::AcqRel);
        q.per_ac[ac].fetch_add(1, Ordering::AcqRel);
        q.total.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Frames queued for `mode`.
    pub fn total(&self, mode: Mode) -> usize {
        self.mode(mode).total.load(Ordering::Acquire)
    }

    /// Frames queued for `mode`, per access category.
    pub fn backlog(&self, mode: Mode) -> [usize; AC_COUNT] {
        let q = self.mode(mode);
        core::array::from_fn(|ac| q.per_ac[ac].load(Ordering::Acquire))
    }

    /// Frames queued for `peer` under `mode`.
    pub fn peer_backlog(&self, mode: Mode, peer: PeerIndex) -> usize {
        self.mode(mode)
            .per_peer
            .get(peer.as_usize())
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Takes up to `limit` expired frames from the head of each queue.
    pub fn evict_expired(&self, mode: Mode, now: Duration, pressure_pct: usize, scale_pct: u32) -> Vec<Message> {
        let q = self.mode(mode);
        let mut expired = Vec::new();
        if q.total.load(Ordering::Acquire) == 0 {
            return expired;
        }
        for peer in 0..PEER_TABLE_SIZE {
            if q.per_peer[peer].load(Ordering::Acquire) == 0 {
                continue;
            }
            for ac in 0..AC_COUNT {
                let mut node = q.node(ac, peer).lock();
                if node.is_empty() {
                    continue;
                }
                let limit = eviction_limit(node.len(), pressure_pct, scale_pct);
                let mut n = 0;
                while n < limit {
                    match node.front() {
                        Some(m) if m.meta().deadline <= now => {}
                        _ => break,
                    }
                    if let Some(m) = node.pop_front() {
                        expired.push(m);
                        n += 1;
                    }
                }
                q.uncount(ac, peer, n);
            }
        }
        expired
    }

    /// Moves up to `available` frames of `mode` into the returned ready
    /// list, marking each as owned by the staging list.
    pub fn schedule(&self, mode: Mode, available: usize, weights: &[u32; 3], pool: &MsgPool) -> Vec<Message> {
        let q = self.mode(mode);
        let total = q.total.load(Ordering::Acquire);
        let mut ready = Vec::with_capacity(available.min(total));
        if available == 0 || total == 0 {
            return ready;
        }
        let mut stage = |msg: Message| {
            let from = msg.meta().qos_list();
            if let Err(e) = pool.move_to(msg.id(), from, MsgState::Queued, ListId::Staging) {
                error!("qos: {:?} not owned by {:?}: {:?}", msg.id(), from, e);
            }
            ready.push(msg);
        };

        if available >= total {
            for ac in 0..AC_COUNT {
                for peer in 0..PEER_TABLE_SIZE {
                    if q.per_peer[peer].load(Ordering::Acquire) > 0 {
                        q.pop(ac, peer, usize::MAX, &mut stage);
                    }
                }
            }
            return ready;
        }

        let queued = self.backlog(mode);
        let shares = apportion_acs(available, &queued, weights);
        trace!("qos: {:?} available {} queued {:?} shares {:?}", mode, available, queued, shares);
        let mut backlog = vec![0usize; PEER_TABLE_SIZE];
        for (ac, &share) in shares.iter().enumerate() {
            if share == 0 {
                continue;
            }
            for (peer, b) in backlog.iter_mut().enumerate() {
                *b = q.node(ac, peer).lock().len();
            }
            for (peer, n) in apportion_peers(share, &backlog).into_iter().enumerate() {
                if n > 0 {
                    q.pop(ac, peer, n, &mut stage);
                }
            }
        }
        ready
    }

    /// Earliest deadline at the head of any queue of `mode`.
    pub fn earliest_deadline(&self, mode: Mode) -> Option<Duration> {
        let q = self.mode(mode);
        if q.total.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut earliest: Option<Duration> = None;
        for peer in 0..PEER_TABLE_SIZE {
            if q.per_peer[peer].load(Ordering::Acquire) == 0 {
                continue;
            }
            for ac in 0..AC_COUNT {
                if let Some(m) = q.node(ac, peer).lock().front() {
                    let d = m.meta().deadline;
                    earliest = Some(earliest.map_or(d, |e| e.min(d)));
                }
            }
        }
        earliest
    }

    /// Takes every frame of `mode`.
    pub fn drain_mode(&self, mode: Mode) -> Vec<Message> {
        let q = self.mode(mode);
        let mut out = Vec::new();
        for ac in 0..AC_COUNT {
            for peer in 0..PEER_TABLE_SIZE {
                q.pop(ac, peer, usize::MAX, |m| out.push(m));
            }
        }
        out
    }

    /// Takes every frame addressed to `peer`, in any mode.
    pub fn drain_peer(&self, peer: PeerIndex) -> Vec<Message> {
        let mut out = Vec::new();
        if !peer.is_valid() {
            return out;
        }
        for q in &self.modes {
            for ac in 0..AC_COUNT {
                q.pop(ac, peer.as_usize(), usize::MAX, |m| out.push(m));
            }
        }
        out
    }
}

impl Default for QosQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use wlan::FrameBufPool;

    use super::*;
    use crate::msg::{MsgMeta, PoolKind};

    const WEIGHTS: [u32; 3] = [87, 90, 81];

    #[test]
    fn everything_fits() {
        assert_eq!(apportion_acs(100, &[1, 2, 3, 4], &WEIGHTS), [1, 2, 3, 4]);
    }

    #[test]
    fn higher_categories_take_weighted_shares() {
        let shares = apportion_acs(100, &[100, 100, 100, 100], &WEIGHTS);
        assert_eq!(shares.iter().sum::<usize>(), 100);
        assert_eq!(shares[0], 87);
        assert!(shares[0] > shares[1] && shares[1] >= shares[2]);
    }

    #[test]
    fn lone_category_takes_everything() {
        assert_eq!(apportion_acs(10, &[0, 0, 100, 0], &WEIGHTS), [0, 0, 10, 0]);
        assert_eq!(apportion_acs(10, &[0, 0, 0, 50], &WEIGHTS), [0, 0, 0, 10]);
    }

    #[test]
    fn small_backlog_returns_leftovers() {
        let shares = apportion_acs(10, &[2, 0, 100, 100], &WEIGHTS);
        assert_eq!(shares[0], 2);
        assert_eq!(shares.iter().sum::<usize>(), 10);
    }

    #[test]
    fn peers_get_proportional_shares_with_minimum_one() {
        assert_eq!(apportion_peers(10, &[90, 0, 9, 1]), vec![9, 0, 1, 0]);
        assert_eq!(apportion_peers(12, &[90, 0, 9, 1]), vec![10, 0, 1, 1]);
        assert_eq!(apportion_peers(20, &[10, 30]), vec![5, 15]);
    }

    #[test]
    fn share_smaller_than_peer_count() {
        let alloc = apportion_peers(2, &[5, 5, 5, 5]);
        assert_eq!(alloc, vec![1, 1, 0, 0]);
    }

    #[test]
    fn eviction_scales_with_pressure() {
        assert_eq!(eviction_limit(10, 0, 100), 1);
        assert_eq!(eviction_limit(10, 50, 100), 5);
        assert_eq!(eviction_limit(10, 90, 200), 10);
        assert_eq!(eviction_limit(0, 90, 100), 1);
    }

    fn queued_msg(frames: &alloc::sync::Arc<FrameBufPool>, pool: &MsgPool, peer: u8, tid: u8, tag: u8, deadline: u64) -> Message {
        let mut buf = frames.alloc_buf().unwrap();
        buf.fill(0, &[tag]).unwrap();
        let meta = MsgMeta {
            mode: Mode::Ap,
            peer: PeerIndex(peer),
            tid,
            deadline: Duration::from_millis(deadline),
            ..MsgMeta::unparsed(Duration::ZERO)
        };
        pool.alloc(buf, meta, meta.qos_list()).unwrap()
    }

    #[test]
    fn schedule_preserves_fifo_and_ownership() {
        let frames = FrameBufPool::new(64, 64).unwrap();
        let pool = MsgPool::new(PoolKind::Data, 64, 0, 0, None);
        let qos = QosQueues::new();
        for tag in 0..6 {
            qos.enqueue(queued_msg(&frames, &pool, 1, 0, tag, 100)).unwrap();
        }
        for tag in 10..13 {
            qos.enqueue(queued_msg(&frames, &pool, 2, 6, tag, 100)).unwrap();
        }
        assert_eq!(qos.total(Mode::Ap), 9);
        assert_eq!(qos.backlog(Mode::Ap), [3, 0, 6, 0]);

        let ready = qos.schedule(Mode::Ap, 5, &WEIGHTS, &pool);
        assert_eq!(ready.len(), 5);
        let tags: Vec<u8> = ready.iter().map(|m| m.buf().payload()[0]).collect();
        let be: Vec<u8> = tags.iter().copied().filter(|t| *t < 10).collect();
        let vo: Vec<u8> = tags.iter().copied().filter(|t| *t >= 10).collect();
        assert!(be.windows(2).all(|w| w[0] < w[1]));
        assert!(vo.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(vo.first(), Some(&10));
        assert!(ready.iter().all(|m| pool.owner_of(m.id()) == Some(ListId::Staging)));
        assert_eq!(qos.total(Mode::Ap), 4);
        assert_eq!(pool.count_owned(|l| matches!(l, ListId::Qos { .. })), 4);
    }

    #[test]
    fn only_expired_heads_are_evicted() {
        let frames = FrameBufPool::new(8, 64).unwrap();
        let pool = MsgPool::new(PoolKind::Data, 8, 0, 0, None);
        let qos = QosQueues::new();
        qos.enqueue(queued_msg(&frames, &pool, 3, 0, 0, 10)).unwrap();
        qos.enqueue(queued_msg(&frames, &pool, 3, 0, 1, 50)).unwrap();
        qos.enqueue(queued_msg(&frames, &pool, 3, 0, 2, 20)).unwrap();
        assert_eq!(qos.earliest_deadline(Mode::Ap), Some(Duration::from_millis(10)));
        let gone = qos.evict_expired(Mode::Ap, Duration::from_millis(30), 100, 100);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].buf().payload(), &[0]);
        assert_eq!(qos.total(Mode::Ap), 2);
    }

    #[test]
    fn drain_peer_empties_all_categories() {
        let frames = FrameBufPool::new(8, 64).unwrap();
        let pool = MsgPool::new(PoolKind::Data, 8, 0, 0, None);
        let qos = QosQueues::new();
        qos.enqueue(queued_msg(&frames, &pool, 3, 0, 0, 10)).unwrap();
        qos.enqueue(queued_msg(&frames, &pool, 3, 7, 1, 10)).unwrap();
        qos.enqueue(queued_msg(&frames, &pool, 4, 7, 2, 10)).unwrap();
        assert_eq!(qos.drain_peer(PeerIndex(3)).len(), 2);
        assert_eq!(qos.peer_backlog(Mode::Ap, PeerIndex(3)), 0);
        assert_eq!(qos.total(Mode::Ap), 1);
        assert_eq!(qos.drain_mode(Mode::Ap).len(), 1);
    }
}
