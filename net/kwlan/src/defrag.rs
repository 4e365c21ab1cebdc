// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Receive fragment chains.

use alloc::vec::Vec;

use hashbrown::HashMap;

use crate::PeerIndex;

struct Chain<T> {
    seq: u16,
    next_frag: u8,
    parts: Vec<T>,
    /// Arrivals on this TID since the chain last grew.
    stale: u32,
}

/// What became of a fragment.
pub struct DefragOutcome<T> {
    /// All fragments of a finished MSDU, in fragment order.
    pub complete: Option<Vec<T>>,
    /// Fragments that were given up on.
    pub dropped: Vec<T>,
}

impl<T> DefragOutcome<T> {
    fn pending() -> Self {
        Self {
            complete: None,
            dropped: Vec::new(),
        }
    }
}

/// Open fragment chains, one per (peer, TID).
pub struct Defragmenter<T> {
    max_stale: u32,
    chains: HashMap<(PeerIndex, u8), Chain<T>>,
}

impl<T> Defragmenter<T> {
    /// A chain is dropped once `max_stale` other frames arrived on its TID
    /// without completing it.
    pub fn new(max_stale: u32) -> Self {
        Self {
            max_stale,
            chains: HashMap::new(),
        }
    }

    /// Records an unfragmented arrival on (`peer`, `tid`). Returns the parts
    /// of a chain that went stale.
    pub fn note_arrival(&mut self, peer: PeerIndex, tid: u8) -> Vec<T> {
        let key = (peer, tid);
        match self.chains.get_mut(&key) {
            Some(chain) => {
                chain.stale += 1;
                if chain.stale > self.max_stale {
                    self.drop_chain(key)
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }
    }

    /// Adds fragment `frag` of MSDU `seq`.
    pub fn push(&mut self, peer: PeerIndex, tid: u8, seq: u16, frag: u8, more: bool, item: T) -> DefragOutcome<T> {
        let key = (peer, tid);
        let mut out = DefragOutcome::pending();

        if frag == 0 {
            if self.chains.contains_key(&key) {
                debug!("defrag: {} tid {} restarts before completing", peer, tid);
                out.dropped = self.drop_chain(key);
            }
            if !more {
                out.complete = Some(alloc::vec![item]);
                return out;
            }
            self.chains.insert(
                key,
                Chain {
                    seq,
                    next_frag: 1,
                    parts: alloc::vec![item],
                    stale: 0,
                },
            );
            return out;
        }

        let Some(chain) = self.chains.get_mut(&key) else {
            trace!("defrag: orphan fragment {} of {} from {}", frag, seq, peer);
            out.dropped.push(item);
            return out;
        };
        if chain.seq != seq || chain.next_frag != frag {
            out.dropped.push(item);
            chain.stale += 1;
            if chain.stale > self.max_stale {
                out.dropped.extend(self.drop_chain(key));
            }
            return out;
        }
        chain.parts.push(item);
        chain.next_frag += 1;
        chain.stale = 0;
        if !more {
            out.complete = self.chains.remove(&key).map(|c| c.parts);
        }
        out
    }

    /// Drops every chain of `peer`.
    pub fn remove_peer(&mut self, peer: PeerIndex) -> Vec<T> {
        let mut dropped = Vec::new();
        self.chains.retain(|(p, _), c| {
            if *p == peer {
                dropped.append(&mut c.parts);
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Drops every chain.
    pub fn clear(&mut self) -> Vec<T> {
        self.chains.drain().flat_map(|(_, c)| c.parts).collect()
    }

    /// Number of open chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    fn drop_chain(&mut self, key: (PeerIndex, u8)) -> Vec<T> {
        self.chains.remove(&key).map(|c| c.parts).unwrap_or_default()
    }
}
