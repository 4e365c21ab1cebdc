// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Bounded pools of message records.
//!
//! Every frame or command moving through the datapath is carried by a
//! [`Message`] allocated from a [`MsgPool`]. The pool records which list
//! currently owns each record, so a release from the wrong list, or of a
//! record that is already free, is refused instead of corrupting the free
//! list.

use alloc::{sync::Arc, vec::Vec};
use core::time::Duration;

use kdma::DmaRegion;
use spin::Mutex;
use wlan::FrameBuf;

use crate::{AccessCategory, Mode, ModeSet, NetStackIf, PeerIndex, flow::ColorId};

/// Which pool a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Data,
    Command,
    Rx,
}

/// Generation-tagged reference to a pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgId {
    pool: PoolKind,
    index: u16,
    generation: u16,
}

/// Accounting state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgState {
    Free,
    Queued,
    ToTransport,
    PendingFree,
}

/// The list a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListId {
    /// A QoS queue node.
    Qos {
        mode: Mode,
        ac: AccessCategory,
        peer: PeerIndex,
    },
    /// The TX staging list.
    Staging,
    /// Lent to the transport.
    InFlight,
    /// A command being built or retried.
    Command,
    /// Received, waiting for the RX consumer.
    RxPending,
    /// Waiting for the remaining fragments.
    Defrag,
    /// Buffered by a reorder session.
    Reorder,
}

/// Attributes of the frame a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgMeta {
    pub mode: Mode,
    pub peer: PeerIndex,
    pub tid: u8,
    /// TX: enqueue deadline. RX: arrival time.
    pub deadline: Duration,
    /// Credit color charged when the frame was scheduled.
    pub color: Option<ColorId>,
    /// Sequence number (RX data, commands).
    pub seq: u16,
}

impl MsgMeta {
    /// Metadata for a frame whose header has not been parsed yet.
    pub const fn unparsed(now: Duration) -> Self {
        Self {
            mode: Mode::Station,
            peer: PeerIndex(0),
            tid: 0,
            deadline: now,
            color: None,
            seq: 0,
        }
    }

    pub const fn ac(&self) -> AccessCategory {
        AccessCategory::from_tid(self.tid)
    }

    /// The QoS queue node a TX frame with this metadata belongs to.
    pub const fn qos_list(&self) -> ListId {
        ListId::Qos {
            mode: self.mode,
            ac: self.ac(),
            peer: self.peer,
        }
    }
}

/// A frame or command with its pool record.
#[derive(Debug)]
pub struct Message {
    id: MsgId,
    pub(crate) buf: FrameBuf,
    pub(crate) meta: MsgMeta,
}

impl Message {
    pub fn id(&self) -> MsgId {
        self.id
    }

    pub fn meta(&self) -> &MsgMeta {
        &self.meta
    }

    pub fn buf(&self) -> &FrameBuf {
        &self.buf
    }

    /// Swaps the carried buffer, returning the old one.
    pub(crate) fn replace_buf(&mut self, buf: FrameBuf) -> FrameBuf {
        core::mem::replace(&mut self.buf, buf)
    }

    pub(crate) fn into_parts(self) -> (MsgId, FrameBuf, MsgMeta) {
        (self.id, self.buf, self.meta)
    }
}

impl DmaRegion for Message {
    fn dma_region(&self) -> (core::ptr::NonNull<u8>, usize) {
        (self.buf.base_ptr(), self.buf.frame().len())
    }
}

/// Why a pool operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The id does not name a record of this pool.
    InvalidId,
    /// The record is already free.
    AlreadyFree,
    /// The record belongs to another list.
    NotOwner,
}

/// Number of records in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Census {
    pub free: usize,
    pub queued: usize,
    pub to_transport: usize,
    pub pending_free: usize,
}

impl Census {
    pub const fn total(&self) -> usize {
        self.free + self.queued + self.to_transport + self.pending_free
    }

    pub const fn in_use(&self) -> usize {
        self.total() - self.free
    }
}

struct Record {
    generation: u16,
    state: MsgState,
    owner: Option<ListId>,
}

struct PoolInner {
    records: Vec<Record>,
    free: Vec<u16>,
    stopped: ModeSet,
}

/// A fixed-capacity pool of message records.
pub struct MsgPool {
    kind: PoolKind,
    inner: Mutex<PoolInner>,
    low_water: usize,
    start_water: usize,
    netstack: Option<Arc<dyn NetStackIf>>,
}

impl MsgPool {
    /// Creates a pool of `capacity` records.
    ///
    /// With a `netstack`, allocations that fail or leave fewer than
    /// `low_water` records free stop the allocating mode's queue, and
    /// releases that bring the free count back to `start_water` wake every
    /// stopped mode.
    pub fn new(
        kind: PoolKind,
        capacity: u16,
        low_water: usize,
        start_water: usize,
        netstack: Option<Arc<dyn NetStackIf>>,
    ) -> Self {
        let records = (0..capacity)
            .map(|_| Record {
                generation: 0,
                state: MsgState::Free,
                owner: None,
            })
            .collect();
        Self {
            kind,
            inner: Mutex::new(PoolInner {
                records,
                free: (0..capacity).rev().collect(),
                stopped: ModeSet::empty(),
            }),
            low_water,
            start_water: start_water.max(low_water),
            netstack,
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Attaches `buf` to a free record owned by `owner`.
    ///
    /// Hands the buffer back when the pool is empty.
    pub fn alloc(&self, buf: FrameBuf, meta: MsgMeta, owner: ListId) -> Result<Message, FrameBuf> {
        let mut inner = self.inner.lock();
        let Some(index) = inner.free.pop() else {
            let newly = !inner.stopped.has(meta.mode);
            inner.stopped |= ModeSet::of(meta.mode);
            drop(inner);
            if newly {
                self.signal_stop(meta.mode);
            }
            return Err(buf);
        };
        let rec = &mut inner.records[index as usize];
        rec.state = MsgState::Queued;
        rec.owner = Some(owner);
        let id = MsgId {
            pool: self.kind,
            index,
            generation: rec.generation,
        };
        let stop = self.netstack.is_some()
            && inner.free.len() < self.low_water
            && !inner.stopped.has(meta.mode);
        if stop {
            inner.stopped |= ModeSet::of(meta.mode);
        }
        drop(inner);
        if stop {
            self.signal_stop(meta.mode);
        }
        Ok(Message { id, buf, meta })
    }

    /// Moves a record from list `from` to list `to` in state `state`.
    pub fn move_to(&self, id: MsgId, from: ListId, state: MsgState, to: ListId) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        let rec = Self::lookup(self.kind, &mut inner, id)?;
        if rec.owner != Some(from) {
            return Err(PoolError::NotOwner);
        }
        rec.state = state;
        rec.owner = Some(to);
        Ok(())
    }

    /// Releases `msg`, which must belong to `owner`.
    ///
    /// Hands the message back when the record cannot be released, so the
    /// caller can still return it to the list that owns it.
    pub fn release(&self, msg: Message, owner: ListId) -> Result<(), (Message, PoolError)> {
        match self.release_id(msg.id, owner) {
            Ok(()) => Ok(()),
            Err(e) => Err((msg, e)),
        }
    }

    /// Releases the record `id`, which must belong to `owner`.
    pub fn release_id(&self, id: MsgId, owner: ListId) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        let rec = match Self::lookup(self.kind, &mut inner, id) {
            Ok(rec) => rec,
            Err(e) => {
                drop(inner);
                error!("{:?} pool: refusing release of {:?}: {:?}", self.kind, id, e);
                return Err(e);
            }
        };
        if rec.owner != Some(owner) {
            let actual = rec.owner;
            drop(inner);
            error!(
                "{:?} pool: {:?} released by {:?} but owned by {:?}",
                self.kind, id, owner, actual
            );
            return Err(PoolError::NotOwner);
        }
        rec.generation = rec.generation.wrapping_add(1);
        rec.state = MsgState::Free;
        rec.owner = None;
        inner.free.push(id.index);
        let wake = if !inner.stopped.is_empty() && inner.free.len() >= self.start_water {
            core::mem::take(&mut inner.stopped)
        } else {
            ModeSet::empty()
        };
        drop(inner);
        if let Some(ns) = &self.netstack {
            for mode in wake.modes() {
                debug!("{:?} pool: wake {:?}", self.kind, mode);
                ns.wake_queue(mode);
            }
        }
        Ok(())
    }

    /// Current owner of `id`.
    pub fn owner_of(&self, id: MsgId) -> Option<ListId> {
        let mut inner = self.inner.lock();
        Self::lookup(self.kind, &mut inner, id).ok()?.owner
    }

    /// Current state of `id`; stale ids read as free.
    pub fn state_of(&self, id: MsgId) -> MsgState {
        let mut inner = self.inner.lock();
        Self::lookup(self.kind, &mut inner, id).map_or(MsgState::Free, |r| r.state)
    }

    /// Counts records per state.
    pub fn census(&self) -> Census {
        let inner = self.inner.lock();
        let mut c = Census::default();
        for rec in &inner.records {
            match rec.state {
                MsgState::Free => c.free += 1,
                MsgState::Queued => c.queued += 1,
                MsgState::ToTransport => c.to_transport += 1,
                MsgState::PendingFree => c.pending_free += 1,
            }
        }
        c
    }

    /// Counts records owned by lists matching `pred`.
    pub fn count_owned(&self, pred: impl Fn(&ListId) -> bool) -> usize {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.owner.as_ref().is_some_and(&pred))
            .count()
    }

    fn lookup(kind: PoolKind, inner: &mut PoolInner, id: MsgId) -> Result<&mut Record, PoolError> {
        if id.pool != kind {
            return Err(PoolError::InvalidId);
        }
        let rec = inner
            .records
            .get_mut(id.index as usize)
            .ok_or(PoolError::InvalidId)?;
        if rec.generation != id.generation || rec.state == MsgState::Free {
            return Err(PoolError::AlreadyFree);
        }
        Ok(rec)
    }

    fn signal_stop(&self, mode: Mode) {
        if let Some(ns) = &self.netstack {
            debug!("{:?} pool: stop {:?}", self.kind, mode);
            ns.stop_queue(mode);
        }
    }
}
