// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The RX dispatch cycle and receive buffer posting.

use alloc::vec::Vec;
use core::{sync::atomic::Ordering, time::Duration};

use kdma::{DmaDirection, DmaToken};
use wlan::{BufDesc, Channel, FrameBuf, RxBuffer, TransportCaps};

use crate::{
    FatalCondition,
    datapath::{CycleOutcome, InFlight, LinkState, WlanDatapath},
    flow::CreditReport,
    hdr::{DATA_HDR_LEN, DataRepr, HdrFlags, HostRepr, credit_deltas},
    msg::{ListId, Message, MsgMeta, MsgState},
    stats::bump,
};

impl WlanDatapath {
    /// The transport received `bufs` on `channel`.
    ///
    /// Buffers are only queued here; parsing happens in
    /// [`rx_cycle`](Self::rx_cycle).
    pub fn on_rx_batch(&self, channel: Channel, bufs: Vec<RxBuffer>) {
        let now = self.clock.now();
        let mut arrived = Vec::with_capacity(bufs.len());
        for rx in bufs {
            let buf = match rx {
                RxBuffer::Inline(buf) => buf,
                RxBuffer::Posted { token, len } => match self.take_posted(token, len) {
                    Some(buf) => buf,
                    None => continue,
                },
            };
            match self
                .rx_msgs
                .alloc(buf, MsgMeta::unparsed(now), ListId::RxPending)
            {
                Ok(msg) => arrived.push(msg),
                Err(_) => {
                    warn!("rx: no message record, buffer dropped");
                    bump(&self.stats.global.rx_unparsed_drops, 1);
                }
            }
        }
        trace!("rx: {} buffers on {:?}", arrived.len(), channel);
        if arrived.is_empty() {
            return;
        }
        self.rx_pending.lock().extend(arrived);
        self.rx_event.notify(1);
    }

    fn take_posted(&self, token: DmaToken, len: usize) -> Option<FrameBuf> {
        let item = match self
            .slots
            .complete(token)
            .and_then(|()| self.slots.unwrap(token))
        {
            Ok(item) => item,
            Err(e) => {
                error!("rx: completion for {:?}: {}", token, e);
                self.fatal(FatalCondition::CorruptHandle(token));
                return None;
            }
        };
        self.rx_posted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .ok();
        let InFlight::RxPosted(mut buf) = item else {
            error!("rx: {:?} is not a posted rx buffer", token);
            self.fatal(FatalCondition::CorruptHandle(token));
            return None;
        };
        if buf.set_layout(0, len).is_err() {
            warn!("rx: device reported {} bytes in a {} byte buffer", len, buf.capacity());
            bump(&self.stats.global.rx_unparsed_drops, 1);
            return None;
        }
        Some(buf)
    }

    /// Runs one RX dispatch cycle.
    pub fn rx_cycle(&self) -> CycleOutcome {
        let now = self.clock.now();
        let mut out = CycleOutcome::default();
        let pending = core::mem::take(&mut *self.rx_pending.lock());
        out.work = !pending.is_empty();

        let mut deliver = Vec::new();
        for msg in pending {
            self.classify(msg, now, &mut deliver);
        }

        let mut timed_out = Vec::new();
        {
            let mut rx = self.rx_state.lock();
            rx.reorder.flush_expired(now, &mut timed_out);
            out.wake_at(rx.reorder.next_expiry());
        }
        if !timed_out.is_empty() {
            debug!("rx: {} frames released by reorder timeout", timed_out.len());
        }
        deliver.extend(timed_out.into_iter().map(|m| (m, ListId::Reorder)));

        for (msg, owner) in deliver {
            self.deliver_up(msg, owner);
        }
        self.refill_rx();
        out
    }

    fn classify(&self, msg: Message, now: Duration, deliver: &mut Vec<(Message, ListId)>) {
        let repr = match HostRepr::parse(msg.buf.frame()) {
            Ok(repr) => repr,
            Err(_) => {
                debug!("rx: unparsable {} byte buffer", msg.buf.frame().len());
                bump(&self.stats.global.rx_unparsed_drops, 1);
                let _ = self.rx_msgs.release(msg, ListId::RxPending);
                return;
            }
        };
        let start = repr.header_len();
        let payload = &msg.buf.frame()[start..start + repr.payload_len()];
        match repr {
            HostRepr::Data(d) => return self.rx_data(msg, d, now, deliver),
            HostRepr::Credit { reset, .. } => {
                let report = if reset {
                    CreditReport::Reset
                } else {
                    CreditReport::Deltas(credit_deltas(payload).collect())
                };
                self.on_credit_report(report);
            }
            HostRepr::Command(c) => match self.cmds.complete(c.seq) {
                Some(cmd) => {
                    trace!("rx: response to command {} after {} attempts", c.seq, cmd.attempts());
                    self.firmware.on_command_response(c.seq, payload);
                    self.tx_event.notify(1);
                }
                None => debug!("rx: response to unknown command {}", c.seq),
            },
            HostRepr::Event { mode, .. } => self.firmware.on_event(mode, payload),
        }
        let _ = self.rx_msgs.release(msg, ListId::RxPending);
    }

    fn rx_data(&self, mut msg: Message, d: DataRepr, now: Duration, deliver: &mut Vec<(Message, ListId)>) {
        let known = if d.peer.is_group() {
            d.peer.group_mode() == Some(d.mode)
        } else {
            self.peers.get(d.peer).is_some_and(|e| e.mode == Some(d.mode))
        };
        if !known {
            debug!("rx: {:?} frame from unknown {}", d.mode, d.peer);
            msg.meta.mode = d.mode;
            self.drop_rx(msg, ListId::RxPending);
            return;
        }
        msg.meta = MsgMeta {
            mode: d.mode,
            peer: d.peer,
            tid: d.tid,
            deadline: now,
            color: None,
            seq: d.seq,
        };
        if msg.buf.set_layout(DATA_HDR_LEN, d.payload_len as usize).is_err() {
            self.drop_rx(msg, ListId::RxPending);
            return;
        }

        let more = d.flags.contains(HdrFlags::MORE_FRAGS);
        let msg = if more || d.frag > 0 {
            match self.defragment(msg, &d) {
                Some(msg) => msg,
                None => return,
            }
        } else {
            let stale = self.rx_state.lock().defrag.note_arrival(d.peer, d.tid);
            for part in stale {
                self.drop_rx(part, ListId::Defrag);
            }
            msg
        };

        if !d.flags.contains(HdrFlags::REORDER) {
            deliver.push((msg, ListId::RxPending));
            return;
        }
        let _ = self
            .rx_msgs
            .move_to(msg.id(), ListId::RxPending, MsgState::Queued, ListId::Reorder);
        let mut released = Vec::new();
        let result = self
            .rx_state
            .lock()
            .reorder
            .push(d.peer, d.tid, d.seq, msg, now, &mut released);
        deliver.extend(released.into_iter().map(|m| (m, ListId::Reorder)));
        if let Err(msg) = result {
            trace!("rx: old or duplicate {} from {} tid {}", d.seq, d.peer, d.tid);
            self.drop_rx(msg, ListId::Reorder);
        }
    }

    /// Adds a fragment to its chain, returning the reassembled MSDU once the
    /// last fragment arrived.
    fn defragment(&self, msg: Message, d: &DataRepr) -> Option<Message> {
        let _ = self
            .rx_msgs
            .move_to(msg.id(), ListId::RxPending, MsgState::Queued, ListId::Defrag);
        let more = d.flags.contains(HdrFlags::MORE_FRAGS);
        let outcome = self
            .rx_state
            .lock()
            .defrag
            .push(d.peer, d.tid, d.seq, d.frag, more, msg);
        for part in outcome.dropped {
            self.drop_rx(part, ListId::Defrag);
        }
        self.reassemble(outcome.complete?)
    }

    fn reassemble(&self, parts: Vec<Message>) -> Option<Message> {
        let total: usize = parts.iter().map(|m| m.buf.payload_len()).sum();
        let buf = self.frames.alloc_buf().and_then(|mut buf| {
            buf.set_layout(DATA_HDR_LEN, total).ok()?;
            Some(buf)
        });
        let Some(mut buf) = buf else {
            warn!("rx: no room to reassemble {} bytes", total);
            for part in parts {
                self.drop_rx(part, ListId::Defrag);
            }
            return None;
        };

        let mut parts = parts.into_iter();
        let mut first = parts.next()?;
        buf.header_mut().copy_from_slice(first.buf.header());
        let mut off = 0;
        let mut append = |src: &[u8]| {
            buf.payload_mut()[off..off + src.len()].copy_from_slice(src);
            off += src.len();
        };
        append(first.buf.payload());
        for part in parts {
            append(part.buf.payload());
            let _ = self.rx_msgs.release(part, ListId::Defrag);
        }
        first.replace_buf(buf);
        let _ = self
            .rx_msgs
            .move_to(first.id(), ListId::Defrag, MsgState::Queued, ListId::RxPending);
        Some(first)
    }

    /// Hands a received frame to the network stack.
    pub(crate) fn deliver_up(&self, msg: Message, owner: ListId) {
        let (id, buf, meta) = msg.into_parts();
        let counters = self.stats.mode(meta.mode);
        if self.rx_msgs.release_id(id, owner).is_err() {
            bump(&counters.rx_dropped, 1);
            return;
        }
        bump(&counters.rx_delivered, 1);
        if owner == ListId::Reorder {
            bump(&counters.rx_reordered, 1);
        }
        self.netstack.deliver(meta.mode, meta.peer, buf);
    }

    /// Tops the posted receive buffers up towards the target. Returns how
    /// many were posted.
    pub(crate) fn refill_rx(&self) -> usize {
        if !self.caps.contains(TransportCaps::POSTED_RX) || self.link_state() != LinkState::Up {
            return 0;
        }
        let posted = self.rx_posted.load(Ordering::Acquire);
        let want = self
            .config
            .rx_post_target
            .saturating_sub(posted)
            .min(self.config.rx_refill_batch);
        if want == 0 {
            return 0;
        }
        let ring = match self.transport.alloc_buffer_descriptors(Channel::RX, want) {
            Ok(ring) => ring,
            Err(e) => {
                warn!("rx: no descriptors: {}", e);
                return 0;
            }
        };

        let mut descs = Vec::with_capacity(ring.len());
        for slot in ring {
            let Some(buf) = self.frames.alloc_buf() else {
                break;
            };
            match self.slots.wrap(InFlight::RxPosted(buf), DmaDirection::FromDevice) {
                Ok(w) => descs.push(BufDesc {
                    token: w.token,
                    addr: w.addr,
                    len: w.len.min(slot.capacity),
                    slot: Some(slot.index),
                }),
                Err((_, err)) => {
                    if err.is_fatal() {
                        self.fatal_dma(err);
                    }
                    break;
                }
            }
        }
        if descs.is_empty() {
            return 0;
        }

        let n = descs.len();
        self.rx_posted.fetch_add(n, Ordering::AcqRel);
        if let Err(e) = self.transport.push_batch(Channel::RX, &descs) {
            warn!("rx: posting {} buffers failed: {}", n, e);
            self.rx_posted.fetch_sub(n, Ordering::AcqRel);
            for d in &descs {
                let _ = self.slots.unwrap(d.token);
            }
            return 0;
        }
        trace!("rx: posted {} buffers", n);
        n
    }
}
