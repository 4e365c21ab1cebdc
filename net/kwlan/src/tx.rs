// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The TX dispatch cycle and transmit completions.
//!
//! A cycle first drives the command queue, then schedules every open mode
//! into the staging list under credit control, then pushes staged frames
//! to the transport. Frames a push could not hand over go back to the
//! front of the staging list for the next cycle.

use alloc::vec::Vec;
use core::{sync::atomic::Ordering, time::Duration};

use kdma::{BatchWrap, DmaDirection, DmaError, DmaToken, Wrapped, addr_list};
use wlan::{BufDesc, Channel, TransportCaps, WlanError, WlanResult};

use crate::{
    DropReason, FatalCondition, Mode,
    cmd::{CmdClass, CmdKind, CmdPoll},
    datapath::{CycleOutcome, InFlight, LinkState, WlanDatapath},
    hdr::{CMD_HDR_LEN, CommandRepr, DataRepr, HdrFlags, HostRepr},
    msg::{ListId, Message, MsgMeta, MsgState},
    stats::bump,
};

fn desc(w: &Wrapped) -> BufDesc {
    BufDesc {
        token: w.token,
        addr: w.addr,
        len: w.len,
        slot: None,
    }
}

/// Frames out of `want` that fit in `free` slots together with the
/// address-list buffers carrying them, `per_list` addresses each.
fn addr_list_fit(want: usize, free: usize, per_list: usize) -> usize {
    let per_list = per_list.max(1);
    let mut n = want.min(free);
    while n > 0 && n + n.div_ceil(per_list) > free {
        n -= 1;
    }
    n
}

impl WlanDatapath {
    /// Runs one TX dispatch cycle.
    pub fn tx_cycle(&self) -> CycleOutcome {
        let now = self.clock.now();
        let mut out = CycleOutcome::default();
        self.run_commands(now, &mut out);

        if self.link_state() == LinkState::Asserted {
            if self.flush_all_data(DropReason::LinkDown) > 0 {
                out.work = true;
            }
            return out;
        }

        for mode in self.open_modes().modes() {
            self.schedule_mode(mode, now, &mut out);
            out.wake_at(self.qos.earliest_deadline(mode));
        }
        self.push_staged(&mut out);
        out
    }

    fn run_commands(&self, now: Duration, out: &mut CycleOutcome) {
        loop {
            match self.cmds.poll(now) {
                CmdPoll::Idle => break,
                CmdPoll::Wait(deadline) => {
                    out.wake_at(Some(deadline));
                    break;
                }
                CmdPoll::Dropped { seq, kind } => {
                    warn!("tx: command {} ({:?}) dropped after retries", seq, kind);
                    bump(&self.stats.global.cmd_dropped, 1);
                    if let CmdKind::AddBa { peer, tid } = kind {
                        self.on_ba_result(peer, tid, false);
                    }
                    self.firmware.on_command_dropped(seq, kind);
                    out.work = true;
                }
                CmdPoll::Send { seq, mode, payload } => {
                    out.work = true;
                    if let Err(e) = self.push_command(seq, mode, &payload, now) {
                        warn!("tx: command {} push failed: {}", seq, e);
                        self.cmds.push_failed(seq, now);
                        break;
                    }
                }
            }
        }
    }

    fn push_command(&self, seq: u16, mode: Mode, payload: &[u8], now: Duration) -> WlanResult {
        let payload_len = u16::try_from(payload.len()).map_err(|_| WlanError::InvalidInput)?;
        let mut buf = self.frames.alloc_buf().ok_or(WlanError::NoMemory)?;
        buf.fill(CMD_HDR_LEN, payload)?;
        HostRepr::Command(CommandRepr {
            mode,
            seq,
            payload_len,
        })
        .emit(buf.header_mut())?;

        let meta = MsgMeta {
            mode,
            seq,
            ..MsgMeta::unparsed(now)
        };
        let msg = self
            .cmd_msgs
            .alloc(buf, meta, ListId::Command)
            .map_err(|_| WlanError::NoMemory)?;
        let _ = self
            .cmd_msgs
            .move_to(msg.id(), ListId::Command, MsgState::ToTransport, ListId::InFlight);
        let w = match self.slots.wrap(InFlight::Command(msg), DmaDirection::ToDevice) {
            Ok(w) => w,
            Err((item, err)) => {
                self.discard(item, DropReason::Fatal);
                if err.is_fatal() {
                    self.fatal_dma(err);
                }
                return Err(err.into());
            }
        };
        if let Err(e) = self.transport.push_batch(Channel::COMMAND, &[desc(&w)]) {
            if let Ok(item) = self.slots.unwrap(w.token) {
                self.discard(item, DropReason::PushFailure);
            }
            return Err(e);
        }
        trace!("tx: command {} sent ({} bytes)", seq, payload.len());
        bump(&self.stats.global.cmd_sent, 1);
        Ok(())
    }

    /// Expires, then moves frames of `mode` into the staging list for as
    /// many credits as can be obtained.
    fn schedule_mode(&self, mode: Mode, now: Duration, out: &mut CycleOutcome) {
        let queued = self.qos.total(mode);
        if queued == 0 {
            return;
        }
        let pressure = queued * 100 / self.data_msgs.capacity().max(1);
        let expired = self
            .qos
            .evict_expired(mode, now, pressure, self.config.eviction_scale_pct);
        if !expired.is_empty() {
            debug!("tx: {:?} evicted {} expired frames", mode, expired.len());
            out.work = true;
            for msg in expired {
                let owner = msg.meta().qos_list();
                self.drop_tx(msg, owner, DropReason::Expired);
            }
        }
        let queued = self.qos.total(mode);
        if queued == 0 {
            return;
        }

        let mut staging = self.staging.lock();
        let room = self.slots.available().saturating_sub(staging.len());
        let mut grant = self.flow.acquire(mode, queued, room);
        if grant.total() == 0 {
            trace!("tx: {:?} has {} queued and no credit", mode, queued);
            return;
        }
        let ready = self
            .qos
            .schedule(mode, grant.total(), &self.config.qos_weights, &self.data_msgs);
        let moved = ready.len();
        for mut msg in ready {
            msg.meta.color = grant.take().flatten();
            staging.push_back(msg);
        }
        drop(staging);

        for (color, left) in grant.into_remaining() {
            if let Some(color) = color {
                if left > 0 {
                    self.flow.refund(color, left);
                }
            }
        }
        if moved > 0 {
            trace!("tx: {:?} staged {} of {}", mode, moved, queued);
            bump(&self.stats.mode(mode).credits_used, moved as u64);
            out.work = true;
        }
    }

    /// Marks a frame taken back from the transport as staged again.
    fn unstage(&self, msg: &Message) {
        let _ = self
            .data_msgs
            .move_to(msg.id(), ListId::InFlight, MsgState::Queued, ListId::Staging);
    }

    /// Puts frames back at the front of the staging list, keeping their
    /// order.
    fn restage(&self, msgs: Vec<Message>) {
        if msgs.is_empty() {
            return;
        }
        let mut staging = self.staging.lock();
        for msg in msgs.into_iter().rev() {
            staging.push_front(msg);
        }
    }

    /// Takes back the data frames of wrapped-but-unpushed buffers.
    fn take_back(&self, groups: &[Vec<Wrapped>]) -> Vec<Message> {
        let mut msgs = Vec::new();
        for w in groups.iter().flatten() {
            match self.slots.unwrap(w.token) {
                Ok(InFlight::Data(msg)) => {
                    self.unstage(&msg);
                    msgs.push(msg);
                }
                Ok(other) => self.discard(other, DropReason::PushFailure),
                Err(e) => error!("tx: lost {:?}: {}", w.token, e),
            }
        }
        msgs
    }

    /// Builds one address-list buffer per group.
    fn build_addr_lists(&self, groups: &[Vec<Wrapped>]) -> Result<Vec<Wrapped>, DmaError> {
        let mut lists = Vec::with_capacity(groups.len());
        for group in groups {
            let built = self.build_addr_list(group);
            match built {
                Ok(w) => lists.push(w),
                Err(e) => {
                    for w in lists {
                        let _ = self.slots.unwrap(w.token);
                    }
                    return Err(e);
                }
            }
        }
        Ok(lists)
    }

    fn build_addr_list(&self, group: &[Wrapped]) -> Result<Wrapped, DmaError> {
        let mut buf = self.frames.alloc_buf().ok_or(DmaError::Exhausted)?;
        buf.set_layout(0, addr_list::encoded_len(group.len()))
            .map_err(|_| DmaError::BatchTooLarge)?;
        addr_list::encode(group.iter().map(|w| w.addr), buf.payload_mut())?;
        let entries = group.iter().map(|w| w.token).collect();
        self.slots
            .wrap(InFlight::AddrList { buf, entries }, DmaDirection::ToDevice)
            .map_err(|(_, e)| e)
    }

    /// Pushes up to one batch of staged frames to the transport.
    fn push_staged(&self, out: &mut CycleOutcome) {
        let addr_lists = self.caps.contains(TransportCaps::ADDR_LIST);
        let batch: Vec<Message> = {
            let mut staging = self.staging.lock();
            let want = staging.len().min(self.config.tx_batch_max);
            let n = if addr_lists {
                addr_list_fit(want, self.slots.available(), self.config.addr_list_batch)
            } else {
                want
            };
            staging.drain(..n).collect()
        };
        if batch.is_empty() {
            return;
        }

        let mut metas = Vec::with_capacity(batch.len());
        let mut ready = Vec::with_capacity(batch.len());
        for mut msg in batch {
            let meta = *msg.meta();
            if !self.is_open(meta.mode) {
                self.drop_tx(msg, ListId::Staging, DropReason::Flushed);
                continue;
            }
            let Ok(payload_len) = u16::try_from(msg.buf.payload_len()) else {
                warn!("tx: {} byte frame does not fit the header", msg.buf.payload_len());
                self.drop_tx(msg, ListId::Staging, DropReason::Malformed);
                continue;
            };
            let repr = HostRepr::Data(DataRepr {
                mode: meta.mode,
                flags: HdrFlags::empty(),
                peer: meta.peer,
                tid: meta.tid,
                color: meta.color,
                seq: 0,
                frag: 0,
                payload_len,
            });
            if repr.emit(msg.buf.header_mut()).is_err() {
                self.drop_tx(msg, ListId::Staging, DropReason::Malformed);
                continue;
            }
            if let Err(e) =
                self.data_msgs
                    .move_to(msg.id(), ListId::Staging, MsgState::ToTransport, ListId::InFlight)
            {
                error!("tx: staged {:?} not owned by staging: {:?}", msg.id(), e);
            }
            metas.push(meta);
            ready.push(InFlight::Data(msg));
        }
        if ready.is_empty() {
            out.work = true;
            return;
        }

        let group = if addr_lists {
            self.config.addr_list_batch
        } else {
            ready.len()
        };
        let BatchWrap {
            groups,
            failed,
            rest,
        } = self.slots.wrap_batch(ready, group, DmaDirection::ToDevice);

        let mut unsent = Vec::new();
        if let Some((item, err)) = failed {
            if err.is_fatal() {
                if let InFlight::Data(msg) = item {
                    self.unstage(&msg);
                    self.drop_tx(msg, ListId::Staging, DropReason::Fatal);
                }
                self.fatal_dma(err);
            } else {
                trace!("tx: slots exhausted, {} frames wait", rest.len() + 1);
                unsent.push(item);
            }
            unsent.extend(rest);
        }
        let unsent: Vec<Message> = unsent
            .into_iter()
            .filter_map(|item| match item {
                InFlight::Data(msg) => {
                    self.unstage(&msg);
                    Some(msg)
                }
                _ => None,
            })
            .collect();

        if groups.is_empty() {
            self.restage(unsent);
            return;
        }

        let descs: Vec<BufDesc> = if addr_lists {
            match self.build_addr_lists(&groups) {
                Ok(lists) => lists.iter().map(desc).collect(),
                Err(e) => {
                    warn!("tx: address list: {}", e);
                    let mut back = self.take_back(&groups);
                    back.extend(unsent);
                    self.restage(back);
                    if e.is_fatal() {
                        self.fatal_dma(e);
                    }
                    return;
                }
            }
        } else {
            groups.iter().flatten().map(desc).collect()
        };

        let pushed: usize = groups.iter().map(Vec::len).sum();
        match self.transport.push_batch(Channel::DATA, &descs) {
            Ok(()) => {
                self.push_failures.store(0, Ordering::Release);
                let now = self.clock.now();
                for meta in &metas[..pushed] {
                    bump(&self.stats.mode(meta.mode).tx_sent, 1);
                    self.note_ba(meta, now);
                }
                self.restage(unsent);
            }
            Err(e) => {
                if addr_lists {
                    for d in &descs {
                        let _ = self.slots.unwrap(d.token);
                    }
                }
                let mut back = self.take_back(&groups);
                back.extend(unsent);
                self.restage(back);
                bump(&self.stats.global.push_failures, 1);
                let failures = self.push_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!("tx: push of {} frames failed ({}): {}", pushed, failures, e);
                if failures >= self.config.push_failure_limit {
                    error!("tx: {} consecutive push failures, flushing", failures);
                    bump(&self.stats.global.push_escalations, 1);
                    self.push_failures.store(0, Ordering::Release);
                    self.flush_all_data(DropReason::PushFailure);
                }
            }
        }
        out.work = true;
    }

    /// Counts a sent frame towards its TID and requests a block-ack session
    /// once the peer qualifies.
    fn note_ba(&self, meta: &MsgMeta, now: Duration) {
        if meta.peer.is_group() {
            return;
        }
        let policy = self.ba_policy;
        let request = self
            .peers
            .with_entry(meta.peer, |e| {
                if e.note_tx(meta.tid, now, &policy) {
                    Some(e.addr)
                } else {
                    None
                }
            })
            .flatten();
        if let Some(addr) = request {
            debug!("tx: request block-ack {} tid {}", meta.peer, meta.tid);
            let payload = self.firmware.encode_addba(meta.peer, addr, meta.tid);
            self.cmds.submit(
                meta.mode,
                CmdClass::Normal,
                CmdKind::AddBa {
                    peer: meta.peer,
                    tid: meta.tid,
                },
                payload,
            );
        }
    }

    /// The transport finished with the buffers named by `tokens`.
    pub fn on_tx_complete(&self, channel: Channel, tokens: &[DmaToken]) {
        trace!("tx: {} completions on {:?}", tokens.len(), channel);
        for &token in tokens {
            self.complete_token(token);
        }
        self.tx_event.notify(1);
    }

    fn complete_token(&self, token: DmaToken) {
        let item = match self.slots.unwrap(token) {
            Ok(item) => item,
            Err(e) => {
                error!("tx: completion for {:?}: {}", token, e);
                self.fatal(FatalCondition::CorruptHandle(token));
                return;
            }
        };
        match item {
            InFlight::Data(msg) => {
                let mode = msg.meta().mode;
                let _ = self.data_msgs.move_to(
                    msg.id(),
                    ListId::InFlight,
                    MsgState::PendingFree,
                    ListId::InFlight,
                );
                if self.data_msgs.release(msg, ListId::InFlight).is_ok() {
                    bump(&self.stats.mode(mode).tx_completed, 1);
                }
            }
            InFlight::Command(msg) => {
                let _ = self.cmd_msgs.release(msg, ListId::InFlight);
            }
            InFlight::AddrList { entries, .. } => {
                for entry in entries {
                    self.complete_token(entry);
                }
            }
            InFlight::RxPosted(_) => {
                error!("tx: completion names posted rx buffer {:?}", token);
                self.rx_posted
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        Some(n.saturating_sub(1))
                    })
                    .ok();
                self.fatal(FatalCondition::CorruptHandle(token));
            }
        }
    }
}
