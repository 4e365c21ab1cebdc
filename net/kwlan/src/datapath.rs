// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The driver-instance context tying the datapath together.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use core::{
    ptr::NonNull,
    sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering},
    time::Duration,
};

use event_listener::{Event, EventListener};
use kdma::{DmaError, DmaMapper, DmaRegion, DmaToken, SlotPool};
use spin::Mutex;
use strum::IntoEnumIterator;
use wlan::{FrameBuf, FrameBufPool, MacAddress, TransportCaps, TransportOps, WlanError, WlanResult};

use crate::{
    AccessCategory, Clock, DatapathConfig, DropReason, FatalCondition, FirmwareIf, Mode, ModeSet,
    NetStackIf, PeerIndex,
    ba::BaPolicy,
    cmd::{CmdClass, CmdKind, CommandQueue},
    consts::MAX_STATIONS,
    defrag::Defragmenter,
    flow::{Binding, CreditReport, FlowControl, FlowMode},
    hdr::TX_HEADROOM,
    msg::{Census, ListId, Message, MsgMeta, MsgPool, PoolKind},
    peer::{PeerEntry, PeerEvent, PeerTable},
    priority_to_tid,
    qos::QosQueues,
    reorder::{ReorderParams, ReorderTable},
    stats::{GlobalStats, ModeStats, Stats, bump},
};

/// The collaborators a datapath is built from.
pub struct Collaborators {
    pub transport: Arc<dyn TransportOps>,
    /// Required when the transport works with bus addresses.
    pub mapper: Option<Arc<dyn DmaMapper>>,
    pub netstack: Arc<dyn NetStackIf>,
    pub firmware: Arc<dyn FirmwareIf>,
    pub clock: Arc<dyn Clock>,
}

/// Why [`WlanDatapath::submit`] refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureCause {
    /// No message record is free.
    PoolExhausted,
    /// The mode is not open.
    ModeClosed,
    /// The link is asserted or resetting.
    LinkDown,
}

/// A refused frame, handed back to the producer.
#[derive(Debug)]
pub struct Backpressure {
    pub frame: FrameBuf,
    pub cause: BackpressureCause,
}

/// State of the firmware link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Up = 0,
    /// The firmware is gone; data is flushed until the next reset.
    Asserted = 1,
}

/// What a dispatch cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The cycle made progress; run it again before parking.
    pub work: bool,
    /// When the cycle wants to run again even without a wakeup.
    pub next_wake: Option<Duration>,
}

impl CycleOutcome {
    pub(crate) fn wake_at(&mut self, at: Option<Duration>) {
        if let Some(at) = at {
            self.next_wake = Some(self.next_wake.map_or(at, |t| t.min(at)));
        }
    }
}

/// Record counts of the three message pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCensus {
    pub data: Census,
    pub cmd: Census,
    pub rx: Census,
}

/// A buffer lent to the transport.
pub(crate) enum InFlight {
    Data(Message),
    Command(Message),
    /// An address list naming the slots of the data frames it carries.
    AddrList {
        buf: FrameBuf,
        entries: Vec<DmaToken>,
    },
    RxPosted(FrameBuf),
}

impl DmaRegion for InFlight {
    fn dma_region(&self) -> (NonNull<u8>, usize) {
        match self {
            InFlight::Data(msg) | InFlight::Command(msg) => msg.dma_region(),
            InFlight::AddrList { buf, .. } => (buf.base_ptr(), buf.frame().len()),
            InFlight::RxPosted(buf) => (buf.base_ptr(), buf.capacity()),
        }
    }
}

pub(crate) struct RxState {
    pub(crate) reorder: ReorderTable<Message>,
    pub(crate) defrag: Defragmenter<Message>,
}

/// A WLAN TX/RX datapath instance.
///
/// Producers call [`submit`](Self::submit); the transport and firmware
/// drivers call the `on_*` entry points. Two consumers, one for each
/// direction, repeatedly run [`tx_cycle`](Self::tx_cycle) and
/// [`rx_cycle`](Self::rx_cycle), parking on the listeners between cycles
/// that did no work.
pub struct WlanDatapath {
    pub(crate) config: DatapathConfig,
    pub(crate) caps: TransportCaps,
    pub(crate) transport: Arc<dyn TransportOps>,
    pub(crate) netstack: Arc<dyn NetStackIf>,
    pub(crate) firmware: Arc<dyn FirmwareIf>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ba_policy: BaPolicy,

    pub(crate) frames: Arc<FrameBufPool>,
    pub(crate) data_msgs: MsgPool,
    pub(crate) cmd_msgs: MsgPool,
    pub(crate) rx_msgs: MsgPool,
    pub(crate) slots: SlotPool<InFlight>,

    pub(crate) peers: PeerTable,
    pub(crate) flow: FlowControl,
    pub(crate) qos: QosQueues,
    pub(crate) cmds: CommandQueue,
    pub(crate) staging: Mutex<VecDeque<Message>>,
    pub(crate) push_failures: AtomicU32,

    pub(crate) rx_pending: Mutex<VecDeque<Message>>,
    pub(crate) rx_state: Mutex<RxState>,
    pub(crate) rx_posted: AtomicUsize,

    link: AtomicU8,
    open: AtomicU8,
    pub(crate) tx_event: Event,
    pub(crate) rx_event: Event,
    pub(crate) stats: Stats,
}

impl WlanDatapath {
    /// Builds a datapath over the given collaborators.
    pub fn try_new(config: DatapathConfig, c: Collaborators) -> WlanResult<Self> {
        config.validate()?;
        let caps = c.transport.caps();
        let slots = if caps.contains(TransportCaps::BUS_ADDRESS) {
            let Some(mapper) = c.mapper.clone() else {
                warn!("datapath: {} needs an address mapper", c.transport.name());
                return Err(WlanError::InvalidInput);
            };
            SlotPool::with_mapper("wlan-slots", config.slots, mapper)
        } else {
            SlotPool::with_handles("wlan-slots", config.slots)
        };
        if caps.contains(TransportCaps::ADDR_LIST) && config.slots < 2 {
            warn!("datapath: address lists need a slot besides the frames they carry");
            return Err(WlanError::InvalidInput);
        }
        if config.flow_mode == FlowMode::Credit && !caps.contains(TransportCaps::CREDIT_FLOW) {
            warn!(
                "datapath: credit flow on {}, which reports no credits",
                c.transport.name()
            );
        }
        let frames = FrameBufPool::new(config.frame_bufs, config.frame_buf_len)?;
        info!(
            "datapath: {} ({:?}), {} slots, {:?} flow",
            c.transport.name(),
            caps,
            config.slots,
            config.flow_mode
        );

        Ok(Self {
            caps,
            ba_policy: BaPolicy {
                threshold: config.ba_threshold,
                cooldown: config.ba_cooldown,
            },
            frames,
            data_msgs: MsgPool::new(
                PoolKind::Data,
                config.data_msgs,
                config.low_watermark,
                config.start_watermark,
                Some(c.netstack.clone()),
            ),
            cmd_msgs: MsgPool::new(PoolKind::Command, config.cmd_msgs, 0, 0, None),
            rx_msgs: MsgPool::new(PoolKind::Rx, config.rx_msgs, 0, 0, None),
            slots,
            peers: PeerTable::new(),
            flow: FlowControl::new(config.flow_mode, config.colors),
            qos: QosQueues::new(),
            cmds: CommandQueue::new(
                config.cmd_timeout,
                config.cmd_long_timeout,
                config.cmd_retry_limit,
            ),
            staging: Mutex::new(VecDeque::new()),
            push_failures: AtomicU32::new(0),
            rx_pending: Mutex::new(VecDeque::new()),
            rx_state: Mutex::new(RxState {
                reorder: ReorderTable::new(ReorderParams {
                    window: config.reorder_window,
                    max_buffered: config.reorder_max_buffered,
                    timeout: config.reorder_timeout,
                }),
                defrag: Defragmenter::new(config.defrag_max_stale),
            }),
            rx_posted: AtomicUsize::new(0),
            link: AtomicU8::new(LinkState::Up as u8),
            open: AtomicU8::new(0),
            tx_event: Event::new(),
            rx_event: Event::new(),
            stats: Stats::new(),
            transport: c.transport,
            netstack: c.netstack,
            firmware: c.firmware,
            clock: c.clock,
            config,
        })
    }

    pub fn config(&self) -> &DatapathConfig {
        &self.config
    }

    /// Current time of the datapath clock.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Posts the initial receive buffers.
    pub fn start(&self) {
        let posted = self.refill_rx();
        debug!("datapath: started, {} rx buffers posted", posted);
    }

    /// Allocates a buffer with room for a `len`-byte frame behind the host
    /// header.
    pub fn alloc_tx_buf(&self, len: usize) -> Option<FrameBuf> {
        let mut buf = self.frames.alloc_buf()?;
        buf.set_layout(TX_HEADROOM, len).ok()?;
        Some(buf)
    }

    /// Queues an 802.3 frame for transmission.
    ///
    /// The frame's payload starts with the destination address; its header
    /// room must be exactly [`TX_HEADROOM`]. Frames nobody can receive are
    /// dropped and reported through [`NetStackIf::on_tx_drop`], which still
    /// counts as accepted.
    pub fn submit(&self, frame: FrameBuf, mode: Mode, priority: u8) -> Result<(), Backpressure> {
        if self.link_state() != LinkState::Up {
            return Err(Backpressure {
                frame,
                cause: BackpressureCause::LinkDown,
            });
        }
        if !self.is_open(mode) {
            return Err(Backpressure {
                frame,
                cause: BackpressureCause::ModeClosed,
            });
        }
        let counters = self.stats.mode(mode);
        if frame.hdr_len() != TX_HEADROOM {
            warn!("datapath: {:?} frame with {} bytes of header room", mode, frame.hdr_len());
            bump(&counters.tx_dropped, 1);
            self.netstack.on_tx_drop(mode, DropReason::Malformed);
            return Ok(());
        }
        let Some(peer) = self.route(mode, frame.payload()) else {
            debug!("datapath: {:?} frame for unknown destination", mode);
            bump(&counters.tx_dropped, 1);
            self.netstack.on_tx_drop(mode, DropReason::NoPeer);
            return Ok(());
        };

        let tid = priority_to_tid(priority);
        let meta = MsgMeta {
            mode,
            peer,
            tid,
            deadline: self.clock.now() + self.config.lifetime(AccessCategory::from_tid(tid)),
            color: None,
            seq: 0,
        };
        let msg = self
            .data_msgs
            .alloc(frame, meta, meta.qos_list())
            .map_err(|frame| Backpressure {
                frame,
                cause: BackpressureCause::PoolExhausted,
            })?;
        if let Err(msg) = self.qos.enqueue(msg) {
            warn!("datapath: {} outside the peer table", peer);
            self.drop_tx(msg, meta.qos_list(), DropReason::NoPeer);
            return Ok(());
        }
        bump(&counters.tx_queued, 1);
        self.tx_event.notify(1);
        Ok(())
    }

    fn route(&self, mode: Mode, payload: &[u8]) -> Option<PeerIndex> {
        let dst = MacAddress::from_bytes(payload)?;
        if dst.is_multicast() {
            return Some(mode.group_peer());
        }
        self.peers.lookup(mode, &dst).or_else(|| {
            if mode.is_station_side() {
                self.peers.sole_peer(mode)
            } else {
                None
            }
        })
    }

    /// The set of open modes.
    pub fn open_modes(&self) -> ModeSet {
        ModeSet::from_bits_retain(self.open.load(Ordering::Acquire))
    }

    pub fn is_open(&self, mode: Mode) -> bool {
        self.open_modes().has(mode)
    }

    /// Starts accepting frames for `mode`.
    pub fn open_mode(&self, mode: Mode) {
        info!("datapath: open {:?}", mode);
        self.flow.open_mode(mode);
        self.open.fetch_or(ModeSet::of(mode).bits(), Ordering::AcqRel);
    }

    /// Stops `mode`: flushes its frames and releases its credit bucket.
    pub fn close_mode(&self, mode: Mode) {
        info!("datapath: close {:?}", mode);
        self.open.fetch_and(!ModeSet::of(mode).bits(), Ordering::AcqRel);
        let flushed = self.flush_mode(mode);
        if flushed > 0 {
            debug!("datapath: {:?} closed with {} frames flushed", mode, flushed);
        }
        self.flow.close_mode(mode);
        self.tx_event.notify(1);
    }

    /// Drops every frame queued or staged for `mode`.
    pub fn flush_mode(&self, mode: Mode) -> usize {
        let mut flushed = 0;
        for msg in self.qos.drain_mode(mode) {
            let owner = msg.meta().qos_list();
            self.drop_tx(msg, owner, DropReason::Flushed);
            flushed += 1;
        }
        for msg in self.take_staged(|m| m.meta().mode == mode) {
            self.drop_tx(msg, ListId::Staging, DropReason::Flushed);
            flushed += 1;
        }
        flushed
    }

    /// Removes the staged frames matching `pred`, keeping the others in
    /// order.
    fn take_staged(&self, pred: impl Fn(&Message) -> bool) -> VecDeque<Message> {
        let mut staging = self.staging.lock();
        let (taken, kept): (VecDeque<_>, VecDeque<_>) = staging.drain(..).partition(|m| pred(m));
        *staging = kept;
        taken
    }

    /// Drops every queued and staged frame of every mode.
    pub(crate) fn flush_all_data(&self, reason: DropReason) -> usize {
        let mut flushed = 0;
        for mode in Mode::iter() {
            for msg in self.qos.drain_mode(mode) {
                let owner = msg.meta().qos_list();
                self.drop_tx(msg, owner, reason);
                flushed += 1;
            }
        }
        let staged = core::mem::take(&mut *self.staging.lock());
        for msg in staged {
            self.drop_tx(msg, ListId::Staging, reason);
            flushed += 1;
        }
        if flushed > 0 {
            warn!("datapath: flushed {} frames ({:?})", flushed, reason);
        }
        flushed
    }

    /// Releases a TX frame that will not be sent. Staged frames give their
    /// credit back.
    pub(crate) fn drop_tx(&self, msg: Message, owner: ListId, reason: DropReason) {
        let meta = *msg.meta();
        if owner == ListId::Staging {
            if let Some(color) = meta.color {
                self.flow.refund(color, 1);
            }
        }
        let counters = self.stats.mode(meta.mode);
        match reason {
            DropReason::Expired => bump(&counters.tx_expired, 1),
            _ => bump(&counters.tx_dropped, 1),
        }
        let _ = self.data_msgs.release(msg, owner);
        self.netstack.on_tx_drop(meta.mode, reason);
    }

    /// Releases an RX frame that will not be delivered.
    pub(crate) fn drop_rx(&self, msg: Message, owner: ListId) {
        bump(&self.stats.mode(msg.meta().mode).rx_dropped, 1);
        let _ = self.rx_msgs.release(msg, owner);
    }

    /// Returns a buffer taken back from the transport that will not be
    /// used.
    pub(crate) fn discard(&self, item: InFlight, reason: DropReason) {
        match item {
            InFlight::Data(msg) => self.drop_tx(msg, ListId::InFlight, reason),
            InFlight::Command(msg) => {
                let _ = self.cmd_msgs.release(msg, ListId::InFlight);
            }
            InFlight::AddrList { .. } | InFlight::RxPosted(_) => {}
        }
    }

    /// Escalates an unrecoverable condition.
    pub(crate) fn fatal(&self, condition: FatalCondition) {
        error!("datapath: fatal condition {:?}", condition);
        bump(&self.stats.global.fatal, 1);
        self.firmware.on_fatal(condition);
    }

    pub(crate) fn fatal_dma(&self, err: DmaError) {
        match err {
            DmaError::ZeroAddress => self.fatal(FatalCondition::ZeroAddress),
            _ => error!("datapath: dma failure: {}", err),
        }
    }

    /// Applies a firmware credit report and wakes the TX consumer.
    pub fn on_credit_report(&self, report: CreditReport) {
        trace!("datapath: credit report {:?}", report);
        self.flow.apply(&report);
        self.tx_event.notify(1);
    }

    /// Applies a firmware peer lifecycle event.
    pub fn on_peer_event(&self, event: PeerEvent) -> WlanResult {
        match event {
            PeerEvent::Add(desc) => {
                info!("datapath: add {} {} on {:?}", desc.index, desc.addr, desc.mode);
                if desc.index.as_usize() < MAX_STATIONS {
                    if let Some(old) = self.peers.get(desc.index) {
                        warn!("datapath: {} replaces {} at {}", desc.addr, old.addr, desc.index);
                        self.purge_peer(desc.index);
                    }
                }
                self.peers.add(&desc)
            }
            PeerEvent::Update(desc) => self.peers.update(&desc),
            PeerEvent::Delete(index) => self.delete_peer(index),
        }
    }

    /// Tears down the sessions and frames of `index`, then forgets it.
    fn delete_peer(&self, index: PeerIndex) -> WlanResult {
        if self.peers.get(index).is_none() {
            return Err(WlanError::NotFound);
        }
        let flushed = self.purge_peer(index);
        let entry = self.peers.remove(index)?;
        info!(
            "datapath: delete {} {} ({} frames flushed, ba {:#04x})",
            index, entry.addr, flushed, entry.ba_tx
        );
        Ok(())
    }

    /// Drops the reorder and fragment state of `index` and flushes its
    /// queued and staged frames. Returns the number of frames flushed.
    fn purge_peer(&self, index: PeerIndex) -> usize {
        let (reordered, fragments) = {
            let mut rx = self.rx_state.lock();
            (rx.reorder.remove_peer(index), rx.defrag.remove_peer(index))
        };
        for msg in reordered {
            self.drop_rx(msg, ListId::Reorder);
        }
        for msg in fragments {
            self.drop_rx(msg, ListId::Defrag);
        }
        let mut flushed = 0;
        for msg in self.qos.drain_peer(index) {
            let owner = msg.meta().qos_list();
            self.drop_tx(msg, owner, DropReason::Flushed);
            flushed += 1;
        }
        for msg in self.take_staged(|m| m.meta().peer == index) {
            self.drop_tx(msg, ListId::Staging, DropReason::Flushed);
            flushed += 1;
        }
        flushed
    }

    /// The firmware answered a block-ack session request.
    pub fn on_ba_result(&self, peer: PeerIndex, tid: u8, established: bool) {
        let now = self.clock.now();
        if self
            .peers
            .with_entry(peer, |e| e.on_ba_result(tid, established, now))
            .is_none()
        {
            debug!("datapath: block-ack result for unknown {}", peer);
        }
    }

    /// The block-ack agreement of (`peer`, `tid`) is gone. Frames held for
    /// reordering are delivered in order.
    pub fn on_ba_teardown(&self, peer: PeerIndex, tid: u8) {
        let mut out = Vec::new();
        let had = self.rx_state.lock().reorder.teardown(peer, tid, &mut out);
        self.peers.with_entry(peer, |e| e.clear_ba(tid));
        debug!("datapath: block-ack teardown {} tid {} (session {})", peer, tid, had);
        for msg in out {
            self.deliver_up(msg, ListId::Reorder);
        }
        self.rx_event.notify(1);
    }

    /// Asks the firmware to end the TX block-ack session of (`peer`, `tid`).
    pub fn request_ba_teardown(&self, peer: PeerIndex, tid: u8) -> WlanResult<u16> {
        let entry = self.peers.get(peer).ok_or(WlanError::NotFound)?;
        let mode = entry.mode.ok_or(WlanError::NotFound)?;
        if !self.peers.with_entry(peer, |e| e.clear_ba(tid)).unwrap_or(false) {
            return Err(WlanError::NotFound);
        }
        let payload = self.firmware.encode_delba(peer, entry.addr, tid);
        let seq = self
            .cmds
            .submit(mode, CmdClass::Normal, CmdKind::DelBa { peer, tid }, payload);
        self.tx_event.notify(1);
        Ok(seq)
    }

    /// Queues an opaque firmware command, returning its sequence number.
    pub fn send_command(&self, mode: Mode, class: CmdClass, payload: Vec<u8>) -> u16 {
        let seq = self.cmds.submit(mode, class, CmdKind::Firmware, payload);
        self.tx_event.notify(1);
        seq
    }

    pub fn link_state(&self) -> LinkState {
        match self.link.load(Ordering::Acquire) {
            0 => LinkState::Up,
            _ => LinkState::Asserted,
        }
    }

    /// The firmware asserted: data is flushed and not scheduled until the
    /// next [`on_link_reset`](Self::on_link_reset).
    pub fn on_link_assert(&self) {
        error!("datapath: link asserted");
        self.link.store(LinkState::Asserted as u8, Ordering::Release);
        self.tx_event.notify(1);
        self.rx_event.notify(1);
    }

    /// The chip was reset: drops everything, forgets peers and sessions,
    /// zeroes the credits and resumes.
    pub fn on_link_reset(&self) {
        warn!("datapath: link reset");
        self.link.store(LinkState::Asserted as u8, Ordering::Release);
        self.flush_all_data(DropReason::LinkDown);

        for item in self.slots.drain() {
            self.discard(item, DropReason::LinkDown);
        }
        self.rx_posted.store(0, Ordering::Release);
        for cmd in self.cmds.abort_all() {
            warn!("datapath: command {} aborted by reset", cmd.seq);
            bump(&self.stats.global.cmd_dropped, 1);
            self.firmware.on_command_dropped(cmd.seq, cmd.kind);
        }

        let pending = core::mem::take(&mut *self.rx_pending.lock());
        for msg in pending {
            self.drop_rx(msg, ListId::RxPending);
        }
        let (reordered, fragments) = {
            let mut rx = self.rx_state.lock();
            (rx.reorder.clear(), rx.defrag.clear())
        };
        for msg in reordered {
            self.drop_rx(msg, ListId::Reorder);
        }
        for msg in fragments {
            self.drop_rx(msg, ListId::Defrag);
        }

        self.flow.reset();
        self.peers.clear();
        self.push_failures.store(0, Ordering::Release);
        bump(&self.stats.global.link_resets, 1);
        self.link.store(LinkState::Up as u8, Ordering::Release);
        self.tx_event.notify(1);
        self.rx_event.notify(1);
    }

    /// A listener woken when the TX consumer has work.
    pub fn tx_listener(&self) -> EventListener {
        self.tx_event.listen()
    }

    /// A listener woken when the RX consumer has work.
    pub fn rx_listener(&self) -> EventListener {
        self.rx_event.listen()
    }

    /// Wakes both consumers.
    pub fn kick(&self) {
        self.tx_event.notify(usize::MAX);
        self.rx_event.notify(usize::MAX);
    }

    pub fn stats(&self, mode: Mode) -> ModeStats {
        self.stats.mode_snapshot(mode)
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.stats.global_snapshot()
    }

    /// Frames waiting in the QoS queues of `mode`.
    pub fn queued(&self, mode: Mode) -> usize {
        self.qos.total(mode)
    }

    /// Frames waiting in the QoS queues for `peer`.
    pub fn queued_for(&self, mode: Mode, peer: PeerIndex) -> usize {
        self.qos.peer_backlog(mode, peer)
    }

    /// Frames scheduled but not yet handed to the transport.
    pub fn staged(&self) -> usize {
        self.staging.lock().len()
    }

    /// Buffers lent to the transport.
    pub fn in_flight(&self) -> usize {
        self.slots.capacity() - self.slots.available()
    }

    /// Receive buffers currently posted.
    pub fn rx_posted(&self) -> usize {
        self.rx_posted.load(Ordering::Acquire)
    }

    /// Binding and credits of each color bucket.
    pub fn credits(&self) -> Vec<(Binding, u32)> {
        self.flow.snapshot()
    }

    pub fn peer(&self, index: PeerIndex) -> Option<PeerEntry> {
        self.peers.get(index)
    }

    /// Record counts of the message pools.
    pub fn census(&self) -> PoolCensus {
        PoolCensus {
            data: self.data_msgs.census(),
            cmd: self.cmd_msgs.census(),
            rx: self.rx_msgs.census(),
        }
    }

    /// Open reorder sessions.
    pub fn reorder_sessions(&self) -> usize {
        self.rx_state.lock().reorder.len()
    }

    /// Commands queued or awaiting a response.
    pub fn pending_commands(&self) -> usize {
        self.cmds.pending()
    }
}
