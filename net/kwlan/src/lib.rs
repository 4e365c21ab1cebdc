// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! WLAN TX/RX datapath engine.
//!
//! The engine sits between a network stack and a bus transport to the
//! radio firmware. Outbound 802.3 frames are queued per (mode, access
//! category, peer), expired and apportioned by a weighted scheduler,
//! admitted under firmware credit flow control and pushed to the transport
//! through a slot arena that hands out opaque tokens. Inbound buffers are
//! classified, defragmented, reordered per block-ack session and delivered
//! upwards.
//!
//! Everything lives in one driver-instance context, [`WlanDatapath`].
//! Producers call [`WlanDatapath::submit`]; the transport and firmware
//! drivers call its `on_*` entry points; one TX and one RX consumer run
//! [`WlanDatapath::tx_cycle`] and [`WlanDatapath::rx_cycle`]. With the
//! `std` feature, [`DispatchThreads`] runs both consumers on OS threads.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

mod ba;
mod cmd;
pub mod config;
pub mod consts;
mod datapath;
mod defrag;
mod flow;
pub mod hdr;
mod iface;
mod msg;
mod peer;
mod qos;
mod reorder;
mod rx;
mod stats;
#[cfg(feature = "std")]
mod thread;
mod tx;
mod types;

#[cfg(feature = "std")]
pub use self::{iface::MonotonicClock, thread::DispatchThreads};
pub use self::{
    ba::BaPolicy,
    cmd::{CmdClass, CmdKind},
    config::DatapathConfig,
    datapath::{
        Backpressure, BackpressureCause, Collaborators, CycleOutcome, LinkState, PoolCensus,
        WlanDatapath,
    },
    defrag::{DefragOutcome, Defragmenter},
    flow::{Binding, ColorId, CreditReport, FlowControl, FlowMode, Grant},
    iface::{Clock, DropReason, FatalCondition, FirmwareIf, NetStackIf},
    msg::{Census, ListId, Message, MsgId, MsgMeta, MsgPool, MsgState, PoolError, PoolKind},
    peer::{PeerCaps, PeerDesc, PeerEntry, PeerEvent, PeerTable},
    qos::{apportion_acs, apportion_peers, eviction_limit},
    reorder::{ReorderParams, ReorderSession, ReorderTable},
    stats::{GlobalStats, ModeStats},
    types::{AccessCategory, Mode, ModeSet, PeerIndex, priority_to_tid},
};
