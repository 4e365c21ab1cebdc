// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Collaborators the datapath calls out to.

use alloc::vec::Vec;
use core::time::Duration;

use kdma::DmaToken;
use wlan::{FrameBuf, MacAddress};

use crate::{Mode, PeerIndex, cmd::CmdKind};

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Why a frame was dropped instead of transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Its lifetime ran out while queued.
    Expired,
    /// No peer matches the destination.
    NoPeer,
    /// Its mode or peer was flushed.
    Flushed,
    /// The link was asserted or reset.
    LinkDown,
    /// Consecutive transport push failures escalated to a flush.
    PushFailure,
    /// Address translation failed.
    Fatal,
    /// The frame layout was unusable.
    Malformed,
}

/// Unrecoverable conditions escalated to the firmware collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCondition {
    /// Address translation produced a zero address.
    ZeroAddress,
    /// A completion named a handle that is not in flight.
    CorruptHandle(DmaToken),
}

/// The network stack above the datapath.
pub trait NetStackIf: Send + Sync {
    /// Stop handing frames for `mode`.
    fn stop_queue(&self, mode: Mode);

    /// Frames for `mode` may be submitted again.
    fn wake_queue(&self, mode: Mode);

    /// A received frame, stripped of its host header.
    fn deliver(&self, mode: Mode, peer: PeerIndex, frame: FrameBuf);

    /// A submitted frame was dropped.
    fn on_tx_drop(&self, _mode: Mode, _reason: DropReason) {}
}

/// Command encoding and event handling owned by the firmware driver.
pub trait FirmwareIf: Send + Sync {
    /// Encodes a block-ack session setup request.
    fn encode_addba(&self, peer: PeerIndex, addr: MacAddress, tid: u8) -> Vec<u8>;

    /// Encodes a block-ack session teardown request.
    fn encode_delba(&self, peer: PeerIndex, addr: MacAddress, tid: u8) -> Vec<u8>;

    /// The firmware answered command `seq`.
    fn on_command_response(&self, seq: u16, payload: &[u8]);

    /// Command `seq` was given up on. Called once per command.
    fn on_command_dropped(&self, seq: u16, kind: CmdKind);

    /// An unsolicited firmware event.
    fn on_event(&self, mode: Mode, payload: &[u8]);

    /// The datapath hit an unrecoverable condition.
    fn on_fatal(&self, condition: FatalCondition);
}

#[cfg(feature = "std")]
pub use self::std_clock::MonotonicClock;

#[cfg(feature = "std")]
mod std_clock {
    use std::time::Instant;

    use super::*;

    /// [`Clock`] backed by [`Instant`].
    pub struct MonotonicClock(Instant);

    impl MonotonicClock {
        pub fn new() -> Self {
            Self(Instant::now())
        }
    }

    impl Default for MonotonicClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for MonotonicClock {
        fn now(&self) -> Duration {
            self.0.elapsed()
        }
    }
}
