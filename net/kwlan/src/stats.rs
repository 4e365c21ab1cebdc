// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Datapath counters.

use core::sync::atomic::{AtomicU64, Ordering};

use strum::EnumCount;

use crate::Mode;

/// A snapshot of one mode's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeStats {
    pub tx_queued: u64,
    pub tx_sent: u64,
    pub tx_completed: u64,
    pub tx_dropped: u64,
    pub tx_expired: u64,
    pub rx_delivered: u64,
    pub rx_dropped: u64,
    pub rx_reordered: u64,
    pub credits_used: u64,
}

/// A snapshot of the counters that are not per mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalStats {
    pub push_failures: u64,
    pub push_escalations: u64,
    pub cmd_sent: u64,
    pub cmd_dropped: u64,
    pub fatal: u64,
    pub rx_unparsed_drops: u64,
    pub link_resets: u64,
}

macro_rules! counters {
    ($name:ident, $snap:ident { $($field:ident),* $(,)? }) => {
        #[derive(Default)]
        pub(crate) struct $name {
            $(pub(crate) $field: AtomicU64,)*
        }

        impl $name {
            fn snapshot(&self) -> $snap {
                $snap {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters!(ModeCounters, ModeStats {
    tx_queued,
    tx_sent,
    tx_completed,
    tx_dropped,
    tx_expired,
    rx_delivered,
    rx_dropped,
    rx_reordered,
    credits_used,
});

counters!(GlobalCounters, GlobalStats {
    push_failures,
    push_escalations,
    cmd_sent,
    cmd_dropped,
    fatal,
    rx_unparsed_drops,
    link_resets,
});

pub(crate) struct Stats {
    modes: [ModeCounters; Mode::COUNT],
    pub(crate) global: GlobalCounters,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self {
            modes: core::array::from_fn(|_| ModeCounters::default()),
            global: GlobalCounters::default(),
        }
    }

    pub(crate) fn mode(&self, mode: Mode) -> &ModeCounters {
        &self.modes[mode.index()]
    }

    pub(crate) fn mode_snapshot(&self, mode: Mode) -> ModeStats {
        self.mode(mode).snapshot()
    }

    pub(crate) fn global_snapshot(&self) -> GlobalStats {
        self.global.snapshot()
    }
}

/// Adds `n` to a counter.
pub(crate) fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}
