// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Tunables of a datapath instance.

use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use wlan::{WlanError, WlanResult};

use crate::{
    consts::{AC_COUNT, MAX_COLORS, SEQ_HALF},
    flow::FlowMode,
};

/// Configuration of a [`WlanDatapath`](crate::WlanDatapath).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DatapathConfig {
    /// Data message records.
    pub data_msgs: u16,
    /// Command message records.
    pub cmd_msgs: u16,
    /// Receive message records.
    pub rx_msgs: u16,
    /// Transport slots shared by TX frames, commands, address lists and
    /// posted receive buffers.
    pub slots: usize,
    /// Frame buffers in the shared pool.
    pub frame_bufs: usize,
    /// Length of each frame buffer.
    pub frame_buf_len: usize,
    /// Free data records below which the allocating mode is stopped.
    pub low_watermark: usize,
    /// Free data records at which stopped modes are woken.
    pub start_watermark: usize,
    /// Queue lifetime per access category, highest priority first.
    pub tx_lifetime: [Duration; AC_COUNT],
    /// Weighted share, in percent, of the remaining credits taken by VO,
    /// VI and BE when lower categories have backlog.
    pub qos_weights: [u32; 3],
    /// Scales how aggressively expired frames are evicted under pressure.
    pub eviction_scale_pct: u32,
    /// Credit colors reported by the firmware.
    pub colors: usize,
    pub flow_mode: FlowMode,
    /// Command response timeout, normal class.
    pub cmd_timeout: Duration,
    /// Command response timeout, long class.
    pub cmd_long_timeout: Duration,
    /// Retransmissions after the first attempt of a command.
    pub cmd_retry_limit: u32,
    /// Consecutive push failures tolerated before everything staged is
    /// flushed.
    pub push_failure_limit: u32,
    /// Frames pushed per transport batch.
    pub tx_batch_max: usize,
    /// Addresses per address-list buffer.
    pub addr_list_batch: usize,
    /// Frames on a TID before a block-ack session is requested.
    pub ba_threshold: u32,
    /// Wait after a failed session request.
    pub ba_cooldown: Duration,
    pub reorder_window: u16,
    pub reorder_max_buffered: usize,
    pub reorder_timeout: Duration,
    /// Arrivals after which an incomplete fragment chain is dropped.
    pub defrag_max_stale: u32,
    /// Receive buffers kept posted on posting transports.
    pub rx_post_target: usize,
    /// Receive buffers posted per refill.
    pub rx_refill_batch: usize,
}

impl Default for DatapathConfig {
    fn default() -> Self {
        Self {
            data_msgs: 1024,
            cmd_msgs: 32,
            rx_msgs: 512,
            slots: 1024,
            frame_bufs: 2048,
            frame_buf_len: 1664,
            low_watermark: 32,
            start_watermark: 128,
            tx_lifetime: [
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ],
            qos_weights: [87, 90, 81],
            eviction_scale_pct: 100,
            colors: 4,
            flow_mode: FlowMode::Credit,
            cmd_timeout: Duration::from_secs(3),
            cmd_long_timeout: Duration::from_secs(8),
            cmd_retry_limit: 2,
            push_failure_limit: 8,
            tx_batch_max: 64,
            addr_list_batch: 16,
            ba_threshold: 10,
            ba_cooldown: Duration::from_secs(5),
            reorder_window: 64,
            reorder_max_buffered: 32,
            reorder_timeout: Duration::from_millis(100),
            defrag_max_stale: 8,
            rx_post_target: 128,
            rx_refill_batch: 32,
        }
    }
}

impl DatapathConfig {
    /// Checks the configuration for values the datapath cannot run with.
    pub fn validate(&self) -> WlanResult {
        let checks = [
            (self.data_msgs > 0, "data_msgs must be positive"),
            (self.cmd_msgs > 0, "cmd_msgs must be positive"),
            (self.rx_msgs > 0, "rx_msgs must be positive"),
            (self.slots > 0, "slots must be positive"),
            (self.frame_bufs > 0, "frame_bufs must be positive"),
            (
                self.frame_buf_len > 0 && self.frame_buf_len <= u16::MAX as usize,
                "frame_buf_len must fit a header length field",
            ),
            (
                self.low_watermark <= self.start_watermark,
                "low_watermark exceeds start_watermark",
            ),
            (
                self.qos_weights.iter().all(|w| *w <= 100),
                "qos_weights are percentages",
            ),
            (self.colors <= MAX_COLORS, "too many credit colors"),
            (
                self.flow_mode == FlowMode::Unlimited || self.colors > 0,
                "credit flow needs at least one color",
            ),
            (
                self.reorder_window.is_power_of_two() && self.reorder_window <= SEQ_HALF,
                "reorder_window must be a power of two within half the sequence space",
            ),
            (
                self.reorder_max_buffered > 0
                    && self.reorder_max_buffered < self.reorder_window as usize,
                "reorder_max_buffered must fit inside the window",
            ),
            (self.tx_batch_max > 0, "tx_batch_max must be positive"),
            (
                self.addr_list_batch > 0 && self.addr_list_batch <= u16::MAX as usize,
                "addr_list_batch out of range",
            ),
        ];
        for (ok, what) in checks {
            if !ok {
                warn!("datapath config: {}", what);
                return Err(WlanError::InvalidInput);
            }
        }
        Ok(())
    }

    /// Queue lifetime of frames in `ac`.
    pub fn lifetime(&self, ac: crate::AccessCategory) -> Duration {
        self.tx_lifetime[ac.index()]
    }
}
