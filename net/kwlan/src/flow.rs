// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Credit-based admission control shared by all modes.
//!
//! The firmware hands out transmit credits in a small number of "colors".
//! A color bucket is either unbound, and then shared by every open mode, or
//! bound to one mode, which then consumes it exclusively. Buckets are bound
//! on first use and released when their mode closes.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use spin::Mutex;
use wlan::{WlanError, WlanResult};

use crate::{Mode, ModeSet};

/// How transmissions are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FlowMode {
    /// The firmware grants credits; the host never exceeds them.
    Credit,
    /// The transport buffers on the host side; only the slot pool bounds
    /// what may be sent.
    Unlimited,
}

/// Index of a credit color bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorId(pub u8);

/// Binding state of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    Bound(Mode),
}

/// A firmware credit report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditReport {
    /// Credits returned per color.
    Deltas(Vec<(ColorId, u32)>),
    /// Zero every bucket.
    Reset,
}

#[derive(Debug)]
struct Bucket {
    binding: Binding,
    credits: u32,
}

/// Credits taken for one scheduling cycle, split by the bucket they came
/// from.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Grant {
    /// `None` marks credits that are not backed by a bucket.
    parts: Vec<(Option<ColorId>, u32)>,
}

impl Grant {
    /// Total credits in the grant.
    pub fn total(&self) -> usize {
        self.parts.iter().map(|(_, n)| *n as usize).sum()
    }

    /// Takes one credit, returning the color it is charged to.
    pub fn take(&mut self) -> Option<Option<ColorId>> {
        let (color, n) = self.parts.first_mut()?;
        let color = *color;
        *n -= 1;
        if *n == 0 {
            self.parts.remove(0);
        }
        Some(color)
    }

    /// Credits not taken, per color.
    pub fn into_remaining(self) -> Vec<(Option<ColorId>, u32)> {
        self.parts
    }
}

/// The set of color buckets.
pub struct FlowControl {
    mode: FlowMode,
    buckets: Vec<Mutex<Bucket>>,
    open: AtomicU8,
}

impl FlowControl {
    /// Creates `colors` unbound, empty buckets.
    pub fn new(mode: FlowMode, colors: usize) -> Self {
        let buckets = (0..colors)
            .map(|_| {
                Mutex::new(Bucket {
                    binding: Binding::Unbound,
                    credits: 0,
                })
            })
            .collect();
        Self {
            mode,
            buckets,
            open: AtomicU8::new(0),
        }
    }

    pub fn flow_mode(&self) -> FlowMode {
        self.mode
    }

    pub fn colors(&self) -> usize {
        self.buckets.len()
    }

    fn open_set(&self) -> ModeSet {
        ModeSet::from_bits_retain(self.open.load(Ordering::Acquire))
    }

    /// Marks `mode` active.
    pub fn open_mode(&self, mode: Mode) {
        self.open.fetch_or(ModeSet::of(mode).bits(), Ordering::AcqRel);
    }

    /// Marks `mode` inactive and releases its bucket. Credits left in the
    /// bucket become shared.
    pub fn close_mode(&self, mode: Mode) {
        self.open.fetch_and(!ModeSet::of(mode).bits(), Ordering::AcqRel);
        for bucket in &self.buckets {
            let mut b = bucket.lock();
            if b.binding == Binding::Bound(mode) {
                debug!("flow: release bucket bound to {:?} ({} credits)", mode, b.credits);
                b.binding = Binding::Unbound;
            }
        }
    }

    /// Color bound to `mode`, if any.
    pub fn bound_color(&self, mode: Mode) -> Option<ColorId> {
        self.buckets
            .iter()
            .position(|b| b.lock().binding == Binding::Bound(mode))
            .map(|i| ColorId(i as u8))
    }

    /// Finds the bucket `mode` should use: its own, else one reclaimed from
    /// a closed mode, else the first unbound one.
    pub fn bind_or_reuse(&self, mode: Mode) -> Option<ColorId> {
        if let Some(color) = self.bound_color(mode) {
            return Some(color);
        }
        let open = self.open_set();
        for (i, bucket) in self.buckets.iter().enumerate() {
            let mut b = bucket.lock();
            if let Binding::Bound(other) = b.binding {
                if !open.has(other) {
                    debug!("flow: {:?} reclaims bucket {} from closed {:?}", mode, i, other);
                    b.binding = Binding::Bound(mode);
                    return Some(ColorId(i as u8));
                }
            }
        }
        for (i, bucket) in self.buckets.iter().enumerate() {
            let mut b = bucket.lock();
            if b.binding == Binding::Unbound {
                debug!("flow: {:?} binds bucket {}", mode, i);
                b.binding = Binding::Bound(mode);
                return Some(ColorId(i as u8));
            }
        }
        None
    }

    /// Credits `mode` could take right now, up to `requested`, without
    /// taking them.
    ///
    /// `slots_available` bounds the unlimited flow mode.
    pub fn credits_obtainable(&self, mode: Mode, requested: usize, slots_available: usize) -> usize {
        match self.mode {
            FlowMode::Unlimited => requested.min(slots_available),
            FlowMode::Credit => {
                let mut total = 0usize;
                for b in &self.buckets {
                    let b = b.lock();
                    match b.binding {
                        Binding::Bound(m) if m == mode => total += b.credits as usize,
                        Binding::Unbound => total += b.credits as usize,
                        Binding::Bound(_) => {}
                    }
                }
                total.min(requested)
            }
        }
    }

    /// Takes up to `requested` credits for `mode`: its bound bucket first,
    /// then unbound buckets in order.
    pub fn acquire(&self, mode: Mode, requested: usize, slots_available: usize) -> Grant {
        let mut grant = Grant::default();
        if requested == 0 {
            return grant;
        }
        if self.mode == FlowMode::Unlimited {
            let n = requested.min(slots_available);
            if n > 0 {
                grant.parts.push((None, n as u32));
            }
            return grant;
        }

        let Some(own) = self.bind_or_reuse(mode) else {
            trace!("flow: no bucket for {:?}", mode);
            return grant;
        };
        let mut want = requested as u32;
        let order = core::iter::once(own.0 as usize)
            .chain((0..self.buckets.len()).filter(|&i| i != own.0 as usize));
        for i in order {
            if want == 0 {
                break;
            }
            let mut b = self.buckets[i].lock();
            let usable = match b.binding {
                Binding::Bound(m) => m == mode,
                Binding::Unbound => true,
            };
            if !usable || b.credits == 0 {
                continue;
            }
            let n = b.credits.min(want);
            b.credits -= n;
            want -= n;
            grant.parts.push((Some(ColorId(i as u8)), n));
        }
        grant
    }

    /// Returns unused or unspent credits to `color`.
    pub fn refund(&self, color: ColorId, n: u32) {
        if let Some(b) = self.buckets.get(color.0 as usize) {
            let mut b = b.lock();
            b.credits = b.credits.saturating_add(n);
        }
    }

    /// Adds `amount` firmware credits to `color`.
    pub fn replenish(&self, color: ColorId, amount: u32) -> WlanResult {
        let b = self
            .buckets
            .get(color.0 as usize)
            .ok_or(WlanError::InvalidInput)?;
        let mut b = b.lock();
        b.credits = b.credits.saturating_add(amount);
        trace!("flow: color {} +{} = {}", color.0, amount, b.credits);
        Ok(())
    }

    /// Applies a firmware credit report.
    pub fn apply(&self, report: &CreditReport) {
        match report {
            CreditReport::Reset => {
                for b in &self.buckets {
                    b.lock().credits = 0;
                }
            }
            CreditReport::Deltas(deltas) => {
                for (color, amount) in deltas {
                    if self.replenish(*color, *amount).is_err() {
                        warn!("flow: credit report for unknown color {}", color.0);
                    }
                }
            }
        }
    }

    /// Unbinds and zeroes every bucket.
    pub fn reset(&self) {
        for b in &self.buckets {
            let mut b = b.lock();
            b.binding = Binding::Unbound;
            b.credits = 0;
        }
    }

    /// Binding and credit count of each bucket.
    pub fn snapshot(&self) -> Vec<(Binding, u32)> {
        self.buckets
            .iter()
            .map(|b| {
                let b = b.lock();
                (b.binding, b.credits)
            })
            .collect()
    }

    /// Sum of credits over all buckets.
    pub fn total_credits(&self) -> u64 {
        self.buckets.iter().map(|b| b.lock().credits as u64).sum()
    }
}
