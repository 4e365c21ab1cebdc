// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Fixed-capacity arena of transport buffer slots.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{
    AddressMode, DmaBusAddress, DmaDirection, DmaError, DmaMapper, DmaRegion, DmaResult, DmaToken,
};

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Unoccupied.
    Free,
    /// Lent to the transport for transmission.
    InTransportTx,
    /// Posted to the transport for reception.
    InTransportRx,
    /// The transport reported the reception complete; the buffer waits to
    /// be taken back.
    Consumed,
}

/// The transport-visible view of a wrapped buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrapped {
    /// Reference to the slot, echoed back by completions.
    pub token: DmaToken,
    /// Address of the buffer (or the bus-local handle).
    pub addr: DmaBusAddress,
    /// Accessible length in bytes.
    pub len: usize,
}

/// Result of [`SlotPool::wrap_batch`].
pub struct BatchWrap<T> {
    /// Wrapped buffers, split into groups of at most `max_batch`.
    pub groups: Vec<Vec<Wrapped>>,
    /// The item that failed to wrap, if any, with the reason.
    pub failed: Option<(T, DmaError)>,
    /// Items after the failure that were not attempted.
    pub rest: Vec<T>,
}

struct Slot<T> {
    generation: u32,
    state: SlotState,
    item: Option<T>,
    addr: DmaBusAddress,
    len: usize,
    dir: DmaDirection,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

/// A pool of slots lending buffers of type `T` to a transport.
///
/// The pool owns each wrapped buffer until the matching token is unwrapped,
/// so a completion can never resolve to a different buffer than the one
/// that was lent, and a token can be redeemed at most once.
pub struct SlotPool<T> {
    name: &'static str,
    mode: AddressMode,
    mapper: Option<Arc<dyn DmaMapper>>,
    inner: Mutex<Inner<T>>,
}

impl<T: DmaRegion> SlotPool<T> {
    /// Creates a pool whose addresses come from `mapper`.
    pub fn with_mapper(name: &'static str, capacity: usize, mapper: Arc<dyn DmaMapper>) -> Self {
        Self::new(name, capacity, AddressMode::Bus, Some(mapper))
    }

    /// Creates a pool whose addresses are bus-local handles.
    pub fn with_handles(name: &'static str, capacity: usize) -> Self {
        Self::new(name, capacity, AddressMode::Handle, None)
    }

    fn new(
        name: &'static str,
        capacity: usize,
        mode: AddressMode,
        mapper: Option<Arc<dyn DmaMapper>>,
    ) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            state: SlotState::Free,
            item: None,
            addr: DmaBusAddress::ZERO,
            len: 0,
            dir: DmaDirection::ToDevice,
        });
        // Pop order hands out low indices first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            name,
            mode,
            mapper,
            inner: Mutex::new(Inner { slots, free }),
        }
    }

    /// The address mode of this pool.
    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    /// Returns the capacity of the pool.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Returns the number of free slots.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Lends `item` to the transport.
    ///
    /// On failure the item is handed back together with the reason. A
    /// [`DmaError::ZeroAddress`] failure is fatal for the caller.
    pub fn wrap(&self, item: T, dir: DmaDirection) -> Result<Wrapped, (T, DmaError)> {
        let (cpu, len) = item.dma_region();
        let mapped = match (self.mode, &self.mapper) {
            (AddressMode::Bus, Some(mapper)) => {
                let addr = mapper.map(cpu, len, dir);
                if addr.is_zero() {
                    error!("{}: translation of {:p}+{} produced a zero address", self.name, cpu, len);
                    return Err((item, DmaError::ZeroAddress));
                }
                Some(addr)
            }
            (AddressMode::Bus, None) => {
                error!("{}: bus address mode without a mapper", self.name);
                return Err((item, DmaError::ZeroAddress));
            }
            (AddressMode::Handle, _) => None,
        };

        let mut inner = self.inner.lock();
        let Some(index) = inner.free.pop() else {
            drop(inner);
            if let (Some(addr), Some(mapper)) = (mapped, &self.mapper) {
                mapper.unmap(addr, len, dir);
            }
            return Err((item, DmaError::Exhausted));
        };
        let slot = &mut inner.slots[index as usize];
        let token = DmaToken::new(index, slot.generation);
        let addr = mapped.unwrap_or(DmaBusAddress::new(token.as_u64()));
        slot.state = match dir {
            DmaDirection::ToDevice => SlotState::InTransportTx,
            DmaDirection::FromDevice => SlotState::InTransportRx,
        };
        slot.item = Some(item);
        slot.addr = addr;
        slot.len = len;
        slot.dir = dir;
        trace!("{}: wrap {:?} -> {:?}", self.name, token, addr);
        Ok(Wrapped { token, addr, len })
    }

    /// Wraps `items` in order, grouping the results `max_batch` at a time.
    ///
    /// Wrapping stops at the first failure; the failed item and everything
    /// after it are returned untouched.
    pub fn wrap_batch<I>(&self, items: I, max_batch: usize, dir: DmaDirection) -> BatchWrap<T>
    where
        I: IntoIterator<Item = T>,
    {
        let max_batch = max_batch.max(1);
        let mut groups: Vec<Vec<Wrapped>> = Vec::new();
        let mut iter = items.into_iter();
        while let Some(item) = iter.next() {
            match self.wrap(item, dir) {
                Ok(w) => {
                    if groups.last().is_none_or(|g| g.len() >= max_batch) {
                        groups.push(Vec::with_capacity(max_batch));
                    }
                    if let Some(g) = groups.last_mut() {
                        g.push(w);
                    }
                }
                Err(failed) => {
                    return BatchWrap {
                        groups,
                        failed: Some(failed),
                        rest: iter.collect(),
                    };
                }
            }
        }
        BatchWrap {
            groups,
            failed: None,
            rest: Vec::new(),
        }
    }

    /// Marks a posted receive slot as filled by the device.
    pub fn complete(&self, token: DmaToken) -> DmaResult {
        let mut inner = self.inner.lock();
        let slot = Self::lookup(self.name, &mut inner, token)?;
        if slot.state != SlotState::InTransportRx {
            error!("{}: completion for {:?} in state {:?}", self.name, token, slot.state);
            return Err(DmaError::StaleToken);
        }
        slot.state = SlotState::Consumed;
        Ok(())
    }

    /// Returns the state of the slot `token` refers to.
    pub fn state(&self, token: DmaToken) -> DmaResult<SlotState> {
        let mut inner = self.inner.lock();
        Self::lookup(self.name, &mut inner, token).map(|s| s.state)
    }

    /// Takes the buffer back from the transport and frees the slot.
    ///
    /// A token can be redeemed once; later attempts fail with
    /// [`DmaError::StaleToken`].
    pub fn unwrap(&self, token: DmaToken) -> DmaResult<T> {
        let mut inner = self.inner.lock();
        let slot = Self::lookup(self.name, &mut inner, token)?;
        let item = slot.item.take().ok_or(DmaError::StaleToken)?;
        let (addr, len, dir) = (slot.addr, slot.len, slot.dir);
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        slot.addr = DmaBusAddress::ZERO;
        // `lookup` validated the index.
        inner.free.push((token.index().unwrap_or_default()) as u32);
        drop(inner);

        if let Some(mapper) = &self.mapper {
            mapper.unmap(addr, len, dir);
        }
        Ok(item)
    }

    /// Takes every lent buffer back, e.g. after the transport was reset.
    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut out = Vec::new();
        let mut unmaps = Vec::new();
        let Inner { slots, free } = &mut *inner;
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(item) = slot.item.take() {
                unmaps.push((slot.addr, slot.len, slot.dir));
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
                slot.addr = DmaBusAddress::ZERO;
                free.push(index as u32);
                out.push(item);
            }
        }
        drop(inner);

        if let Some(mapper) = &self.mapper {
            for (addr, len, dir) in unmaps {
                mapper.unmap(addr, len, dir);
            }
        }
        if !out.is_empty() {
            info!("{}: reclaimed {} slots", self.name, out.len());
        }
        out
    }

    fn lookup<'a>(
        name: &str,
        inner: &'a mut Inner<T>,
        token: DmaToken,
    ) -> DmaResult<&'a mut Slot<T>> {
        let Some(slot) = token.index().and_then(|i| inner.slots.get_mut(i)) else {
            error!("{}: token {:?} names no slot", name, token);
            return Err(DmaError::InvalidToken);
        };
        if slot.generation != token.generation() || slot.state == SlotState::Free {
            error!("{}: stale token {:?} (slot is {:?})", name, token, slot.state);
            return Err(DmaError::StaleToken);
        }
        Ok(slot)
    }
}
