use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use kdma::DmaToken;
use spin::Mutex;

use crate::{BufDesc, Channel, DescSlot, TransportCaps, TransportOps, WlanError, WlanResult};

/// One accepted [`TransportOps::push_batch`] call.
#[derive(Debug, Clone)]
pub struct PushRecord {
    pub channel: Channel,
    pub descs: Vec<BufDesc>,
    /// Bytes behind each descriptor, when they could be read.
    pub frames: Vec<Vec<u8>>,
}

/// A transport that records what it is given.
///
/// With [`TransportCaps::BUS_ADDRESS`] the mock reads pushed bytes straight
/// from the bus address, so the datapath under test must use an identity
/// mapping (`LinearMapper::new(0)`).
pub struct MockTransport {
    caps: TransportCaps,
    pushes: Mutex<Vec<PushRecord>>,
    failures: AtomicUsize,
    failed: AtomicUsize,
    rx_ring_size: usize,
    rx_capacity: usize,
    next_rx_slot: AtomicUsize,
    posted: Mutex<Vec<BufDesc>>,
}

impl MockTransport {
    pub fn new(caps: TransportCaps) -> Self {
        Self {
            caps,
            pushes: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            rx_ring_size: 32,
            rx_capacity: 1600,
            next_rx_slot: AtomicUsize::new(0),
            posted: Mutex::new(Vec::new()),
        }
    }

    /// Sets the receive ring geometry.
    pub fn with_rx_ring(mut self, size: usize, capacity: usize) -> Self {
        self.rx_ring_size = size;
        self.rx_capacity = capacity;
        self
    }

    /// Makes the next `n` pushes fail with [`WlanError::Io`].
    pub fn fail_pushes(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of pushes rejected so far.
    pub fn failed_pushes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// All accepted pushes.
    pub fn pushes(&self) -> Vec<PushRecord> {
        self.pushes.lock().clone()
    }

    /// Takes and clears all accepted pushes.
    pub fn take_pushes(&self) -> Vec<PushRecord> {
        core::mem::take(&mut *self.pushes.lock())
    }

    /// Tokens pushed on `channel`, in push order.
    pub fn pushed_tokens(&self, channel: Channel) -> Vec<DmaToken> {
        self.pushes
            .lock()
            .iter()
            .filter(|p| p.channel == channel)
            .flat_map(|p| p.descs.iter().map(|d| d.token))
            .collect()
    }

    /// Frames pushed on `channel`, in push order.
    pub fn pushed_frames(&self, channel: Channel) -> Vec<Vec<u8>> {
        self.pushes
            .lock()
            .iter()
            .filter(|p| p.channel == channel)
            .flat_map(|p| p.frames.iter().cloned())
            .collect()
    }

    /// Takes the receive buffers currently posted by the host.
    pub fn take_posted(&self) -> Vec<BufDesc> {
        core::mem::take(&mut *self.posted.lock())
    }

    /// Number of receive buffers currently posted.
    pub fn posted_count(&self) -> usize {
        self.posted.lock().len()
    }

    fn snoop(&self, desc: &BufDesc) -> Vec<u8> {
        if !self.caps.contains(TransportCaps::BUS_ADDRESS) || desc.len == 0 {
            return Vec::new();
        }
        // Identity mapping: the bus address is the CPU address.
        let ptr = desc.addr.as_u64() as *const u8;
        unsafe { core::slice::from_raw_parts(ptr, desc.len) }.to_vec()
    }
}

impl TransportOps for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    fn caps(&self) -> TransportCaps {
        self.caps
    }

    fn push_batch(&self, channel: Channel, bufs: &[BufDesc]) -> WlanResult {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            self.failed.fetch_add(1, Ordering::SeqCst);
            debug!("mock: failing push of {} buffers on {:?}", bufs.len(), channel);
            return Err(WlanError::Io);
        }
        if channel == Channel::RX {
            self.posted.lock().extend_from_slice(bufs);
            return Ok(());
        }
        let frames = bufs.iter().map(|d| self.snoop(d)).collect();
        self.pushes.lock().push(PushRecord {
            channel,
            descs: bufs.to_vec(),
            frames,
        });
        Ok(())
    }

    fn alloc_buffer_descriptors(&self, channel: Channel, count: usize) -> WlanResult<Vec<DescSlot>> {
        if channel != Channel::RX || !self.caps.contains(TransportCaps::POSTED_RX) {
            return Err(WlanError::Unsupported);
        }
        let room = self.rx_ring_size.saturating_sub(self.posted_count());
        let n = count.min(room);
        let slots = (0..n)
            .map(|_| {
                let index = self.next_rx_slot.fetch_add(1, Ordering::SeqCst) % self.rx_ring_size;
                DescSlot {
                    index: index as u16,
                    capacity: self.rx_capacity,
                }
            })
            .collect();
        Ok(slots)
    }
}
