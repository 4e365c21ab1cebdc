use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::ptr::NonNull;

use spin::Mutex;

use crate::{WlanError, WlanResult};

const MIN_BUFFER_LEN: usize = 64;
const MAX_BUFFER_LEN: usize = 65535;

/// A frame buffer borrowed from a [`FrameBufPool`].
///
/// Dropping it returns the memory to the pool, so a frame held by a
/// message record, a reorder session or a transport slot keeps its buffer
/// exactly as long as it is held.
///
/// The layout of the buffer is:
///
/// ```text
///   ______________________ capacity ______________________
///  /                                                      \
/// +------------------+------------------+------------------+
/// |   Host header    |      Frame       |      Unused      |
/// +------------------+------------------+------------------+
/// |\__ hdr_len __/ \__ payload_len __/
/// |
/// base_ptr
/// ```
///
/// The header room is filled by the datapath with the host-interface
/// header; producers only ever touch the payload.
pub struct FrameBuf {
    hdr_len: usize,
    payload_len: usize,
    buf_len: usize,
    base_ptr: NonNull<u8>,
    pool_offset: usize,
    pool: Arc<FrameBufPool>,
}

unsafe impl Send for FrameBuf {}
unsafe impl Sync for FrameBuf {}

impl FrameBuf {
    const unsafe fn get_slice(&self, start: usize, len: usize) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.base_ptr.as_ptr().add(start), len) }
    }

    const unsafe fn get_slice_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.base_ptr.as_ptr().add(start), len) }
    }

    /// Returns the capacity of the buffer.
    pub const fn capacity(&self) -> usize {
        self.buf_len
    }

    /// Returns the length of the header part.
    pub const fn hdr_len(&self) -> usize {
        self.hdr_len
    }

    /// Returns the length of the payload part.
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Returns the header part of the buffer.
    pub const fn header(&self) -> &[u8] {
        unsafe { self.get_slice(0, self.hdr_len) }
    }

    /// Returns the mutable reference to the header part.
    pub const fn header_mut(&mut self) -> &mut [u8] {
        unsafe { self.get_slice_mut(0, self.hdr_len) }
    }

    /// Returns the payload part of the buffer.
    pub const fn payload(&self) -> &[u8] {
        unsafe { self.get_slice(self.hdr_len, self.payload_len) }
    }

    /// Returns the mutable reference to the payload part.
    pub const fn payload_mut(&mut self) -> &mut [u8] {
        unsafe { self.get_slice_mut(self.hdr_len, self.payload_len) }
    }

    /// Returns the header and payload as one contiguous slice.
    pub const fn frame(&self) -> &[u8] {
        unsafe { self.get_slice(0, self.hdr_len + self.payload_len) }
    }

    /// Returns the entire buffer.
    pub const fn buffer(&self) -> &[u8] {
        unsafe { self.get_slice(0, self.buf_len) }
    }

    /// Returns the mutable reference to the entire buffer.
    pub const fn buffer_mut(&mut self) -> &mut [u8] {
        unsafe { self.get_slice_mut(0, self.buf_len) }
    }

    /// The start of the buffer, for address translation.
    pub const fn base_ptr(&self) -> NonNull<u8> {
        self.base_ptr
    }

    /// Re-splits the frame into header and payload.
    ///
    /// Fails if the lengths do not fit the buffer.
    pub fn set_layout(&mut self, hdr_len: usize, payload_len: usize) -> WlanResult {
        match hdr_len.checked_add(payload_len) {
            Some(total) if total <= self.buf_len => {
                self.hdr_len = hdr_len;
                self.payload_len = payload_len;
                Ok(())
            }
            _ => Err(WlanError::InvalidInput),
        }
    }

    /// Reserves `hdr_len` bytes of header room and copies `payload` after
    /// it.
    pub fn fill(&mut self, hdr_len: usize, payload: &[u8]) -> WlanResult {
        self.set_layout(hdr_len, payload.len())?;
        self.payload_mut().copy_from_slice(payload);
        Ok(())
    }
}

impl Drop for FrameBuf {
    fn drop(&mut self) {
        self.pool.release_offset(self.pool_offset);
    }
}

impl core::fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameBuf")
            .field("hdr_len", &self.hdr_len)
            .field("payload_len", &self.payload_len)
            .field("offset", &self.pool_offset)
            .finish()
    }
}

/// Fixed-size frame buffers carved out of one allocation.
///
/// One pool backs TX frames, commands, address lists and inline receptions
/// alike, so every buffer is large enough for a full frame plus the host
/// header. The storage never moves: a buffer lent to the transport keeps
/// the address it was translated to until it is dropped, which only
/// happens once its completion has been taken back.
pub struct FrameBufPool {
    buf_count: usize,
    buf_len: usize,
    storage: NonNull<[u8]>,
    free_offsets: Mutex<Vec<usize>>,
}

unsafe impl Send for FrameBufPool {}
unsafe impl Sync for FrameBufPool {}

impl FrameBufPool {
    /// Creates `buf_count` buffers of `buf_len` bytes each.
    ///
    /// `buf_len` must hold at least a minimal frame and fit the 16-bit
    /// length fields of the host header.
    pub fn new(buf_count: usize, buf_len: usize) -> WlanResult<Arc<Self>> {
        if buf_count == 0 || !(MIN_BUFFER_LEN..=MAX_BUFFER_LEN).contains(&buf_len) {
            warn!("frame buffer pool: bad geometry {} x {}", buf_count, buf_len);
            return Err(WlanError::InvalidInput);
        }

        let storage = vec![0u8; buf_count * buf_len].into_boxed_slice();
        let storage = NonNull::from(Box::leak(storage));
        // Popped from the back, so low offsets go out first.
        let free_offsets = (0..buf_count).rev().map(|i| i * buf_len).collect();
        debug!("frame buffer pool: {} x {} bytes", buf_count, buf_len);
        Ok(Arc::new(Self {
            buf_count,
            buf_len,
            storage,
            free_offsets: Mutex::new(free_offsets),
        }))
    }

    /// Number of buffers in the pool.
    pub const fn capacity(&self) -> usize {
        self.buf_count
    }

    /// Length of every buffer.
    pub const fn buffer_len(&self) -> usize {
        self.buf_len
    }

    /// Buffers not currently handed out.
    pub fn available(&self) -> usize {
        self.free_offsets.lock().len()
    }

    /// Takes a buffer with an empty header and payload, or `None` when
    /// every buffer is out. Callers size it with
    /// [`FrameBuf::set_layout`] or [`FrameBuf::fill`].
    pub fn alloc_buf(self: &Arc<Self>) -> Option<FrameBuf> {
        let pool_offset = self.free_offsets.lock().pop()?;
        // `pool_offset` is inside the storage by construction.
        let base = self.storage.as_ptr() as *mut u8;
        let base_ptr = NonNull::new(unsafe { base.add(pool_offset) })?;
        Some(FrameBuf {
            hdr_len: 0,
            payload_len: 0,
            buf_len: self.buf_len,
            base_ptr,
            pool_offset,
            pool: Arc::clone(self),
        })
    }

    fn release_offset(&self, pool_offset: usize) {
        debug_assert_eq!(pool_offset % self.buf_len, 0);
        self.free_offsets.lock().push(pool_offset);
    }
}

impl Drop for FrameBufPool {
    fn drop(&mut self) {
        // Each `FrameBuf` keeps the pool alive, so none is out here.
        drop(unsafe { Box::from_raw(self.storage.as_ptr()) });
    }
}
