// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Address-list buffers.
//!
//! High-throughput transports accept one buffer holding many addresses
//! instead of a push per frame. The layout is:
//!
//! ```text
//! +---------+---------+-----------+-----------+-----+
//! |  count  |  rsvd   |  addr[0]  |  addr[1]  | ... |
//! | u16 LE  | u16 LE  |  u64 LE   |  u64 LE   |     |
//! +---------+---------+-----------+-----------+-----+
//! ```

use crate::{DmaBusAddress, DmaError, DmaResult};

/// Size of the list header.
pub const HEADER_LEN: usize = 4;
/// Size of one entry.
pub const ENTRY_LEN: usize = 8;

/// Number of bytes needed for a list of `count` entries.
pub const fn encoded_len(count: usize) -> usize {
    HEADER_LEN + count * ENTRY_LEN
}

/// How many entries fit in a buffer of `len` bytes.
pub const fn capacity_for(len: usize) -> usize {
    match len.checked_sub(HEADER_LEN) {
        Some(rest) => rest / ENTRY_LEN,
        None => 0,
    }
}

/// Writes `addrs` as an address list into `out` and returns the bytes used.
///
/// A zero entry would read as "no buffer" on the device side, so it is
/// refused.
pub fn encode<I>(addrs: I, out: &mut [u8]) -> DmaResult<usize>
where
    I: IntoIterator<Item = DmaBusAddress>,
{
    let mut count = 0usize;
    for addr in addrs {
        if addr.is_zero() {
            return Err(DmaError::ZeroAddress);
        }
        let off = encoded_len(count);
        let Some(slot) = out.get_mut(off..off + ENTRY_LEN) else {
            return Err(DmaError::BatchTooLarge);
        };
        slot.copy_from_slice(&addr.as_u64().to_le_bytes());
        count += 1;
    }
    let Ok(count16) = u16::try_from(count) else {
        return Err(DmaError::BatchTooLarge);
    };
    let Some(hdr) = out.get_mut(..HEADER_LEN) else {
        return Err(DmaError::BatchTooLarge);
    };
    hdr[..2].copy_from_slice(&count16.to_le_bytes());
    hdr[2..].fill(0);
    Ok(encoded_len(count))
}

/// Parses an address list.
pub fn decode(buf: &[u8]) -> DmaResult<impl Iterator<Item = DmaBusAddress> + '_> {
    if buf.len() < HEADER_LEN {
        return Err(DmaError::BatchTooLarge);
    }
    let count = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let body = buf
        .get(HEADER_LEN..encoded_len(count))
        .ok_or(DmaError::BatchTooLarge)?;
    Ok(body.chunks_exact(ENTRY_LEN).map(|c| {
        let mut raw = [0u8; ENTRY_LEN];
        raw.copy_from_slice(c);
        DmaBusAddress::new(u64::from_le_bytes(raw))
    }))
}
