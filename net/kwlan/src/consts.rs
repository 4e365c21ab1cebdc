// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Fixed limits of the datapath.

use strum::EnumCount;

use crate::Mode;

/// Maximum number of associated stations across all modes.
pub const MAX_STATIONS: usize = 32;

/// Size of the peer table: one entry per station plus one reserved
/// broadcast/multicast entry per mode.
pub const PEER_TABLE_SIZE: usize = MAX_STATIONS + <Mode as EnumCount>::COUNT;

/// Number of traffic identifiers.
pub const MAX_TID: usize = 8;

/// Number of WMM access categories.
pub const AC_COUNT: usize = 4;

/// Maximum number of credit colors the firmware may report.
pub const MAX_COLORS: usize = 8;

/// Sequence numbers are 12 bits wide.
pub const SEQ_MODULO: u16 = 4096;

/// Half of the sequence space; anything further behind the window base is
/// treated as old.
pub const SEQ_HALF: u16 = SEQ_MODULO / 2;
