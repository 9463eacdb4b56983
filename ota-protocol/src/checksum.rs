// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crc::{Crc, CRC_32_ISO_HDLC};

/// CRC-32 used both for the per-frame checksum and for the whole image.
/// Same polynomial and reflection as zlib's `crc32`, so host tooling can compute it with anything.
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn checksum(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}
