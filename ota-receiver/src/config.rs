// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::time::Duration;

use consts::{APP_REGION_OFFSET, APP_REGION_SIZE, DEFAULT_TIMEOUT_MS, IMAGE_RECORD_SIZE};
use embedded_storage::nor_flash::NorFlash;

/// Largest flash write unit the sequencer can stage between chunks.
pub(crate) const MAX_WRITE_UNIT: usize = IMAGE_RECORD_SIZE as usize;

/// The contiguous flash window an update is committed into.
///
/// The window is erased as a whole when the first chunk arrives. Its last
/// [`IMAGE_RECORD_SIZE`] bytes hold the image record, the rest takes the image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageRegion {
    offset: u32,
    len: u32,
}

impl StorageRegion {
    /// Window of `len` bytes at flash `offset`. Checked against the flash when the sequencer is built.
    pub const fn new(offset: u32, len: u32) -> Self {
        Self { offset, len }
    }

    pub const fn offset(&self) -> u32 {
        self.offset
    }

    pub const fn len(&self) -> u32 {
        self.len
    }

    pub const fn end(&self) -> u32 {
        self.offset + self.len
    }

    /// Largest image a Header may declare.
    pub const fn max_image_size(&self) -> u32 {
        self.len.saturating_sub(IMAGE_RECORD_SIZE)
    }

    pub(crate) const fn record_offset(&self) -> u32 {
        self.end() - IMAGE_RECORD_SIZE
    }

    /// Make sure `flash` can erase, program and read this window the way the sequencer needs.
    pub fn check<F: NorFlash>(&self, flash: &F) -> Result<(), RegionError> {
        let erase = F::ERASE_SIZE as u32;
        if self.len <= IMAGE_RECORD_SIZE {
            return Err(RegionError::TooSmall { len: self.len });
        }
        if self.offset % erase != 0 || self.len % erase != 0 {
            return Err(RegionError::Unaligned {
                offset: self.offset,
                len: self.len,
                erase_size: erase,
            });
        }
        let end = self.offset.checked_add(self.len).ok_or(RegionError::OutOfBounds {
            end: u32::MAX,
            capacity: flash.capacity(),
        })?;
        if end as usize > flash.capacity() {
            return Err(RegionError::OutOfBounds {
                end,
                capacity: flash.capacity(),
            });
        }
        for unit in [F::WRITE_SIZE, F::READ_SIZE] {
            if unit == 0 || unit > MAX_WRITE_UNIT || MAX_WRITE_UNIT % unit != 0 {
                return Err(RegionError::AccessUnit { unit });
            }
        }
        Ok(())
    }
}

/// A storage window the flash driver cannot serve.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionError {
    #[error("window of {len} bytes leaves no room for an image")]
    TooSmall { len: u32 },
    #[error("window {offset:#x}+{len:#x} is not aligned to the {erase_size} byte erase size")]
    Unaligned { offset: u32, len: u32, erase_size: u32 },
    #[error("window ends at {end:#x}, flash holds {capacity:#x} bytes")]
    OutOfBounds { end: u32, capacity: usize },
    #[error("flash access unit of {unit} bytes is not supported")]
    AccessUnit { unit: usize },
}

/// Runtime knobs of the receiver.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReceiverConfig {
    /// Where the image goes
    pub region: StorageRegion,
    /// Bound on every single transport read
    pub timeout: Duration,
    /// Reject frames whose checksum field does not match their payload
    pub verify_frame_checksum: bool,
    /// Re-read the programmed image and compare its CRC before sealing it
    pub verify_readback: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            region: StorageRegion::new(APP_REGION_OFFSET, APP_REGION_SIZE),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            verify_frame_checksum: true,
            verify_readback: true,
        }
    }
}
