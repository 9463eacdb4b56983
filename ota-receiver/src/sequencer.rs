// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Erase-then-program sequencing of image chunks into the storage window.

use consts::{IMAGE_RECORD_MAGIC, IMAGE_RECORD_SIZE};
use embedded_storage::nor_flash::{NorFlash, NorFlashError};
use heapless::Vec;
use ota_protocol::CRC32;

use crate::config::{RegionError, StorageRegion, MAX_WRITE_UNIT};
use crate::{FlashError, FlashFault};

/// Value of an erased flash byte, used to pad the last write unit.
const ERASED: u8 = 0xFF;

const READBACK_BLOCK: usize = 64;

/// Marker at the end of the storage window saying a complete, verified image sits in front of it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageRecord {
    pub image_size: u32,
    pub image_checksum: u32,
}

impl ImageRecord {
    pub const SIZE: usize = IMAGE_RECORD_SIZE as usize;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [ERASED; Self::SIZE];
        out[0..4].copy_from_slice(&IMAGE_RECORD_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.image_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.image_checksum.to_le_bytes());
        out
    }

    /// `None` unless the bytes carry a sealed record.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Option<Self> {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        if word(0) != IMAGE_RECORD_MAGIC || word(12) != u32::MAX {
            return None;
        }
        Some(Self {
            image_size: word(4),
            image_checksum: word(8),
        })
    }
}

/// Result of one [`FlashSequencer::commit`] call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Commit {
    /// Bytes programmed by this call, including ones carried over from the previous chunk
    pub programmed: usize,
    /// Bytes waiting for the next chunk to fill a write unit
    pub staged: usize,
}

/// Owns the flash for the session and commits chunks into the storage window.
///
/// Programs in the driver's write unit. A chunk tail shorter than a write unit is
/// carried over to the next chunk, and the last unit of the image is padded with
/// the erased value by [`finish`](Self::finish). Only programmed bytes count towards
/// [`bytes_written`](Self::bytes_written) and reach the commit sink.
pub struct FlashSequencer<F: NorFlash> {
    flash: F,
    region: StorageRegion,
    bytes_written: u32,
    carry: Vec<u8, MAX_WRITE_UNIT>,
}

impl<F: NorFlash> FlashSequencer<F> {
    pub fn new(flash: F, region: StorageRegion) -> Result<Self, RegionError> {
        region.check(&flash)?;
        Ok(Self {
            flash,
            region,
            bytes_written: 0,
            carry: Vec::new(),
        })
    }

    pub fn region(&self) -> StorageRegion {
        self.region
    }

    /// Bytes durably programmed this session.
    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    /// Bytes accepted this session: programmed plus carried.
    pub fn staged(&self) -> u32 {
        self.bytes_written + self.carry.len() as u32
    }

    /// Forget the previous session's progress. Does not touch the flash.
    pub fn reset(&mut self) {
        self.bytes_written = 0;
        self.carry.clear();
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    #[cfg(test)]
    pub(crate) fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Erase the whole storage window, sealed record included.
    pub fn erase(&mut self) -> Result<(), FlashError> {
        info!(
            "Erasing storage window {:#x}..{:#x}",
            self.region.offset(),
            self.region.end()
        );
        self.flash
            .erase(self.region.offset(), self.region.end())
            .map_err(|e| FlashError::Erase(e.kind().into()))
    }

    /// Commit `chunk` right behind the bytes already written.
    ///
    /// With `is_first` the window is erased before anything is programmed. `sink` sees every
    /// programmed run of image bytes in storage order; on failure it has seen exactly the
    /// bytes that are on flash.
    pub fn commit(&mut self, chunk: &[u8], is_first: bool, mut sink: impl FnMut(&[u8])) -> Result<Commit, FlashError> {
        if is_first {
            self.reset();
            self.erase()?;
        }

        let unit = F::WRITE_SIZE;
        let mut programmed = 0;
        let mut rest = chunk;

        if !self.carry.is_empty() {
            let take = (unit - self.carry.len()).min(rest.len());
            self.stage(&rest[..take], programmed)?;
            rest = &rest[take..];
            if self.carry.len() == unit {
                let carried = core::mem::take(&mut self.carry);
                self.program(&carried, carried.len(), programmed, &mut sink)?;
                programmed += carried.len();
            }
        }

        let mut units = rest.chunks_exact(unit);
        for bytes in &mut units {
            self.program(bytes, unit, programmed, &mut sink)?;
            programmed += unit;
        }
        self.stage(units.remainder(), programmed)?;

        debug!("Committed {} bytes, {} staged", programmed, self.carry.len());
        Ok(Commit {
            programmed,
            staged: self.carry.len(),
        })
    }

    /// Program the carried tail, padded to a full write unit. Returns the image bytes it held.
    pub fn finish(&mut self, mut sink: impl FnMut(&[u8])) -> Result<usize, FlashError> {
        if self.carry.is_empty() {
            return Ok(0);
        }
        let tail = core::mem::take(&mut self.carry);
        let mut unit = [ERASED; MAX_WRITE_UNIT];
        unit[..tail.len()].copy_from_slice(&tail);
        self.program(&unit[..F::WRITE_SIZE], tail.len(), 0, &mut sink)?;
        Ok(tail.len())
    }

    // The carry holds less than one write unit, and `new` caps the unit at MAX_WRITE_UNIT.
    fn stage(&mut self, bytes: &[u8], committed: usize) -> Result<(), FlashError> {
        self.carry.extend_from_slice(bytes).map_err(|()| {
            error!("{} bytes do not fit behind {} staged", bytes.len(), self.carry.len());
            FlashError::Program {
                committed,
                fault: FlashFault::NotAligned,
            }
        })
    }

    // Writes one whole unit; `image_len` of its bytes belong to the image, the rest is padding.
    fn program(&mut self, unit: &[u8], image_len: usize, committed: usize, sink: &mut impl FnMut(&[u8])) -> Result<(), FlashError> {
        let offset = self.region.offset() + self.bytes_written;
        self.flash.write(offset, unit).map_err(|e| {
            error!("Flash write error at {:#x}", offset);
            FlashError::Program {
                committed,
                fault: e.kind().into(),
            }
        })?;
        self.bytes_written += image_len as u32;
        sink(&unit[..image_len]);
        Ok(())
    }

    /// CRC-32 of the first `len` bytes of the window, read back from flash.
    pub fn readback_checksum(&mut self, len: u32) -> Result<u32, FlashError> {
        let mut digest = CRC32.digest();
        let mut block = [0u8; READBACK_BLOCK];
        let read = F::READ_SIZE;
        let mut pos = 0u32;
        while pos < len {
            let want = (len - pos).min(READBACK_BLOCK as u32) as usize;
            // reads stay aligned; the window always extends past the image into the record
            let aligned = want.div_ceil(read) * read;
            self.flash
                .read(self.region.offset() + pos, &mut block[..aligned])
                .map_err(|e| FlashError::Read(e.kind().into()))?;
            digest.update(&block[..want]);
            pos += want as u32;
        }
        Ok(digest.finalize())
    }

    /// Mark the programmed image valid.
    pub fn seal(&mut self, record: &ImageRecord) -> Result<(), FlashError> {
        let offset = self.region.record_offset();
        self.flash
            .write(offset, &record.to_bytes())
            .map_err(|e| FlashError::Program {
                committed: 0,
                fault: e.kind().into(),
            })?;
        info!(
            "Sealed image record: {} bytes, crc {:#x}",
            record.image_size,
            record.image_checksum
        );
        Ok(())
    }

    /// The sealed record, if the window holds one.
    pub fn record(&mut self) -> Result<Option<ImageRecord>, FlashError> {
        let mut bytes = [0u8; ImageRecord::SIZE];
        self.flash
            .read(self.region.record_offset(), &mut bytes)
            .map_err(|e| FlashError::Read(e.kind().into()))?;
        Ok(ImageRecord::from_bytes(&bytes)
            .filter(|record| record.image_size > 0 && record.image_size <= self.region.max_image_size()))
    }

    /// A sealed record whose checksum still matches what is on flash.
    pub fn bootable_image(&mut self) -> Result<Option<ImageRecord>, FlashError> {
        let Some(record) = self.record()? else {
            return Ok(None);
        };
        let actual = self.readback_checksum(record.image_size)?;
        if actual != record.image_checksum {
            warn!(
                "Image record crc {:#x} does not match flash {:#x}",
                record.image_checksum,
                actual
            );
            return Ok(None);
        }
        Ok(Some(record))
    }
}
