// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt;

use crc::Digest;
use ota_protocol::CRC32;

use crate::SessionError;

/// Running CRC-32 over the image bytes that made it into flash.
///
/// Fed in commit order by the sequencer, never with bytes that were only received.
pub struct IntegrityValidator {
    digest: Digest<'static, u32>,
    len: u32,
}

impl IntegrityValidator {
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
            len: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
        self.len += bytes.len() as u32;
    }

    /// Number of bytes accumulated so far.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Final CRC of everything accumulated. Leaves the validator reset.
    pub fn finalize(&mut self) -> u32 {
        let digest = core::mem::replace(&mut self.digest, CRC32.digest());
        self.len = 0;
        digest.finalize()
    }

    /// Finalize and compare against the checksum the header declared.
    pub fn verify(&mut self, declared: u32) -> Result<u32, SessionError> {
        let actual = self.finalize();
        if actual != declared {
            return Err(SessionError::Integrity { declared, actual });
        }
        Ok(actual)
    }
}

impl Default for IntegrityValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IntegrityValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityValidator").field("len", &self.len).finish_non_exhaustive()
    }
}
