// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::time::Duration;

/// Failure of the byte-level serial link.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    #[error("no byte received before the timeout")]
    Timeout,
    #[error("serial link error")]
    Io,
}

/// Blocking byte link between host and device.
///
/// `timeout` bounds the wait for every single byte: a read that stalls longer than
/// `timeout` between two bytes fails with [`TransportError::Timeout`], it never waits forever.
pub trait Transport {
    /// Fill `buf` completely.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError>;

    /// Send all of `buf`.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).read_exact(buf, timeout)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(buf)
    }
}
