// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use embassy_futures::block_on;
use embassy_nrf::buffered_uarte::BufferedUarte;
use embassy_nrf::peripherals::{TIMER1, UARTE0};
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};
use ota_protocol::{Transport, TransportError};

/// UARTE0 as the update link.
///
/// Reception runs into the driver's ring buffer, so bytes arriving between two reads are kept.
pub struct UartLink<'d> {
    uart: BufferedUarte<'d, UARTE0, TIMER1>,
}

impl<'d> UartLink<'d> {
    pub fn new(uart: BufferedUarte<'d, UARTE0, TIMER1>) -> Self {
        Self { uart }
    }
}

impl Transport for UartLink<'_> {
    fn read_exact(&mut self, buf: &mut [u8], timeout: core::time::Duration) -> Result<(), TransportError> {
        let timeout = Duration::try_from(timeout).map_err(|_| TransportError::Io)?;
        let mut filled = 0;
        // every read returns as soon as one byte is buffered, the timeout bounds the gap between bytes
        while filled < buf.len() {
            match block_on(with_timeout(timeout, self.uart.read(&mut buf[filled..]))) {
                Ok(Ok(0)) => return Err(TransportError::Io),
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => {
                    defmt::error!("UART read error {}", defmt::Debug2Format(&e));
                    return Err(TransportError::Io);
                }
                Err(_) => return Err(TransportError::Timeout),
            }
        }
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        block_on(async {
            self.uart.write_all(buf).await?;
            self.uart.flush().await
        })
        .map_err(|e| {
            defmt::error!("UART write error {}", defmt::Debug2Format(&e));
            TransportError::Io
        })
    }
}
