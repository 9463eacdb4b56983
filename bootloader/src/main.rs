// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]
mod jump_app;
mod uart;

use defmt_rtt as _;
// global logger
use embassy_nrf as _;
// time driver
use panic_probe as _;

use consts::BASE_BOOTLOADER_ADDR;
use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_nrf::buffered_uarte::{self, BufferedUarte};
use embassy_nrf::nvmc::Nvmc;
use embassy_nrf::{bind_interrupts, peripherals, uarte};
use jump_app::jump_to_app;
use ota_receiver::{ReceiverConfig, SessionDriver};
use uart::UartLink;

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => buffered_uarte::InterruptHandler<peripherals::UARTE0>;
});

/// Start address of the bootloader, read by the MBR from UICR at reset.
#[used]
#[link_section = ".mbr_uicr_bootloader_addr"]
pub static BOOTLOADER_ADDR: u32 = BASE_BOOTLOADER_ADDR;

#[cfg(feature = "no-dbg-access")]
#[used]
#[link_section = ".uicr_approtect"]
pub static APP_PROTECTION: u32 = 0xFFFF_FF00;

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());

    let mut config_uart = uarte::Config::default();
    config_uart.parity = uarte::Parity::EXCLUDED;
    // consts::DEFAULT_BAUDRATE, shared with the host client
    config_uart.baudrate = uarte::Baudrate::BAUD115200;

    // Holds a whole frame at the largest payload
    let mut rx_buffer = [0u8; 2048];
    let mut tx_buffer = [0u8; 64];
    let uart = BufferedUarte::new(
        p.UARTE0,
        p.TIMER1,
        p.PPI_CH0,
        p.PPI_CH1,
        p.PPI_GROUP0,
        Irqs,
        p.P0_16,
        p.P0_18,
        config_uart,
        &mut rx_buffer,
        &mut tx_buffer,
    );

    // FLASH
    let flash = Nvmc::new(p.NVMC);

    let config = ReceiverConfig::default();
    info!(
        "Bootloader ready, application window {:#x}..{:#x}",
        config.region.offset(),
        config.region.end()
    );
    let mut driver = unwrap!(SessionDriver::new(UartLink::new(uart), flash, config));

    // Serve update sessions until there is an image worth booting
    loop {
        match driver.run() {
            Ok(report) => {
                info!(
                    "Update committed: {} bytes, crc {:#x}",
                    report.image_size,
                    report.image_checksum
                );
                break;
            }
            Err(err) if err.is_idle_timeout() => match driver.machine().sequencer().bootable_image() {
                Ok(Some(record)) => {
                    info!("Booting image of {} bytes", record.image_size);
                    break;
                }
                Ok(None) => {}
                Err(err) => warn!("Cannot read the image record: {}", err),
            },
            Err(err) => warn!("Update session failed ({}): {}", err.kind(), err),
        }
    }

    drop(driver);
    unsafe {
        jump_to_app();
    }
}
