// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use consts::{APP_REGION_OFFSET, SOFTDEVICE_ADDR};
use cortex_m::peripheral::NVIC;
use defmt::info;
use embassy_nrf::interrupt::Interrupt;
use nrf_softdevice_s112::sd_softdevice_vector_table_base_set;

/// Boots the image committed to the application window on top of the SoftDevice.
///
/// The MBR brings the SoftDevice up and forwards interrupts to it; the SoftDevice hands the
/// ones it does not own to the application's vector table.
///
/// # Safety
///
/// This modifies the stack pointer and reset vector and will run code placed in the application window.
/// Call it only after the window was found to hold a sealed image.
pub unsafe fn jump_to_app() -> ! {
    use nrf_softdevice_mbr as mbr;

    let mut cmd = mbr::sd_mbr_command_t {
        command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_INIT_SD,
        params: mbr::sd_mbr_command_t__bindgen_ty_1 {
            irq_forward_address_set: mbr::sd_mbr_command_irq_forward_address_set_t {
                address: APP_REGION_OFFSET,
            },
        },
    };
    let ret = mbr::sd_mbr_command(&mut cmd);
    info!("SoftDevice init result {}", ret);

    NVIC::mask(Interrupt::UARTE0_UART0);
    NVIC::mask(Interrupt::TIMER1);
    NVIC::mask(Interrupt::RTC1);

    // SVC, must not run with PRIMASK set
    let ret = sd_softdevice_vector_table_base_set(APP_REGION_OFFSET);
    info!("SoftDevice vector table base result {}", ret);

    let mut cmd = mbr::sd_mbr_command_t {
        command: mbr::NRF_MBR_COMMANDS_SD_MBR_COMMAND_IRQ_FORWARD_ADDRESS_SET,
        params: mbr::sd_mbr_command_t__bindgen_ty_1 {
            irq_forward_address_set: mbr::sd_mbr_command_irq_forward_address_set_t {
                address: SOFTDEVICE_ADDR,
            },
        },
    };
    let ret = mbr::sd_mbr_command(&mut cmd);
    info!("MBR irq forward result {}", ret);

    let vector_table = APP_REGION_OFFSET as *const u32;
    info!(
        "msp = {=u32:x}, rv = {=u32:x}",
        *vector_table,
        *vector_table.add(1)
    );

    cortex_m::asm::bootload(vector_table)
}
