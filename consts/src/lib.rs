// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![cfg_attr(not(test), no_std)]

/// Start-of-frame sentinel.
pub const SOF: u8 = 0xAA;

/// End-of-frame sentinel.
pub const EOF: u8 = 0xBB;

/// Capacity of the receive buffer, and therefore the largest payload a frame may declare.
/// A Data frame carries at most this many image bytes.
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Fixed bytes around a payload: SOF, type, two length bytes, four checksum bytes, EOF.
pub const FRAME_OVERHEAD: usize = 1 + 1 + 2 + 4 + 1;

/// Chunk size the host client uses unless told otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Size of a flash page on the nRF52 (erase granularity).
pub const FLASH_PAGE: u32 = 4096;

/// Total flash of the nRF52805.
pub const FLASH_SIZE: u32 = 192 * 1024;

/// Start of the SoftDevice, right behind the MBR. Interrupts are forwarded here once an image boots.
pub const SOFTDEVICE_ADDR: u32 = 0x1000;

/// Flash offset of the application window the bootloader programs.
/// Sits right after the SoftDevice and must stay page aligned.
pub const APP_REGION_OFFSET: u32 = 0x19000;

/// Size of the application window (52KB). The last bytes hold the image record.
pub const APP_REGION_SIZE: u32 = 0xD000;

/// Start of the bootloader in flash, the first address the update must never touch.
pub const BASE_BOOTLOADER_ADDR: u32 = APP_REGION_OFFSET + APP_REGION_SIZE;

/// Flash left to the bootloader itself, from [`BASE_BOOTLOADER_ADDR`] to the end of flash.
pub const BOOTLOADER_SIZE: u32 = FLASH_SIZE - BASE_BOOTLOADER_ADDR;

/// Marks a sealed image record at the end of the application window ("OTA!").
pub const IMAGE_RECORD_MAGIC: u32 = u32::from_le_bytes(*b"OTA!");

/// Bytes reserved at the end of the application window for the image record.
pub const IMAGE_RECORD_SIZE: u32 = 16;

/// Per-read timeout applied uniformly to every transport read.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// UART baudrate shared by the bootloader and the host client.
pub const DEFAULT_BAUDRATE: u32 = 115_200;
