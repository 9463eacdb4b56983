// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generates `memory.x` from the shared flash layout and puts it on the linker search path.

use consts::{BASE_BOOTLOADER_ADDR, BOOTLOADER_SIZE};
use std::env;
use std::fs;
use std::path::PathBuf;

fn memory_x() -> String {
    format!(
        r##"
        MEMORY
        {{
            /* Bootloader partition: {kib}K from {base:#X} to the end of flash */
            /* The SoftDevice never runs while the bootloader does, so no RAM is set aside for it */
            FLASH (rx) : ORIGIN = {base:#X}, LENGTH = {size:#X}
            RAM : ORIGIN = 0x20000008, LENGTH = 24K - 8
            mbr_uicr_bootloader_addr (r) : ORIGIN = 0x10001014, LENGTH = 0x4
            uicr_approtect (r) : ORIGIN = 0x10001208, LENGTH = 0x4
        }}

        SECTIONS {{
            .uicr_approtect :  {{
                KEEP(*(.uicr_approtect))
                . = ALIGN(4);
            }} > uicr_approtect

            .mbr_uicr_bootloader_addr :  {{
                KEEP(*(.mbr_uicr_bootloader_addr))
                . = ALIGN(4);
            }} > mbr_uicr_bootloader_addr
        }};
        "##,
        base = BASE_BOOTLOADER_ADDR,
        size = BOOTLOADER_SIZE,
        kib = BOOTLOADER_SIZE / 1024,
    )
}

fn main() -> std::io::Result<()> {
    let out = PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| std::io::Error::other("OUT_DIR not set"))?);
    fs::write(out.join("memory.x"), memory_x())?;
    println!("cargo:rustc-link-search={}", out.display());

    // the layout lives in the consts crate
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=../consts/src/lib.rs");

    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    Ok(())
}
