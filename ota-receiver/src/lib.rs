// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bootloader side of the serial firmware update.
//!
//! [`SessionDriver`] reads frames, feeds them to the [`UpdateMachine`], and answers each one
//! with an Ack or a Nack. The machine commits Data chunks to flash through the
//! [`FlashSequencer`] and keeps the [`IntegrityValidator`] in step with what was programmed.
//! The flash is any [`embedded_storage::nor_flash::NorFlash`], the serial link any
//! [`ota_protocol::Transport`].

#![cfg_attr(not(test), no_std)]

// must come first so the log macros are visible in the other modules
mod fmt;

mod config;
mod driver;
mod error;
mod machine;
mod sequencer;
mod validator;

#[cfg(test)]
mod tests;

pub use config::{ReceiverConfig, RegionError, StorageRegion};
pub use driver::SessionDriver;
pub use error::{ErrorKind, FlashError, FlashFault, ProtocolError, SessionError};
pub use machine::{Session, Step, UpdateMachine, UpdateReport, UpdateState};
pub use sequencer::{Commit, FlashSequencer, ImageRecord};
pub use validator::IntegrityValidator;
