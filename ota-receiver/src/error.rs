// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use embedded_storage::nor_flash::NorFlashErrorKind;
use ota_protocol::{FrameError, FrameType, PayloadError, TransportError};

use crate::machine::UpdateState;

/// A well-formed frame the current session state does not accept.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    #[error("{frame:?} frame not accepted in state {state:?}")]
    Unexpected { state: UpdateState, frame: FrameType },
    #[error("End received after {staged} of {declared} image bytes")]
    Incomplete { staged: u32, declared: u32 },
    #[error("{len} byte chunk overruns the image ({staged} of {declared} bytes staged)")]
    Overrun { len: usize, staged: u32, declared: u32 },
    #[error("image of {size} bytes does not fit the {max} byte window")]
    ImageTooLarge { size: u32, max: u32 },
    #[error("header declares an empty image")]
    EmptyImage,
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// What the flash driver reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashFault {
    NotAligned,
    OutOfBounds,
    Other,
}

impl From<NorFlashErrorKind> for FlashFault {
    fn from(kind: NorFlashErrorKind) -> Self {
        match kind {
            NorFlashErrorKind::NotAligned => FlashFault::NotAligned,
            NorFlashErrorKind::OutOfBounds => FlashFault::OutOfBounds,
            _ => FlashFault::Other,
        }
    }
}

/// Storage failure. After any of these the window must not be booted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    #[error("erasing the storage window failed ({0:?})")]
    Erase(FlashFault),
    /// `committed` bytes were programmed by the failing call before the driver gave up.
    #[error("programming failed after {committed} bytes ({fault:?})")]
    Program { committed: usize, fault: FlashFault },
    #[error("reading the storage window failed ({0:?})")]
    Read(FlashFault),
    #[error("storage holds CRC {actual:#010x}, programmed {expected:#010x}")]
    Verify { expected: u32, actual: u32 },
}

/// Why an update session ended without a committed image.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("image CRC {actual:#010x} does not match declared {declared:#010x}")]
    Integrity { declared: u32, actual: u32 },
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error("update aborted by host")]
    Aborted,
    #[error("failed to send response: {0}")]
    Transport(TransportError),
}

impl From<PayloadError> for SessionError {
    fn from(err: PayloadError) -> Self {
        SessionError::Protocol(err.into())
    }
}

/// Error classes as the protocol names them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    Framing,
    Timeout,
    Overflow,
    Protocol,
    Integrity,
    Flash,
    AbortRequested,
    Transport,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Frame(FrameError::Timeout { .. }) => ErrorKind::Timeout,
            SessionError::Frame(FrameError::Overflow { .. }) => ErrorKind::Overflow,
            SessionError::Frame(FrameError::Transport) | SessionError::Transport(_) => ErrorKind::Transport,
            SessionError::Frame(_) => ErrorKind::Framing,
            SessionError::Protocol(_) => ErrorKind::Protocol,
            SessionError::Integrity { .. } => ErrorKind::Integrity,
            SessionError::Flash(_) => ErrorKind::Flash,
            SessionError::Aborted => ErrorKind::AbortRequested,
        }
    }

    /// Nobody started talking: the session timed out before its first byte.
    pub fn is_idle_timeout(&self) -> bool {
        matches!(self, SessionError::Frame(FrameError::Timeout { idle: true }))
    }
}
