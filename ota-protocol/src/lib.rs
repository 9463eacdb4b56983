// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host to bootloader firmware-update protocol.
//! The host streams an image, the bootloader answers every frame with an Ack or a Nack.
//!
//! Wire frame, multi-byte fields big-endian:
//!
//! ```text
//! [SOF:1][type:1][length:2][payload:length][checksum:4][EOF:1]
//! ```
//!
//! `checksum` is a CRC-32 over `payload` only.

#![cfg_attr(not(test), no_std)]

mod checksum;
pub mod codec;
mod transport;

pub use checksum::{checksum, CRC32};
pub use codec::{encode, encode_response, Frame, FrameDecoder, FrameError, RESPONSE_FRAME_LEN};
pub use consts::{EOF, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE, SOF};
pub use transport::{Transport, TransportError};

/// Frame type tag, the second byte of every frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum FrameType {
    /// Session control, see [`Opcode`]
    Command = 0,
    /// Image size and checksum
    Header = 1,
    /// A chunk of the image
    Data = 2,
    /// Device answer, see [`ResponseCode`]
    Response = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Command),
            1 => Ok(Self::Header),
            2 => Ok(Self::Data),
            3 => Ok(Self::Response),
            other => Err(other),
        }
    }
}

/// Command frame opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Open a new update session
    Start = 0,
    /// Close the session once the whole image is written
    End = 1,
    /// Drop the session from any state
    Abort = 2,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Start),
            1 => Ok(Self::End),
            2 => Ok(Self::Abort),
            other => Err(other),
        }
    }
}

/// Response frame codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseCode {
    Ack = 0,
    Nack = 1,
}

impl TryFrom<u8> for ResponseCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ack),
            1 => Ok(Self::Nack),
            other => Err(other),
        }
    }
}

/// Header payload: what the finished image must look like.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    /// Total number of image bytes the host will send
    pub image_size: u32,
    /// CRC-32 over the whole image body
    pub image_checksum: u32,
}

impl ImageHeader {
    /// Encoded payload size.
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(&self.image_size.to_be_bytes());
        out[4..].copy_from_slice(&self.image_checksum.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        let bytes: &[u8; Self::SIZE] = bytes.try_into().map_err(|_| PayloadError::Length {
            frame_type: FrameType::Header,
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        let [s0, s1, s2, s3, c0, c1, c2, c3] = *bytes;
        Ok(Self {
            image_size: u32::from_be_bytes([s0, s1, s2, s3]),
            image_checksum: u32::from_be_bytes([c0, c1, c2, c3]),
        })
    }
}

/// A frame payload that does not match its type tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadError {
    #[error("{frame_type:?} payload must be {expected} bytes, got {actual}")]
    Length {
        frame_type: FrameType,
        expected: usize,
        actual: usize,
    },
    #[error("unknown command opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unknown response code {0:#04x}")]
    UnknownResponse(u8),
    #[error("data frame without payload")]
    EmptyData,
}

/// Strongly typed view of a decoded frame.
///
/// The type tag is inspected first and only the matching payload shape is parsed,
/// so one buffer is never read as two different layouts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Packet<'a> {
    Command(Opcode),
    Header(ImageHeader),
    Data(&'a [u8]),
    Response(ResponseCode),
}

impl<'a> Packet<'a> {
    pub fn parse(frame: &Frame<'a>) -> Result<Self, PayloadError> {
        let payload = frame.payload;
        match frame.frame_type {
            FrameType::Command => {
                let opcode = single_byte(FrameType::Command, payload)?;
                Opcode::try_from(opcode)
                    .map(Packet::Command)
                    .map_err(PayloadError::UnknownOpcode)
            }
            FrameType::Header => ImageHeader::from_bytes(payload).map(Packet::Header),
            FrameType::Data if payload.is_empty() => Err(PayloadError::EmptyData),
            FrameType::Data => Ok(Packet::Data(payload)),
            FrameType::Response => {
                let code = single_byte(FrameType::Response, payload)?;
                ResponseCode::try_from(code)
                    .map(Packet::Response)
                    .map_err(PayloadError::UnknownResponse)
            }
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Packet::Command(_) => FrameType::Command,
            Packet::Header(_) => FrameType::Header,
            Packet::Data(_) => FrameType::Data,
            Packet::Response(_) => FrameType::Response,
        }
    }
}

fn single_byte(frame_type: FrameType, payload: &[u8]) -> Result<u8, PayloadError> {
    match payload {
        [byte] => Ok(*byte),
        _ => Err(PayloadError::Length {
            frame_type,
            expected: 1,
            actual: payload.len(),
        }),
    }
}
