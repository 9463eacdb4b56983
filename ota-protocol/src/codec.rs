// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Marker-delimited frame codec.

use core::time::Duration;

use consts::{EOF, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE, SOF};

use crate::{checksum, FrameType, ResponseCode, Transport, TransportError};

/// Size of an encoded response frame (one payload byte).
pub const RESPONSE_FRAME_LEN: usize = FRAME_OVERHEAD + 1;

/// One decoded frame. The payload borrows the decoder's receive buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame<'a> {
    pub frame_type: FrameType,
    pub payload: &'a [u8],
    /// Checksum field as received
    pub checksum: u32,
}

impl Frame<'_> {
    /// Value of the length field. Saturates for payloads no frame can carry.
    pub fn length(&self) -> u16 {
        u16::try_from(self.payload.len()).unwrap_or(u16::MAX)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    #[error("expected start marker, got {0:#04x}")]
    StartMarker(u8),
    #[error("expected end marker, got {0:#04x}")]
    EndMarker(u8),
    #[error("unknown frame type {0:#04x}")]
    UnknownType(u8),
    #[error("frame checksum {expected:#010x} does not match payload ({actual:#010x})")]
    Checksum { expected: u32, actual: u32 },
    #[error("payload length {length} exceeds buffer capacity {capacity}")]
    Overflow { length: usize, capacity: usize },
    /// `idle` is set when not a single byte of the frame arrived.
    #[error("timed out waiting for frame bytes")]
    Timeout { idle: bool },
    #[error("serial link error")]
    Transport,
    #[error("output buffer too small, {needed} bytes needed")]
    BufferTooSmall { needed: usize },
}

impl FrameError {
    /// Malformed marker or structure, including a corrupted payload.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            FrameError::StartMarker(_) | FrameError::EndMarker(_) | FrameError::UnknownType(_) | FrameError::Checksum { .. }
        )
    }

    fn from_transport(err: TransportError, idle: bool) -> Self {
        match err {
            TransportError::Timeout => FrameError::Timeout { idle },
            TransportError::Io => FrameError::Transport,
        }
    }
}

/// Reads frames into a fixed receive buffer of `N` bytes.
pub struct FrameDecoder<const N: usize = MAX_PAYLOAD_SIZE> {
    buf: [u8; N],
    verify_checksum: bool,
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self::with_capacity()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameDecoder<N> {
    /// Decoder with an `N` byte receive buffer.
    pub const fn with_capacity() -> Self {
        Self {
            buf: [0; N],
            verify_checksum: true,
        }
    }

    /// Check the per-frame checksum against the payload (on by default).
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Read exactly one frame from `transport`.
    ///
    /// Every read is bounded by `timeout`. The declared length is checked against the buffer
    /// capacity before any payload byte is read.
    pub fn decode<T: Transport + ?Sized>(&mut self, transport: &mut T, timeout: Duration) -> Result<Frame<'_>, FrameError> {
        let mut sof = [0u8; 1];
        transport
            .read_exact(&mut sof, timeout)
            .map_err(|e| FrameError::from_transport(e, true))?;
        if sof[0] != SOF {
            return Err(FrameError::StartMarker(sof[0]));
        }

        let mut head = [0u8; 3];
        read(transport, &mut head, timeout)?;
        let frame_type = FrameType::try_from(head[0]).map_err(FrameError::UnknownType)?;
        let length = usize::from(u16::from_be_bytes([head[1], head[2]]));
        if length > N {
            return Err(FrameError::Overflow { length, capacity: N });
        }

        if length > 0 {
            read(transport, &mut self.buf[..length], timeout)?;
        }

        let mut tail = [0u8; 5];
        read(transport, &mut tail, timeout)?;
        let received = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if tail[4] != EOF {
            return Err(FrameError::EndMarker(tail[4]));
        }

        let payload = &self.buf[..length];
        if self.verify_checksum {
            let actual = checksum(payload);
            if actual != received {
                return Err(FrameError::Checksum {
                    expected: received,
                    actual,
                });
            }
        }

        Ok(Frame {
            frame_type,
            payload,
            checksum: received,
        })
    }
}

fn read<T: Transport + ?Sized>(transport: &mut T, buf: &mut [u8], timeout: Duration) -> Result<(), FrameError> {
    transport
        .read_exact(buf, timeout)
        .map_err(|e| FrameError::from_transport(e, false))
}

/// Serialize a frame into `out`, returning the encoded bytes.
pub fn encode<'o>(frame_type: FrameType, payload: &[u8], out: &'o mut [u8]) -> Result<&'o [u8], FrameError> {
    if payload.len() > usize::from(u16::MAX) {
        return Err(FrameError::Overflow {
            length: payload.len(),
            capacity: usize::from(u16::MAX),
        });
    }
    let needed = payload.len() + FRAME_OVERHEAD;
    if out.len() < needed {
        return Err(FrameError::BufferTooSmall { needed });
    }
    let written = write_frame(frame_type, payload, out);
    Ok(&out[..written])
}

/// Serialize the one-byte response frame sent after every processed frame.
pub fn encode_response(code: ResponseCode) -> [u8; RESPONSE_FRAME_LEN] {
    let mut out = [0u8; RESPONSE_FRAME_LEN];
    write_frame(FrameType::Response, &[code as u8], &mut out);
    out
}

// `out` must hold `payload.len() + FRAME_OVERHEAD` bytes.
fn write_frame(frame_type: FrameType, payload: &[u8], out: &mut [u8]) -> usize {
    let len = payload.len();
    out[0] = SOF;
    out[1] = frame_type as u8;
    out[2..4].copy_from_slice(&(len as u16).to_be_bytes());
    out[4..4 + len].copy_from_slice(payload);
    out[4 + len..8 + len].copy_from_slice(&checksum(payload).to_be_bytes());
    out[8 + len] = EOF;
    len + FRAME_OVERHEAD
}
