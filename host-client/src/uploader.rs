// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host side of an update session: one frame out, one response back.

use std::time::Duration;

use ota_protocol::{
    checksum, encode, FrameDecoder, FrameError, FrameType, ImageHeader, Opcode, Packet, PayloadError, ResponseCode,
    Transport, TransportError, FRAME_OVERHEAD, MAX_PAYLOAD_SIZE,
};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("chunk size must be between 1 and {max} bytes, got {size}")]
    ChunkSize { size: usize, max: usize },
    #[error("image of {0} bytes does not fit the header size field")]
    ImageTooLarge(usize),
    #[error("device refused the {0:?} frame")]
    Nack(FrameType),
    #[error("no valid response to the {frame:?} frame: {source}")]
    Response {
        frame: FrameType,
        #[source]
        source: FrameError,
    },
    #[error("cannot encode the {frame:?} frame: {source}")]
    Encode {
        frame: FrameType,
        #[source]
        source: FrameError,
    },
    #[error("device answered with a {0:?} frame instead of a response")]
    Unexpected(FrameType),
    #[error("malformed response: {0}")]
    Payload(#[from] PayloadError),
    #[error("cannot send frame: {0}")]
    Transport(#[from] TransportError),
}

/// How long to wait for each response.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub response: Duration,
    /// The first Data frame is answered only after the device erased its storage window
    pub erase: Duration,
}

pub struct Uploader<T: Transport> {
    transport: T,
    decoder: FrameDecoder<1>,
    timeouts: Timeouts,
    out: Vec<u8>,
}

impl<T: Transport> Uploader<T> {
    pub fn new(transport: T, timeouts: Timeouts) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::with_capacity(),
            timeouts,
            out: vec![0; MAX_PAYLOAD_SIZE + FRAME_OVERHEAD],
        }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send the whole image in `chunk_size` Data frames between Start/Header and End.
    pub fn upload(&mut self, image: &[u8], chunk_size: usize) -> Result<(), UploadError> {
        if chunk_size == 0 || chunk_size > MAX_PAYLOAD_SIZE {
            return Err(UploadError::ChunkSize {
                size: chunk_size,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let image_size = u32::try_from(image.len()).map_err(|_| UploadError::ImageTooLarge(image.len()))?;
        let header = ImageHeader {
            image_size,
            image_checksum: checksum(image),
        };

        log::info!("Sending OTA Start");
        self.command(Opcode::Start)?;
        log::info!(
            "Sending OTA header: {} bytes, crc {:#010x}",
            header.image_size,
            header.image_checksum
        );
        self.send(FrameType::Header, &header.to_bytes(), self.timeouts.response)?;

        let chunks = image.len().div_ceil(chunk_size);
        for (idx, chunk) in image.chunks(chunk_size).enumerate() {
            let timeout = if idx == 0 {
                self.timeouts.erase
            } else {
                self.timeouts.response
            };
            self.send(FrameType::Data, chunk, timeout)?;
            log::info!("[{}/{}]", idx + 1, chunks);
        }

        log::info!("Sending OTA End");
        self.command(Opcode::End)
    }

    pub fn abort(&mut self) -> Result<(), UploadError> {
        log::info!("Sending OTA Abort");
        // the device answers an Abort with a Nack once it dropped the session
        match self.command(Opcode::Abort) {
            Ok(()) | Err(UploadError::Nack(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn command(&mut self, opcode: Opcode) -> Result<(), UploadError> {
        self.send(FrameType::Command, &[opcode as u8], self.timeouts.response)
    }

    fn send(&mut self, frame_type: FrameType, payload: &[u8], timeout: Duration) -> Result<(), UploadError> {
        let frame = encode(frame_type, payload, &mut self.out).map_err(|source| UploadError::Encode {
            frame: frame_type,
            source,
        })?;
        self.transport.write_all(frame)?;

        let response = self
            .decoder
            .decode(&mut self.transport, timeout)
            .map_err(|source| UploadError::Response {
                frame: frame_type,
                source,
            })?;
        match Packet::parse(&response)? {
            Packet::Response(ResponseCode::Ack) => Ok(()),
            Packet::Response(ResponseCode::Nack) => Err(UploadError::Nack(frame_type)),
            other => Err(UploadError::Unexpected(other.frame_type())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use ota_protocol::{encode_response, Frame};

    use super::*;

    /// Device stand-in that answers every frame with a fixed response sequence.
    #[derive(Default)]
    struct Device {
        sent: Vec<u8>,
        replies: VecDeque<ResponseCode>,
        pending: VecDeque<u8>,
    }

    impl Device {
        fn answering(replies: &[ResponseCode]) -> Self {
            Self {
                replies: replies.iter().copied().collect(),
                ..Default::default()
            }
        }

        /// Frames the host sent, as (type, payload).
        fn frames(&self) -> Vec<(FrameType, Vec<u8>)> {
            let mut wire = Wire(self.sent.iter().copied().collect());
            let mut decoder = FrameDecoder::<MAX_PAYLOAD_SIZE>::new();
            let mut frames = Vec::new();
            while !wire.0.is_empty() {
                let Frame {
                    frame_type, payload, ..
                } = decoder.decode(&mut wire, Duration::ZERO).unwrap();
                frames.push((frame_type, payload.to_vec()));
            }
            frames
        }
    }

    impl Transport for Device {
        fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), TransportError> {
            if self.pending.len() < buf.len() {
                return Err(TransportError::Timeout);
            }
            for byte in buf.iter_mut() {
                *byte = self.pending.pop_front().unwrap();
            }
            Ok(())
        }

        fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
            self.sent.extend_from_slice(buf);
            if let Some(code) = self.replies.pop_front() {
                self.pending.extend(encode_response(code));
            }
            Ok(())
        }
    }

    struct Wire(VecDeque<u8>);

    impl Transport for Wire {
        fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<(), TransportError> {
            for byte in buf.iter_mut() {
                *byte = self.0.pop_front().ok_or(TransportError::Timeout)?;
            }
            Ok(())
        }

        fn write_all(&mut self, _buf: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
    }

    const TIMEOUTS: Timeouts = Timeouts {
        response: Duration::from_millis(10),
        erase: Duration::from_millis(100),
    };

    #[test]
    fn uploads_in_chunks() {
        let image: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let mut uploader = Uploader::new(Device::answering(&[ResponseCode::Ack; 7]), TIMEOUTS);
        uploader.upload(&image, 256).unwrap();

        let frames = uploader.into_inner().frames();
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0], (FrameType::Command, vec![Opcode::Start as u8]));
        let header = ImageHeader::from_bytes(&frames[1].1).unwrap();
        assert_eq!(header.image_size, 1000);
        assert_eq!(header.image_checksum, checksum(&image));
        let body: Vec<u8> = frames[2..6]
            .iter()
            .flat_map(|(frame_type, payload)| {
                assert_eq!(*frame_type, FrameType::Data);
                payload.clone()
            })
            .collect();
        assert_eq!(body, image);
        assert_eq!(frames[6], (FrameType::Command, vec![Opcode::End as u8]));
    }

    #[test]
    fn stops_at_first_nack() {
        let image = [0x42u8; 64];
        let replies = [ResponseCode::Ack, ResponseCode::Ack, ResponseCode::Nack];
        let mut uploader = Uploader::new(Device::answering(&replies), TIMEOUTS);
        assert!(matches!(
            uploader.upload(&image, 16),
            Err(UploadError::Nack(FrameType::Data))
        ));
        assert_eq!(uploader.into_inner().frames().len(), 3);
    }

    #[test]
    fn silent_device_times_out() {
        let mut uploader = Uploader::new(Device::default(), TIMEOUTS);
        assert!(matches!(
            uploader.upload(&[1, 2, 3], 16),
            Err(UploadError::Response {
                frame: FrameType::Command,
                source: FrameError::Timeout { idle: true }
            })
        ));
    }

    #[test]
    fn rejects_bad_chunk_size() {
        let mut uploader = Uploader::new(Device::default(), TIMEOUTS);
        assert!(matches!(uploader.upload(&[0; 8], 0), Err(UploadError::ChunkSize { .. })));
        assert!(matches!(
            uploader.upload(&[0; 8], MAX_PAYLOAD_SIZE + 1),
            Err(UploadError::ChunkSize { .. })
        ));
        assert!(uploader.into_inner().sent.is_empty());
    }

    #[test]
    fn abort_accepts_nack() {
        let mut uploader = Uploader::new(Device::answering(&[ResponseCode::Nack]), TIMEOUTS);
        uploader.abort().unwrap();
        assert_eq!(
            uploader.into_inner().frames(),
            vec![(FrameType::Command, vec![Opcode::Abort as u8])]
        );
    }
}
