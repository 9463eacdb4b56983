// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::time::Duration;

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::{encode_response, FrameDecoder, FrameError, ResponseCode, Transport};

use crate::config::{ReceiverConfig, RegionError};
use crate::machine::{Step, UpdateMachine, UpdateReport, UpdateState};
use crate::sequencer::FlashSequencer;
use crate::SessionError;

/// Outer receive loop of one update session.
///
/// Owns the transport, the receive buffer and the state machine (and through it the flash)
/// for as long as the session lasts.
pub struct SessionDriver<T: Transport, F: NorFlash> {
    transport: T,
    decoder: FrameDecoder,
    machine: UpdateMachine<F>,
    timeout: Duration,
}

impl<T: Transport, F: NorFlash> SessionDriver<T, F> {
    pub fn new(transport: T, flash: F, config: ReceiverConfig) -> Result<Self, RegionError> {
        let sequencer = FlashSequencer::new(flash, config.region)?;
        Ok(Self {
            transport,
            decoder: FrameDecoder::new().verify_checksum(config.verify_frame_checksum),
            machine: UpdateMachine::new(sequencer, config.verify_readback),
            timeout: config.timeout,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.machine.state()
    }

    pub fn machine(&mut self) -> &mut UpdateMachine<F> {
        &mut self.machine
    }

    pub fn into_parts(self) -> (T, F) {
        (self.transport, self.machine.into_sequencer().into_inner())
    }

    /// Run one session to its end.
    ///
    /// Every frame is answered with an Ack, or with a Nack that ends the session. Returns
    /// once End has committed the image or on the first error. Timing out before the first
    /// byte of the session arrived ends it silently. A malformed frame is drained from the
    /// link before the Nack goes out.
    pub fn run(&mut self) -> Result<UpdateReport, SessionError> {
        info!("Waiting for OTA data");
        loop {
            let step = match self.decoder.decode(&mut self.transport, self.timeout) {
                Ok(frame) => {
                    debug!("Frame {:?} with {} payload bytes", frame.frame_type, frame.length());
                    self.machine.handle(&frame)
                }
                Err(err) => {
                    let resync = !matches!(err, FrameError::Timeout { .. } | FrameError::Transport);
                    let err = SessionError::from(err);
                    if err.is_idle_timeout() && self.machine.state() == UpdateState::Idle {
                        return Err(err);
                    }
                    warn!("Frame decode failed: {:?}", err);
                    self.machine.terminate();
                    if resync {
                        self.discard_input();
                    }
                    Err(err)
                }
            };

            match step {
                Ok(step) => {
                    debug!("Sending ACK");
                    self.respond(ResponseCode::Ack)?;
                    if let Step::Completed(report) = step {
                        return Ok(report);
                    }
                }
                Err(err) => {
                    debug!("Sending NACK");
                    // the session is over either way; report what ended it, not the failed send
                    let _ = self.respond(ResponseCode::Nack);
                    return Err(err);
                }
            }
        }
    }

    // Drop what is left of a rejected frame so the next session starts on a frame boundary.
    // Returns once the link has been quiet for one timeout.
    fn discard_input(&mut self) {
        let mut byte = [0u8; 1];
        let mut dropped = 0usize;
        while self.transport.read_exact(&mut byte, self.timeout).is_ok() {
            dropped += 1;
        }
        debug!("Discarded {} bytes after the rejected frame", dropped);
    }

    fn respond(&mut self, code: ResponseCode) -> Result<(), SessionError> {
        self.transport
            .write_all(&encode_response(code))
            .map_err(SessionError::Transport)
    }
}
