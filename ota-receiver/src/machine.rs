// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Update protocol state machine.
//!
//! ```text
//! Idle --Start--> AwaitHeader --Header--> Receiving --Data..--> AwaitEnd --End--> Idle
//! ```
//!
//! Abort is honoured in every state. Anything else out of order ends the session.

use embedded_storage::nor_flash::NorFlash;
use ota_protocol::{Frame, ImageHeader, Opcode, Packet};

use crate::sequencer::{FlashSequencer, ImageRecord};
use crate::{IntegrityValidator, ProtocolError, SessionError};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateState {
    /// No session; only Start is accepted
    #[default]
    Idle,
    /// Start accepted, waiting for the image header
    AwaitHeader,
    /// Size and checksum known, taking Data frames
    Receiving,
    /// Whole image written, waiting for End
    AwaitEnd,
}

/// Mutable state of one update attempt.
#[derive(Debug, Default)]
pub struct Session {
    pub state: UpdateState,
    pub declared_size: u32,
    pub declared_checksum: u32,
    pub bytes_written: u32,
    /// Running checksum over the programmed bytes
    pub validator: IntegrityValidator,
}

/// What a completed update left on storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateReport {
    pub image_size: u32,
    pub image_checksum: u32,
}

/// Result of feeding one frame to the machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Frame accepted, session continues
    Continue,
    /// End accepted, the image is sealed
    Completed(UpdateReport),
}

pub struct UpdateMachine<F: NorFlash> {
    session: Session,
    sequencer: FlashSequencer<F>,
    verify_readback: bool,
}

impl<F: NorFlash> UpdateMachine<F> {
    pub fn new(sequencer: FlashSequencer<F>, verify_readback: bool) -> Self {
        Self {
            session: Session::default(),
            sequencer,
            verify_readback,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sequencer(&mut self) -> &mut FlashSequencer<F> {
        &mut self.sequencer
    }

    pub fn into_sequencer(self) -> FlashSequencer<F> {
        self.sequencer
    }

    /// Process one decoded frame. Any error leaves the machine back in `Idle`.
    pub fn handle(&mut self, frame: &Frame<'_>) -> Result<Step, SessionError> {
        let result = self.dispatch(frame);
        if let Err(err) = &result {
            warn!("Session terminated in {:?}: {:?}", self.session.state, err);
            self.terminate();
        }
        result
    }

    /// Drop the session. Nothing already on flash is undone, but no record is sealed.
    pub fn terminate(&mut self) {
        self.session = Session::default();
        self.sequencer.reset();
    }

    fn dispatch(&mut self, frame: &Frame<'_>) -> Result<Step, SessionError> {
        let packet = Packet::parse(frame)?;

        if packet == Packet::Command(Opcode::Abort) {
            info!("Abort requested in {:?}", self.session.state);
            return Err(SessionError::Aborted);
        }

        match (self.session.state, packet) {
            (UpdateState::Idle, Packet::Command(Opcode::Start)) => self.start(),
            (UpdateState::AwaitHeader, Packet::Header(header)) => self.accept_header(header),
            (UpdateState::Receiving, Packet::Data(chunk)) => self.accept_chunk(chunk),
            (UpdateState::AwaitEnd, Packet::Command(Opcode::End)) => self.complete(),
            (UpdateState::Receiving, Packet::Command(Opcode::End)) => Err(ProtocolError::Incomplete {
                staged: self.sequencer.staged(),
                declared: self.session.declared_size,
            }
            .into()),
            (UpdateState::AwaitEnd, Packet::Data(chunk)) => Err(ProtocolError::Overrun {
                len: chunk.len(),
                staged: self.sequencer.staged(),
                declared: self.session.declared_size,
            }
            .into()),
            (state, packet) => Err(ProtocolError::Unexpected {
                state,
                frame: packet.frame_type(),
            }
            .into()),
        }
    }

    fn start(&mut self) -> Result<Step, SessionError> {
        info!("Starting OTA");
        self.terminate();
        self.session.state = UpdateState::AwaitHeader;
        Ok(Step::Continue)
    }

    fn accept_header(&mut self, header: ImageHeader) -> Result<Step, SessionError> {
        let max = self.sequencer.region().max_image_size();
        if header.image_size == 0 {
            return Err(ProtocolError::EmptyImage.into());
        }
        if header.image_size > max {
            return Err(ProtocolError::ImageTooLarge {
                size: header.image_size,
                max,
            }
            .into());
        }

        info!(
            "Received OTA header: size {} crc {:#x}",
            header.image_size,
            header.image_checksum
        );
        self.session.declared_size = header.image_size;
        self.session.declared_checksum = header.image_checksum;
        self.session.validator.reset();
        self.session.state = UpdateState::Receiving;
        Ok(Step::Continue)
    }

    fn accept_chunk(&mut self, chunk: &[u8]) -> Result<Step, SessionError> {
        let declared = self.session.declared_size;
        let staged = self.sequencer.staged();
        if chunk.len() as u64 + u64::from(staged) > u64::from(declared) {
            return Err(ProtocolError::Overrun {
                len: chunk.len(),
                staged,
                declared,
            }
            .into());
        }

        let validator = &mut self.session.validator;
        let committed = self.sequencer.commit(chunk, staged == 0, |bytes| validator.update(bytes));
        self.session.bytes_written = self.sequencer.bytes_written();
        committed?;

        if self.sequencer.staged() == declared {
            let validator = &mut self.session.validator;
            let flushed = self.sequencer.finish(|bytes| validator.update(bytes));
            self.session.bytes_written = self.sequencer.bytes_written();
            flushed?;
            self.session.state = UpdateState::AwaitEnd;
        }

        info!("[{}/{}]", self.session.bytes_written, declared);
        Ok(Step::Continue)
    }

    fn complete(&mut self) -> Result<Step, SessionError> {
        let image_size = self.session.bytes_written;
        let image_checksum = self.session.validator.verify(self.session.declared_checksum)?;

        if self.verify_readback {
            let stored = self.sequencer.readback_checksum(image_size)?;
            if stored != image_checksum {
                return Err(crate::FlashError::Verify {
                    expected: image_checksum,
                    actual: stored,
                }
                .into());
            }
        }

        self.sequencer.seal(&ImageRecord {
            image_size,
            image_checksum,
        })?;
        info!("Received OTA End, image committed");

        self.terminate();
        Ok(Step::Completed(UpdateReport {
            image_size,
            image_checksum,
        }))
    }
}
