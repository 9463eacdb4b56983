// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    self::mock::{config, image, Link, MockFlash, REGION},
    crate::{ErrorKind, ImageRecord, ReceiverConfig, SessionDriver, SessionError, UpdateReport, UpdateState},
    ota_protocol::{checksum, encode, FrameError, FrameType, Opcode, ResponseCode, FRAME_OVERHEAD},
};


use ResponseCode::{Ack, Nack};

fn driver(link: Link) -> SessionDriver<Link, MockFlash<4>> {
    SessionDriver::new(link, MockFlash::new(), config()).unwrap()
}

/// Start, a 1024 byte header, four 256 byte chunks and End are each acknowledged.
#[test]
fn full_update() {
    let bytes = image(1024);
    let mut link = Link::new();
    link.push_update(&bytes, 256);

    let mut driver = driver(link);
    let report = driver.run().unwrap();
    assert_eq!(
        report,
        UpdateReport {
            image_size: 1024,
            image_checksum: checksum(&bytes)
        }
    );
    assert_eq!(driver.state(), UpdateState::Idle);

    let (link, flash) = driver.into_parts();
    assert_eq!(link.responses(), vec![Ack; 7]);
    assert_eq!(link.pending(), 0);
    assert_eq!(flash.erases, vec![(REGION.offset(), REGION.end())]);
    assert_eq!(flash.window(REGION.offset(), 1024), &bytes[..]);
    assert_eq!(
        ImageRecord::from_bytes(flash.window(REGION.record_offset(), ImageRecord::SIZE).try_into().unwrap()),
        Some(ImageRecord {
            image_size: 1024,
            image_checksum: checksum(&bytes)
        })
    );
}

/// An image whose CRC does not match the header is answered with a Nack at End.
#[test]
fn checksum_mismatch_nacks_end() {
    let bytes = image(1024);
    let mut link = Link::new();
    link.push_command(Opcode::Start).push_header(1024, 0xDEADBEEF);
    for part in bytes.chunks(256) {
        link.push_data(part);
    }
    link.push_command(Opcode::End);

    let mut driver = driver(link);
    let err = driver.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Integrity);
    assert_eq!(driver.state(), UpdateState::Idle);
    assert_eq!(driver.machine().sequencer().record().unwrap(), None);

    let (link, _) = driver.into_parts();
    let mut expected = vec![Ack; 6];
    expected.push(Nack);
    assert_eq!(link.responses(), expected);
}

#[test]
fn data_before_start_is_rejected() {
    let mut link = Link::new();
    link.push_data(&[1, 2, 3, 4]);

    let mut driver = driver(link);
    assert_eq!(driver.run().unwrap_err().kind(), ErrorKind::Protocol);
    let (link, flash) = driver.into_parts();
    assert_eq!(link.responses(), vec![Nack]);
    assert_eq!(flash.writes, 0);
}

/// Abort mid transfer stops the session; frames after it are left unread.
#[test]
fn abort_mid_transfer() {
    let bytes = image(1024);
    let mut link = Link::new();
    link.push_command(Opcode::Start)
        .push_header(1024, checksum(&bytes))
        .push_data(&bytes[..256])
        .push_data(&bytes[256..512])
        .push_command(Opcode::Abort)
        .push_data(&bytes[512..768]);

    let mut driver = driver(link);
    assert_eq!(driver.run(), Err(SessionError::Aborted));
    assert_eq!(driver.state(), UpdateState::Idle);

    let (link, flash) = driver.into_parts();
    assert_eq!(link.responses(), vec![Ack, Ack, Ack, Ack, Nack]);
    assert_eq!(link.pending(), 256 + FRAME_OVERHEAD);
    assert_eq!(flash.writes, 512 / 4);
    assert_eq!(flash.window(REGION.record_offset(), 16), &[0xFF; 16]);
}

/// A frame without its end marker is refused before its payload reaches flash.
#[test]
fn missing_end_marker() {
    let mut frame = vec![0u8; 256 + FRAME_OVERHEAD];
    let len = encode(FrameType::Data, &image(256), &mut frame).unwrap().len();
    frame[len - 1] = 0x00;

    let mut link = Link::new();
    link.push_command(Opcode::Start).push_header(256, checksum(&image(256))).push_raw(&frame);

    let mut driver = driver(link);
    let err = driver.run().unwrap_err();
    assert_eq!(err, SessionError::Frame(FrameError::EndMarker(0x00)));
    assert_eq!(err.kind(), ErrorKind::Framing);

    let (link, flash) = driver.into_parts();
    assert_eq!(link.responses(), vec![Ack, Ack, Nack]);
    assert!(flash.erases.is_empty());
    assert_eq!(flash.writes, 0);
}

#[test]
fn corrupted_payload_fails_frame_checksum() {
    let mut frame = vec![0u8; 64 + FRAME_OVERHEAD];
    encode(FrameType::Data, &image(64), &mut frame).unwrap();
    frame[10] ^= 0xFF;

    let mut link = Link::new();
    link.push_command(Opcode::Start).push_header(64, checksum(&image(64))).push_raw(&frame);

    let mut driver = driver(link);
    let err = driver.run().unwrap_err();
    assert!(matches!(err, SessionError::Frame(FrameError::Checksum { .. })));
    assert_eq!(err.kind(), ErrorKind::Framing);
    let (_, flash) = driver.into_parts();
    assert_eq!(flash.writes, 0);
}

/// With frame checksums off the image CRC at End still catches the corruption.
#[test]
fn lenient_frames_still_checked_at_end() {
    let bytes = image(64);
    let mut frame = vec![0u8; 64 + FRAME_OVERHEAD];
    encode(FrameType::Data, &bytes, &mut frame).unwrap();
    frame[10] ^= 0xFF;

    let mut link = Link::new();
    link.push_command(Opcode::Start)
        .push_header(64, checksum(&bytes))
        .push_raw(&frame)
        .push_command(Opcode::End);

    let config = ReceiverConfig {
        verify_frame_checksum: false,
        ..config()
    };
    let mut driver = SessionDriver::new(link, MockFlash::<4>::new(), config).unwrap();
    assert_eq!(driver.run().unwrap_err().kind(), ErrorKind::Integrity);
    let (link, _) = driver.into_parts();
    assert_eq!(link.responses(), vec![Ack, Ack, Ack, Nack]);
}

/// A declared length past the receive buffer is rejected without reading the payload.
#[test]
fn oversized_frame_overflows() {
    let mut link = Link::new();
    link.push_command(Opcode::Start).push_raw(&[0xAA, FrameType::Data as u8, 0x07, 0xD0]);

    let mut driver = driver(link);
    let err = driver.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overflow);
    let (link, _) = driver.into_parts();
    assert_eq!(link.responses(), vec![Ack, Nack]);
}

/// The rest of a rejected frame is drained, so the next session starts on a frame boundary.
#[test]
fn next_session_after_overflow() {
    let bytes = image(1024);
    let mut oversized = vec![0xAA, FrameType::Data as u8, 0x07, 0xD0];
    oversized.extend(image(2000));

    let mut link = Link::new();
    link.push_command(Opcode::Start).push_raw(&oversized);
    link.push_update(&bytes, 256);

    let mut driver = driver(link);
    let mut failures = Vec::new();
    let report = loop {
        match driver.run() {
            Ok(report) => break report,
            Err(err) => {
                assert!(!err.is_idle_timeout(), "link ran dry");
                failures.push(err.kind());
            }
        }
    };
    assert_eq!(failures, vec![ErrorKind::Overflow]);
    assert_eq!(report.image_checksum, checksum(&bytes));

    let (link, flash) = driver.into_parts();
    let mut expected = vec![Ack, Nack];
    expected.extend([Ack; 7]);
    assert_eq!(link.responses(), expected);
    assert_eq!(link.pending(), 0);
    assert_eq!(flash.window(REGION.offset(), 1024), &bytes[..]);
}

/// Bytes that trail a malformed frame in the same write are drained with it.
#[test]
fn trailing_bytes_are_drained() {
    let mut garbage = vec![0u8; 1 + FRAME_OVERHEAD + 1];
    encode(FrameType::Command, &[Opcode::Start as u8], &mut garbage[1..]).unwrap();

    let mut link = Link::new();
    link.push_raw(&garbage).push_command(Opcode::Start);

    let mut driver = driver(link);
    assert_eq!(driver.run(), Err(SessionError::Frame(FrameError::StartMarker(0x00))));
    assert_eq!(driver.state(), UpdateState::Idle);

    let (link, _) = driver.into_parts();
    assert_eq!(link.responses(), vec![Nack]);
    assert_eq!(link.pending(), FRAME_OVERHEAD + 1);
}

#[test]
fn garbage_before_frame() {
    let mut link = Link::new();
    link.push_raw(&[0x00]).push_command(Opcode::Start);

    let mut driver = driver(link);
    assert_eq!(driver.run(), Err(SessionError::Frame(FrameError::StartMarker(0x00))));
    let (link, _) = driver.into_parts();
    assert_eq!(link.responses(), vec![Nack]);
}

/// Nobody talking to an idle receiver is not an error worth answering.
#[test]
fn idle_timeout_is_silent() {
    let mut driver = driver(Link::new());
    let err = driver.run().unwrap_err();
    assert!(err.is_idle_timeout());
    assert_eq!(err.kind(), ErrorKind::Timeout);
    let (link, flash) = driver.into_parts();
    assert!(link.output.is_empty());
    assert!(flash.erases.is_empty());
}

/// A host that goes quiet mid session gets a Nack.
#[test]
fn timeout_mid_session_nacks() {
    let mut link = Link::new();
    link.push_command(Opcode::Start).push_header(64, 0).push_data(&image(32));

    let mut driver = driver(link);
    let err = driver.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(driver.state(), UpdateState::Idle);
    let (link, _) = driver.into_parts();
    assert_eq!(link.responses(), vec![Ack, Ack, Ack, Nack]);
}

#[test]
fn truncated_frame_times_out() {
    let mut link = Link::new();
    link.push_raw(&[0xAA, FrameType::Command as u8, 0x00]);

    let mut driver = driver(link);
    assert_eq!(driver.run(), Err(SessionError::Frame(FrameError::Timeout { idle: false })));
    let (link, _) = driver.into_parts();
    assert_eq!(link.responses(), vec![Nack]);
}

#[test]
fn response_write_failure() {
    let mut link = Link::new();
    link.push_command(Opcode::Start);
    link.fail_writes = true;

    let mut driver = driver(link);
    let err = driver.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

/// The same driver serves a second session after a failed one.
#[test]
fn recovers_after_failed_session() {
    let bytes = image(300);
    let mut link = Link::new();
    link.push_command(Opcode::Start).push_command(Opcode::End);
    link.push_update(&bytes, 64);

    let mut driver = driver(link);
    assert_eq!(driver.run().unwrap_err().kind(), ErrorKind::Protocol);
    let report = driver.run().unwrap();
    assert_eq!(report.image_size, 300);
    assert_eq!(driver.machine().sequencer().bootable_image().unwrap().map(|r| r.image_size), Some(300));

    let (link, _) = driver.into_parts();
    let mut expected = vec![Ack, Nack];
    expected.extend([Ack; 8]);
    assert_eq!(link.responses(), expected);
}

#[test]
fn misconfigured_region_is_refused() {
    let config = ReceiverConfig {
        region: crate::StorageRegion::new(0x100, 0x1000),
        ..config()
    };
    assert!(SessionDriver::new(Link::new(), MockFlash::<4>::new(), config).is_err());
}
