//! Tests for OEM frame encoding and decoding

use cavro_core::protocol::{
    checksum, decode, DecodeError, Decoded, Frame, FrameCodec, END_BYTE, MAX_ADDRESS, START_BYTE,
};
use pretty_assertions::assert_eq;

const PAYLOADS: &[&str] = &["?76", "&", "Q", "ZR", "A3000R", "IV1000A0R", ""];

fn decoded(bytes: &[u8]) -> cavro_core::protocol::Response {
    match decode(bytes) {
        Ok(Decoded::Response(resp)) => resp,
        other => panic!("Expected response, got {:?}", other),
    }
}

#[test]
fn test_wire_example_read_configuration() {
    let frame = Frame::encode(0, "?76");
    let bytes = frame.as_bytes();

    assert_eq!(bytes[..7], [0x02, 0x31, 0x31, 0x3F, 0x37, 0x36, 0x03]);
    assert_eq!(bytes[7], checksum(&bytes[..7]));
    assert_eq!(bytes[7], 0x3F);

    let resp = decoded(bytes);
    assert_eq!(resp.data, "?76");
    assert_eq!(resp.address(), Some(0));
}

#[test]
fn test_round_trip_every_address() {
    for address in 0..=MAX_ADDRESS {
        for payload in PAYLOADS {
            let resp = decoded(Frame::encode(address, payload).as_bytes());
            assert_eq!(resp.address(), Some(address));
            assert_eq!(resp.data, *payload);
        }
    }
}

#[test]
fn test_markers_and_checksum_invariant() {
    for payload in PAYLOADS {
        let frame = Frame::encode(7, payload);
        let bytes = frame.as_bytes();
        let last = bytes.len() - 1;
        assert_eq!(bytes[0], START_BYTE);
        assert_eq!(bytes[last - 1], END_BYTE);
        assert_eq!(checksum(&bytes[..last]), bytes[last]);
    }
}

#[test]
fn test_single_bit_flips_are_rejected() {
    for payload in PAYLOADS {
        let original = Frame::encode(1, payload).into_bytes();
        let end = original.len() - 2;

        for pos in 0..original.len() {
            let mut saw_bad_checksum = false;
            for bit in 0..8 {
                let mut corrupted = original.clone();
                corrupted[pos] ^= 1 << bit;
                let result = decode(&corrupted);
                assert!(
                    result.is_err(),
                    "flip of bit {} at {} in {:?} was accepted",
                    bit,
                    pos,
                    payload
                );
                if matches!(result, Err(DecodeError::BadChecksum { .. })) {
                    saw_bad_checksum = true;
                }
            }

            // Flipping a marker destroys the frame boundary instead
            if pos == 0 || pos == end {
                continue;
            }
            assert!(saw_bad_checksum, "no checksum error at position {}", pos);
        }
    }
}

#[test]
fn test_marker_flip_reports_missing_markers() {
    let mut bytes = Frame::encode(0, "?76").into_bytes();
    bytes[0] ^= 0x80;
    assert_eq!(decode(&bytes), Err(DecodeError::MissingMarkers));
}

#[test]
fn test_empty_and_short_inputs() {
    assert_eq!(decode(&[]), Ok(Decoded::NoData));

    let short = decode(&[0x02, 0x03, 0x00]);
    assert!(matches!(
        short,
        Err(DecodeError::MissingMarkers) | Err(DecodeError::BadChecksum { .. })
    ));
    assert_eq!(decode(&[0x02]), Err(DecodeError::Truncated));
}

#[test]
fn test_reply_frame_status() {
    let resp = decoded(Frame::reply(0x4F, "").as_bytes());
    assert!(resp.is_busy());
    assert_eq!(resp.error_code().code(), 15);
    assert_eq!(resp.address(), None);
}

#[test]
fn test_emit_repeat_matches_encode() {
    for payload in PAYLOADS {
        let mut codec = FrameCodec::new(5);
        let encoded = codec.encode(payload).clone();
        let repeated = codec.emit_repeat().expect("frame was encoded");
        assert_eq!(repeated.as_bytes(), encoded.as_bytes());
        assert_eq!(*repeated, Frame::encode(5, payload));
    }
}
