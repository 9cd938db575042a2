//! Length-prefixed MessagePack codec for room frames.
//!
//! Layout of an encoded frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | u32 BE length  | MessagePack frame (named) |
//! +----------------+---------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame to bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Append an encoded frame to `buf`.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(frame)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);
    Ok(())
}

/// Read the length prefix, returning the total encoded size.
fn framed_len(data: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let Some(prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
        return Ok(None);
    };
    let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(Some(LENGTH_PREFIX_SIZE + length))
}

/// Decode exactly one frame from `data`.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let total = framed_len(data)?
        .ok_or_else(|| ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()))?;
    if data.len() < total {
        return Err(ProtocolError::Incomplete(total - data.len()));
    }
    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total])?)
}

/// Try to decode a frame from a streaming buffer, advancing it on success.
///
/// Returns `Ok(None)` if more data is needed.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    let Some(total) = framed_len(&buf[..])? else {
        return Ok(None);
    };
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(total - LENGTH_PREFIX_SIZE);
    Ok(Some(rmp_serde::from_slice(&body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ParticipantId;
    use crate::signal::{IceCandidate, Signal};
    use crate::version::PROTOCOL_VERSION;

    #[test]
    fn test_room_frames_survive_encoding() {
        let frames = vec![
            Frame::connect(PROTOCOL_VERSION),
            Frame::connected("conn-1", PROTOCOL_VERSION, 30_000),
            Frame::join(1, "video-room-1", ParticipantId::from("alice")),
            Frame::track(2, "video-room-1", Some(serde_json::json!({"lang": "ko"}))),
            Frame::presence(
                "video-room-1",
                vec![ParticipantId::from("alice"), ParticipantId::from("bob")],
            ),
            Frame::signal(
                "video-room-1",
                &Signal::IceCandidate(IceCandidate::new("candidate:0").with_media("0", 0)),
            )
            .unwrap(),
            Frame::error(3, 1002, "Room is full"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            assert_eq!(decode(&encoded).unwrap(), frame);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::leave(1, "video-room-1")).unwrap();

        assert!(matches!(decode(&encoded[..2]), Err(ProtocolError::Incomplete(2))));
        match decode(&encoded[..5]) {
            Err(ProtocolError::Incomplete(n)) => assert_eq!(n, encoded.len() - 5),
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_prefix_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            decode_from(&mut buf),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_streaming_decode_waits_for_full_frame() {
        let first = Frame::join(1, "video-a", ParticipantId::from("p1"));
        let second = Frame::ping(Some(99));

        let mut whole = BytesMut::new();
        encode_into(&first, &mut whole).unwrap();
        encode_into(&second, &mut whole).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&whole[..3]);
        assert!(decode_from(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&whole[3..]);
        assert_eq!(decode_from(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(second));
        assert!(buf.is_empty());
    }
}
