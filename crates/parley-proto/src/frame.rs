//! Length-prefixed framing for stream transports.
//!
//! Layout on the wire:
//! `[length: u32, big endian] + [payload: length bytes of UTF-8 JSON]`
//!
//! The codec only checks sizes. It never looks inside the payload; that is
//! [`crate::Envelope`]'s job.
//!
//! # Invariants
//!
//! - Encoding and decoding both reject payloads above `max_payload`, so a
//!   peer cannot make the relay allocate more than the limit for one frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 20;

/// Length-prefixed frame encoder/decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec with the given payload limit.
    ///
    /// The limit is clamped to `u32::MAX`, the largest length the prefix can
    /// express.
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload: max_payload.min(u32::MAX as usize) }
    }

    /// Largest payload this codec accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Append one frame carrying `payload` to `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `payload` exceeds the limit
    pub fn encode(&self, payload: &[u8], dst: &mut impl BufMut) -> Result<()> {
        self.check_size(payload.len())?;

        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn encode_to_bytes(&self, payload: &[u8]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        self.encode(payload, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Validate a length prefix and return the payload length it announces.
    ///
    /// Transports that read the prefix and payload separately call this
    /// before allocating the payload buffer.
    pub fn payload_len(&self, prefix: [u8; LENGTH_PREFIX_SIZE]) -> Result<usize> {
        let len = u32::from_be_bytes(prefix) as usize;
        self.check_size(len)?;
        Ok(len)
    }

    /// Pull one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are
    /// needed.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let len = self.payload_len(prefix)?;

        if src.len() < LENGTH_PREFIX_SIZE + len {
            src.reserve(LENGTH_PREFIX_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(src.split_to(len).freeze()))
    }

    /// Decode a slice that must contain exactly one frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if the slice is shorter than the frame
    /// - `ProtocolError::FrameTooLarge` if the prefix exceeds the limit or the
    ///   slice has trailing bytes
    pub fn decode_exact(&self, src: &[u8]) -> Result<Bytes> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Err(ProtocolError::Truncated {
                expected: LENGTH_PREFIX_SIZE,
                actual: src.len(),
            });
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let len = self.payload_len(prefix)?;
        let expected = LENGTH_PREFIX_SIZE + len;

        if src.len() < expected {
            return Err(ProtocolError::Truncated { expected, actual: src.len() });
        }
        if src.len() > expected {
            return Err(ProtocolError::FrameTooLarge { size: src.len(), max: expected });
        }

        Ok(Bytes::copy_from_slice(&src[LENGTH_PREFIX_SIZE..]))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_payload {
            return Err(ProtocolError::FrameTooLarge { size, max: self.max_payload });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_writes_big_endian_prefix() {
        let codec = FrameCodec::default();
        let bytes = codec.encode_to_bytes(b"{}").unwrap();
        assert_eq!(&bytes[..], &[0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let codec = FrameCodec::default();
        let frame = codec.encode_to_bytes(br#"{"type":"offer"}"#).unwrap();

        let mut buf = BytesMut::from(&frame[..3]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&frame[3..10]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&frame[10..]);
        let payload = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], br#"{"type":"offer"}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_splits_back_to_back_frames() {
        let codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(b"one", &mut buf).unwrap();
        codec.encode(b"two", &mut buf).unwrap();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_frames_rejected_both_ways() {
        let codec = FrameCodec::new(8);

        let mut buf = BytesMut::new();
        assert_eq!(
            codec.encode(&[0u8; 9], &mut buf),
            Err(ProtocolError::FrameTooLarge { size: 9, max: 8 })
        );

        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert_eq!(codec.decode(&mut buf), Err(ProtocolError::FrameTooLarge { size: 256, max: 8 }));
    }

    #[test]
    fn decode_exact_reports_truncation() {
        let codec = FrameCodec::default();
        assert_eq!(
            codec.decode_exact(&[0, 0]),
            Err(ProtocolError::Truncated { expected: 4, actual: 2 })
        );
        assert_eq!(
            codec.decode_exact(&[0, 0, 0, 5, b'a']),
            Err(ProtocolError::Truncated { expected: 9, actual: 5 })
        );
    }
}
