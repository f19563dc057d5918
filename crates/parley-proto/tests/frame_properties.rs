//! Property-based tests for length-prefixed framing
//!
//! Streams are read in arbitrary chunks, so these tests feed encoded frames
//! to the decoder split at every kind of boundary and check that the payloads
//! come back intact and in order.

use bytes::BytesMut;
use parley_proto::{FrameCodec, LENGTH_PREFIX_SIZE, ProtocolError};
use proptest::prelude::*;

/// Strategy for payload batches
fn payloads() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: frames decode to the same payloads regardless of chunking
    #[test]
    fn prop_chunked_stream_yields_original_payloads(
        batch in payloads(),
        chunk in 1usize..64,
    ) {
        let codec = FrameCodec::default();
        let mut wire = BytesMut::new();
        for payload in &batch {
            codec.encode(payload, &mut wire)?;
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(payload) = codec.decode(&mut buf)? {
                decoded.push(payload.to_vec());
            }
        }

        prop_assert_eq!(decoded, batch);
        prop_assert!(buf.is_empty());
    }

    /// Property: encoded size is always prefix plus payload
    #[test]
    fn prop_encoded_length_is_prefix_plus_payload(
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let codec = FrameCodec::default();
        let bytes = codec.encode_to_bytes(&payload)?;
        prop_assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + payload.len());
        prop_assert_eq!(&codec.decode_exact(&bytes)?[..], &payload[..]);
    }

    /// Property: the limit is inclusive, one byte over is rejected
    #[test]
    fn prop_limit_boundary(max in 0usize..512) {
        let codec = FrameCodec::new(max);

        let at_limit = vec![b'x'; max];
        prop_assert!(codec.encode_to_bytes(&at_limit).is_ok());

        let over = vec![b'x'; max + 1];
        prop_assert_eq!(
            codec.encode_to_bytes(&over),
            Err(ProtocolError::FrameTooLarge { size: max + 1, max })
        );
    }

    /// Property: an oversized prefix is rejected before any payload arrives
    #[test]
    fn prop_oversized_prefix_rejected_early(max in 0usize..1024, extra in 1u32..1024) {
        let codec = FrameCodec::new(max);
        let claimed = max as u32 + extra;

        let mut buf = BytesMut::from(&claimed.to_be_bytes()[..]);
        prop_assert_eq!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: claimed as usize, max })
        );
    }

    /// Property: any strict prefix of a frame is incomplete, never an error
    #[test]
    fn prop_partial_frame_is_pending(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        cut in any::<prop::sample::Index>(),
    ) {
        let codec = FrameCodec::default();
        let frame = codec.encode_to_bytes(&payload)?;
        let cut = cut.index(frame.len());

        let mut buf = BytesMut::from(&frame[..cut]);
        prop_assert_eq!(codec.decode(&mut buf)?, None);
        prop_assert_eq!(buf.len(), cut);
    }
}
