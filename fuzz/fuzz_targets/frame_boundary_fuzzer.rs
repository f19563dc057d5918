//! Fuzz target for length prefix boundary conditions
//!
//! Prevent oversized allocations via malformed length prefixes.
//!
//! # Strategy
//!
//! - Payload size: zero, small, at-max, just-over-max, way-over-max, u32::MAX
//! - Codec limit: zero, small, default, u32::MAX
//! - Trailing bytes: none, some
//!
//! # Invariants
//!
//! - An announced length over the limit MUST return `FrameTooLarge`
//! - A frame within the limit MUST decode to exactly its payload
//! - `decode_exact` MUST reject trailing or missing bytes
//! - All decode errors MUST be structured (never panic)

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_proto::{FrameCodec, ProtocolError, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
enum Limit {
    Zero,
    Small(u16),
    Default,
    MaxU32,
}

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    limit: Limit,
    announced: PayloadSize,
    fill: u8,
    trailing: Vec<u8>,
}

fuzz_target!(|frame: BoundaryFrame| {
    let max = match frame.limit {
        Limit::Zero => 0,
        Limit::Small(n) => usize::from(n),
        Limit::Default => DEFAULT_MAX_FRAME_SIZE,
        Limit::MaxU32 => u32::MAX as usize,
    };
    let codec = FrameCodec::new(max);
    let max = codec.max_payload() as u32;

    let announced = match frame.announced {
        PayloadSize::Zero => 0,
        PayloadSize::Small(n) => u32::from(n),
        PayloadSize::AtMax => max,
        PayloadSize::JustOverMax => max.saturating_add(1),
        PayloadSize::WayOverMax => max.saturating_mul(2),
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(n) => n,
    };

    let prefix = announced.to_be_bytes();
    match codec.payload_len(prefix) {
        Ok(len) => assert!(len <= codec.max_payload()),
        Err(err) => {
            assert!(announced > max);
            assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
            return;
        },
    }

    // Only materialize payloads small enough to keep the run fast
    if announced > 64 * 1024 {
        return;
    }

    let mut bytes = prefix.to_vec();
    bytes.resize(LENGTH_PREFIX_SIZE + announced as usize, frame.fill);

    let payload = codec.decode_exact(&bytes).expect("frame within limit must decode");
    assert_eq!(payload.len(), announced as usize);

    bytes.extend_from_slice(&frame.trailing);
    let result = codec.decode_exact(&bytes);
    assert_eq!(result.is_ok(), frame.trailing.is_empty());

    if announced > 0 {
        let truncated = codec.decode_exact(&bytes[..LENGTH_PREFIX_SIZE + announced as usize - 1]);
        assert!(matches!(truncated, Err(ProtocolError::Truncated { .. })));
    }
});
