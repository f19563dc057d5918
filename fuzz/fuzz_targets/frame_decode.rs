//! Fuzz target for FrameCodec::decode
//!
//! Feeds arbitrary bytes to the streaming decoder in arbitrary chunk sizes to
//! find:
//! - Parser crashes or panics
//! - Length prefixes that bypass the size limit
//! - Buffer over-reads on partial frames
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use parley_proto::{FrameCodec, LENGTH_PREFIX_SIZE};

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, rest)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);
    let codec = FrameCodec::new(4096);

    let mut buf = BytesMut::new();
    let mut consumed = 0;
    for piece in rest.chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(payload)) => {
                    assert!(payload.len() <= codec.max_payload());
                    consumed += LENGTH_PREFIX_SIZE + payload.len();
                },
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }

    // Whatever was not consumed is still buffered
    assert_eq!(consumed + buf.len(), rest.len());

    let _ = codec.decode_exact(rest);
});
