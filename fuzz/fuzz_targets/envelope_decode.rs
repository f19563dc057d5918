//! Fuzz target for inbound message decoding
//!
//! Tests the JSON envelope parser and the join handshake with arbitrary bytes
//! to find:
//! - Parser crashes or panics
//! - Messages that decode without a string `type`
//! - Reserved lifecycle types that slip through inbound validation
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::{is_reserved, Envelope, JoinRequest};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        assert!(envelope.get_str("type").is_some());

        // Re-encoding a decoded envelope must succeed and decode again
        let encoded = envelope.encode().expect("decoded envelope must encode");
        let again = Envelope::decode(&encoded).expect("encoded envelope must decode");
        assert_eq!(again.message_type(), envelope.message_type());
    }

    if let Ok(envelope) = Envelope::decode_inbound(data) {
        assert!(!is_reserved(envelope.message_type()));
    }

    if let Ok(join) = JoinRequest::decode(data) {
        assert!(!join.room_id.trim().is_empty());
        assert!(!join.user_id.trim().is_empty());
    }
});
