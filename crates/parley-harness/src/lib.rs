//! Deterministic test tooling for the Parley relay.
//!
//! In-memory implementations of the transport seam and the environment, so
//! relay behaviour can be exercised without sockets or wall-clock time.
//!
//! # Simulated peers
//!
//! [`SimPeer`] plays a client: it is accepted by a [`parley_core::Relay`],
//! runs the relay's read loop over a scripted [`SimReader`], and records
//! everything the relay sends it in a [`SimChannel`]. Channels can be told to
//! fail or stall to exercise teardown paths.
//!
//! # Invariant testing
//!
//! The `invariants` module checks registry snapshots against the relay's
//! data-model invariants. Use [`InvariantRegistry::standard()`] at quiescent
//! points.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_channel;
pub mod sim_env;

pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, MembersAreActive, PresenceMatchesActive,
    RoomsNonEmpty, SingleActivePerIdentity, Violation,
};
pub use sim_channel::{SimChannel, SimPeer, SimReader, eventually};
pub use sim_env::{DEFAULT_EPOCH_SECS, SimEnv};
