//! Invariant checking over registry snapshots.
//!
//! Invariants are properties that must hold whenever no teardown is in
//! flight. Tests take a [`RegistrySnapshot`] at such a point and run every
//! registered [`Invariant`] against it.
//!
//! # Usage
//!
//! ```ignore
//! let invariants = InvariantRegistry::standard();
//! invariants.assert_all(&relay.registry().snapshot(), "after reconnect");
//! ```

mod checks;

pub use checks::{MembersAreActive, PresenceMatchesActive, RoomsNonEmpty, SingleActivePerIdentity};
use parley_core::RegistrySnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property of the registry that must hold at quiescent points.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &RegistrySnapshot) -> InvariantResult;
}

/// Collection of invariants checked together.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the relay's data-model invariants.
    ///
    /// Includes:
    /// - [`RoomsNonEmpty`]: every listed room has a connection
    /// - [`SingleActivePerIdentity`]: one active connection per identity
    /// - [`PresenceMatchesActive`]: presence is exactly the active identities
    /// - [`MembersAreActive`]: no draining or closed connection lingers
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(RoomsNonEmpty);
        registry.add(SingleActivePerIdentity);
        registry.add(PresenceMatchesActive);
        registry.add(MembersAreActive);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &RegistrySnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &RegistrySnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        let registry = InvariantRegistry::standard();
        assert!(registry.check_all(&RegistrySnapshot::default()).is_ok());
    }
}
