//! Per-call provider overrides
//!
//! An [`Overrides`] map substitutes providers by identity for one
//! resolution call, typically to mock a dependency in tests. The map is
//! supplied fresh per call and never stored on the cached plan, so
//! substitutions cannot leak between unrelated resolutions.

use crate::injectable::{Provider, ProviderId};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

/// Call-scoped mapping from original provider identity to substitute.
///
/// The substitute's own signature is resolved through the same machinery as
/// the original, so an override may itself have dependencies.
///
/// # Examples
///
/// ```rust
/// use context_injector::{value_provider, Overrides, Provider};
///
/// let real = value_provider("token", || "live-token".to_string());
/// let mut overrides = Overrides::new();
/// overrides.insert(&real, value_provider("token", || "test-token".to_string()));
///
/// assert!(overrides.contains(real.id()));
/// ```
#[derive(Clone, Default)]
pub struct Overrides {
    map: HashMap<ProviderId, Arc<dyn Provider>, RandomState>,
}

impl Overrides {
    /// Create an empty override set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitute `original` with another provider for this call.
    pub fn insert(&mut self, original: &Arc<dyn Provider>, substitute: Arc<dyn Provider>) {
        self.map.insert(original.id(), substitute);
    }

    /// Look up a substitute by original identity.
    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn Provider>> {
        self.map.get(&id)
    }

    /// Whether an override is registered for the identity.
    pub fn contains(&self, id: ProviderId) -> bool {
        self.map.contains_key(&id)
    }

    /// Number of registered overrides.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Overrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overrides")
            .field("count", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectable::value_provider;

    #[test]
    fn test_insert_and_lookup() {
        let real = value_provider("db", || 1u8);
        let fake = value_provider("db", || 2u8);

        let mut overrides = Overrides::new();
        assert!(overrides.is_empty());

        overrides.insert(&real, fake.clone());
        assert_eq!(overrides.len(), 1);
        assert!(overrides.contains(real.id()));
        assert!(!overrides.contains(fake.id()));

        let got = overrides.get(real.id()).unwrap();
        assert_eq!(got.id(), fake.id());
    }
}
