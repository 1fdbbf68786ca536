//! Runtime context: the per-invocation key-value store
//!
//! A [`RuntimeContext`] supplies concrete argument values for one resolution
//! pass. Entries are keyed either by name or by type, and the context is
//! treated as read-only while a plan executes against it.

use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Type-erased resolved value shared between the context, providers, and the
/// bound call.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Downcast an `Arc<dyn Any + Send + Sync>` to `Arc<T>` without runtime type
/// checking.
///
/// # Safety
///
/// Safe only when the `Arc` was originally created from a value of type `T`.
/// In this crate that is guaranteed where the lookup key was
/// `TypeId::of::<T>()` and insertion used the same key.
#[inline]
pub(crate) unsafe fn downcast_arc_unchecked<T: Send + Sync + 'static>(arc: Value) -> Arc<T> {
    let ptr = Arc::into_raw(arc);
    // SAFETY: ptr came from Arc::into_raw and the caller guarantees T is correct
    unsafe { Arc::from_raw(ptr as *const T) }
}

/// Per-invocation key-value store supplying concrete argument values.
///
/// Keys are names (for [`NamedContext`](crate::Injectable::NamedContext)
/// lookups) or types (for [`TypedContext`](crate::Injectable::TypedContext)
/// and model-field lookups). Values are arbitrary `Send + Sync + 'static`
/// data.
///
/// Uses `DashMap` with `ahash` so a context built on one thread can be read
/// from a resolution running elsewhere without locking.
///
/// # Examples
///
/// ```rust
/// use context_injector::RuntimeContext;
///
/// #[derive(Clone)]
/// struct Config { debug: bool }
///
/// let ctx = RuntimeContext::new();
/// ctx.insert_named("user", "alice".to_string());
/// ctx.insert_typed(Config { debug: true });
///
/// assert!(ctx.contains_name("user"));
/// assert!(ctx.by_type::<Config>().is_some());
/// ```
pub struct RuntimeContext {
    by_name: DashMap<String, Value, RandomState>,
    by_type: DashMap<TypeId, Value, RandomState>,
}

impl RuntimeContext {
    /// Create a new empty context.
    #[inline]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::with_hasher(RandomState::new()),
            by_type: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Create a context with pre-allocated capacity for both key spaces.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_name: DashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            by_type: DashMap::with_capacity_and_hasher(capacity, RandomState::new()),
        }
    }

    /// Insert a value keyed by argument name.
    #[inline]
    pub fn insert_named<T: Send + Sync + 'static>(&self, name: impl Into<String>, value: T) {
        self.by_name.insert(name.into(), Arc::new(value) as Value);
    }

    /// Insert a value keyed by its type.
    ///
    /// Replaces any previous entry of the same type.
    #[inline]
    pub fn insert_typed<T: Send + Sync + 'static>(&self, value: T) {
        self.by_type
            .insert(TypeId::of::<T>(), Arc::new(value) as Value);
    }

    /// Insert an already type-erased value keyed by name.
    #[inline]
    pub fn insert_value(&self, name: impl Into<String>, value: Value) {
        self.by_name.insert(name.into(), value);
    }

    /// Look up a value by name.
    #[inline]
    pub fn by_name(&self, name: &str) -> Option<Value> {
        self.by_name.get(name).map(|v| v.value().clone())
    }

    /// Look up a value by raw `TypeId`.
    #[inline]
    pub fn by_type_id(&self, type_id: &TypeId) -> Option<Value> {
        self.by_type.get(type_id).map(|v| v.value().clone())
    }

    /// Look up a value by type, downcast to `Arc<T>`.
    #[inline]
    pub fn by_type<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.by_type_id(&TypeId::of::<T>()).map(|any| {
            // SAFETY: the entry was inserted under TypeId::of::<T>(), so the
            // Arc contains a value of type T.
            unsafe { downcast_arc_unchecked(any) }
        })
    }

    /// Check whether a name key is present.
    #[inline]
    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Check whether a type key is present.
    #[inline]
    pub fn contains_type<T: Send + Sync + 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Total number of entries across both key spaces.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_name.len() + self.by_type.len()
    }

    /// Check if the context holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_type.is_empty()
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("named", &self.by_name.len())
            .field("typed", &self.by_type.len())
            .finish()
    }
}
