//! The injectable model: resolution variants and the provider contract
//!
//! Every argument of a callable is assigned exactly one [`Injectable`]
//! variant at bootstrap. Variants carry everything the executor needs to
//! produce a value from a runtime context: a name, a type key, a provider,
//! or a model-field accessor, optionally wrapped with constraints.

use crate::constrained::Constraints;
use crate::context::Value;
use crate::error::{BoxError, InjectError, Result};
use crate::resolve::ResolvedArgs;
use crate::signature::{Signature, TypeKey};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Extracts a field from a type-erased model instance.
///
/// Returns `None` when the erased value is not the expected model type.
/// Dotted paths are expressed by chaining inside the closure itself
/// (`|req: &Request| req.user.id.clone()`).
pub type FieldAccessor = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<Value> + Send + Sync>;

/// Unique provider identity.
///
/// Used for override matching, plan-level deduplication, and cycle
/// detection. Every constructed provider gets a fresh id from a process-wide
/// counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(u64);

impl ProviderId {
    /// Allocate the next unique id.
    #[inline]
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider-{}", self.0)
    }
}

/// Result of invoking a provider: either an immediately available value or
/// a future to await.
///
/// Enum dispatch instead of a second trait object keeps the sync path free
/// of boxing and lets the executor partition work without probing.
pub enum Invocation<'a> {
    /// Synchronous provider ran to completion
    Ready(Result<Value>),
    /// Asynchronous provider; settles on its own suspension points
    Future(BoxFuture<'a, Result<Value>>),
}

/// A callable supplying a dependency's value.
///
/// Providers declare their own [`Signature`], which is resolved recursively
/// through the same machinery as the top-level callable. The target callable
/// handed to [`build`](crate::build) is itself just a provider.
pub trait Provider: Send + Sync {
    /// Identity used for overrides, dedup, and cycle detection
    fn id(&self) -> ProviderId;

    /// Human-readable name for diagnostics
    fn name(&self) -> &str;

    /// The provider's own parameter list
    fn signature(&self) -> Signature;

    /// Whether `invoke` returns [`Invocation::Future`]
    fn is_async(&self) -> bool {
        false
    }

    /// Declared return type, used by the signature lint and validation
    fn return_type(&self) -> Option<TypeKey> {
        None
    }

    /// Produce the value from already-resolved arguments
    fn invoke(&self, args: ResolvedArgs) -> Invocation<'_>;
}

/// Closed set of resolution variants assigned to arguments at bootstrap.
///
/// Assignment follows a fixed precedence: explicit marker, then type match,
/// then name match, then declared default, then unresolved.
#[derive(Clone)]
pub enum Injectable {
    /// Value looked up in the runtime context by argument name
    NamedContext { name: String },

    /// Value looked up in the runtime context by declared type
    TypedContext { ty: TypeKey },

    /// Provider invoked (sync or async); its own parameters are resolved
    /// recursively
    Dependency {
        provider: Arc<dyn Provider>,
        priority: Option<u32>,
    },

    /// An instance of `model` is located in the context, then `field` is
    /// read through the accessor
    ModelField {
        model: TypeKey,
        field: String,
        field_ty: Option<TypeKey>,
        accessor: FieldAccessor,
    },

    /// Wraps any variant; the resolved value passes through validation
    /// before use
    Constrained {
        inner: Box<Injectable>,
        constraints: Constraints,
    },

    /// No satisfying variant; recorded as deferred under non-strict builds
    Unresolved,
}

impl Injectable {
    /// Short variant label for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NamedContext { .. } => "named-context",
            Self::TypedContext { .. } => "typed-context",
            Self::Dependency { .. } => "dependency",
            Self::ModelField { .. } => "model-field",
            Self::Constrained { .. } => "constrained",
            Self::Unresolved => "unresolved",
        }
    }

    /// Whether resolving this variant can suspend
    pub fn is_async(&self) -> bool {
        match self {
            Self::Dependency { provider, .. } => provider.is_async(),
            Self::Constrained { inner, .. } => inner.is_async(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Injectable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NamedContext { name } => f.debug_struct("NamedContext").field("name", name).finish(),
            Self::TypedContext { ty } => f.debug_struct("TypedContext").field("ty", &ty.name()).finish(),
            Self::Dependency { provider, priority } => f
                .debug_struct("Dependency")
                .field("provider", &provider.name())
                .field("priority", priority)
                .finish(),
            Self::ModelField { model, field, .. } => f
                .debug_struct("ModelField")
                .field("model", &model.name())
                .field("field", field)
                .finish(),
            Self::Constrained { inner, .. } => {
                f.debug_struct("Constrained").field("inner", inner).finish()
            }
            Self::Unresolved => f.write_str("Unresolved"),
        }
    }
}

// =============================================================================
// Function-backed providers
// =============================================================================

/// Type-erased synchronous provider body
type SyncCall = Box<dyn Fn(ResolvedArgs) -> Result<Value> + Send + Sync>;

/// Type-erased asynchronous provider body
type AsyncCall = Box<dyn Fn(ResolvedArgs) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

enum ProviderCall {
    Sync(SyncCall),
    Async(AsyncCall),
}

/// Provider backed by a closure.
///
/// Stores the body type-erased so one concrete type covers every closure
/// shape, mirroring how factories are stored elsewhere in this crate.
pub struct FnProvider {
    id: ProviderId,
    name: String,
    signature: Signature,
    return_type: Option<TypeKey>,
    call: ProviderCall,
}

impl Provider for FnProvider {
    #[inline]
    fn id(&self) -> ProviderId {
        self.id
    }

    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> Signature {
        self.signature.clone()
    }

    #[inline]
    fn is_async(&self) -> bool {
        matches!(self.call, ProviderCall::Async(_))
    }

    #[inline]
    fn return_type(&self) -> Option<TypeKey> {
        self.return_type
    }

    fn invoke(&self, args: ResolvedArgs) -> Invocation<'_> {
        match &self.call {
            ProviderCall::Sync(f) => Invocation::Ready(f(args)),
            ProviderCall::Async(f) => Invocation::Future(f(args)),
        }
    }
}

impl std::fmt::Debug for FnProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnProvider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("params", &self.signature.len())
            .field("async", &self.is_async())
            .finish()
    }
}

/// Create a synchronous, infallible provider from a closure.
///
/// # Examples
///
/// ```rust
/// use context_injector::{provider_fn, Param, Provider, Signature};
///
/// let db_url = provider_fn(
///     "db_url",
///     Signature::new().param(Param::new("host").of::<String>()),
///     |args| format!("postgres://{}", args.get_cloned::<String>("host").unwrap()),
/// );
/// assert_eq!(db_url.name(), "db_url");
/// ```
pub fn provider_fn<T, F>(name: impl Into<String>, signature: Signature, f: F) -> Arc<dyn Provider>
where
    T: Send + Sync + 'static,
    F: Fn(ResolvedArgs) -> T + Send + Sync + 'static,
{
    Arc::new(FnProvider {
        id: ProviderId::next(),
        name: name.into(),
        signature,
        return_type: Some(TypeKey::of::<T>()),
        call: ProviderCall::Sync(Box::new(move |args| Ok(Arc::new(f(args)) as Value))),
    })
}

/// Create a synchronous, fallible provider from a closure.
///
/// The closure's error propagates unmodified as the source of an
/// [`InjectError::Provider`].
pub fn try_provider_fn<T, F>(
    name: impl Into<String>,
    signature: Signature,
    f: F,
) -> Arc<dyn Provider>
where
    T: Send + Sync + 'static,
    F: Fn(ResolvedArgs) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
{
    let name = name.into();
    let label = name.clone();
    Arc::new(FnProvider {
        id: ProviderId::next(),
        name,
        signature,
        return_type: Some(TypeKey::of::<T>()),
        call: ProviderCall::Sync(Box::new(move |args| {
            f(args)
                .map(|v| Arc::new(v) as Value)
                .map_err(|e| InjectError::provider(label.clone(), e))
        })),
    })
}

/// Create an asynchronous, infallible provider from a closure returning a
/// future.
pub fn async_provider_fn<T, F, Fut>(
    name: impl Into<String>,
    signature: Signature,
    f: F,
) -> Arc<dyn Provider>
where
    T: Send + Sync + 'static,
    F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    Arc::new(FnProvider {
        id: ProviderId::next(),
        name: name.into(),
        signature,
        return_type: Some(TypeKey::of::<T>()),
        call: ProviderCall::Async(Box::new(move |args| {
            let fut = f(args);
            async move { Ok(Arc::new(fut.await) as Value) }.boxed()
        })),
    })
}

/// Create an asynchronous, fallible provider from a closure returning a
/// future.
pub fn try_async_provider_fn<T, F, Fut>(
    name: impl Into<String>,
    signature: Signature,
    f: F,
) -> Arc<dyn Provider>
where
    T: Send + Sync + 'static,
    F: Fn(ResolvedArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, BoxError>> + Send + 'static,
{
    let name = name.into();
    let label = name.clone();
    Arc::new(FnProvider {
        id: ProviderId::next(),
        name,
        signature,
        return_type: Some(TypeKey::of::<T>()),
        call: ProviderCall::Async(Box::new(move |args| {
            let fut = f(args);
            let label = label.clone();
            async move {
                fut.await
                    .map(|v| Arc::new(v) as Value)
                    .map_err(|e| InjectError::provider(label, e))
            }
            .boxed()
        })),
    })
}

/// Create a zero-argument convenience provider.
///
/// Modeled as an ordinary dependency with an empty parameter list; the
/// executor applies no special casing.
pub fn value_provider<T, F>(name: impl Into<String>, f: F) -> Arc<dyn Provider>
where
    T: Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    provider_fn(name, Signature::empty(), move |_args| f())
}
