//! # Context Injector - Plan-Once Dependency Resolution for Callables
//!
//! Analyzes a callable's declared signature once, maps every argument to a
//! resolution strategy, and then resolves calls against runtime contexts as
//! many times as needed - with recursive provider graphs, concurrent
//! execution of independent async dependencies, and a validation layer.
//!
//! ## Features
//!
//! - ⚡ **Plan once, resolve many** - signature analysis and graph mapping
//!   happen at bootstrap, never per call
//! - 🔀 **Concurrent resolution** - independent async providers in a
//!   priority group are awaited as one joined batch
//! - 🧭 **Fixed precedence** - explicit marker, then type match, then name
//!   match, then default
//! - ♻️ **Per-call dedup** - a provider shared by several arguments runs at
//!   most once per call
//! - 🔁 **Cycle detection** - circular provider graphs fail at build time
//!   with the full chain
//! - ✅ **Validation** - constraints and type coercion applied after each
//!   group settles
//! - 🎭 **Overrides** - call-scoped provider substitution for testing
//! - 📊 **Observable** - optional tracing integration with JSON or pretty
//!   output
//!
//! ## Quick Start
//!
//! ```rust
//! use context_injector::{
//!     build, provider_fn, resolve, value_provider, Param, RuntimeContext, Signature,
//! };
//!
//! let greeting = value_provider("greeting", || "hello".to_string());
//! let handler = provider_fn(
//!     "greet",
//!     Signature::new()
//!         .param(Param::new("greeting").depends(greeting))
//!         .param(Param::new("name").of::<String>()),
//!     |args| {
//!         format!(
//!             "{} {}",
//!             args.get_cloned::<String>("greeting").unwrap(),
//!             args.get_cloned::<String>("name").unwrap(),
//!         )
//!     },
//! );
//!
//! // analyze the signature and map the dependency graph once
//! let plan = build(&handler, true).unwrap();
//!
//! // resolve against a fresh context per call
//! let ctx = RuntimeContext::new();
//! ctx.insert_typed("world".to_string());
//!
//! let out = futures::executor::block_on(async {
//!     resolve(&ctx, &plan).await?.invoke_as::<String>().await
//! })
//! .unwrap();
//! assert_eq!(*out, "hello world");
//! ```
//!
//! ## Resolution Model
//!
//! Arguments resolve in ascending priority groups (default group 0).
//! Within a group, context lookups and synchronous providers run inline;
//! asynchronous providers overlap. Constraint checks run only once the
//! whole group has settled, so validators never observe partial state.

mod constrained;
mod context;
mod error;
mod injectable;
#[cfg(feature = "logging")]
pub mod logging;
mod overrides;
mod plan;
mod resolve;
mod signature;
mod validation;

pub use constrained::*;
pub use context::*;
pub use error::*;
pub use injectable::*;
pub use overrides::*;
pub use plan::*;
pub use resolve::*;
pub use signature::*;
pub use validation::*;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        async_provider_fn, build, provider_fn, resolve, resolve_with, value_provider, BoundCall,
        Constraints, InjectError, MappedContext, Overrides, Param, Provider, ResolveOptions,
        Result, RuntimeContext, Signature,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn describe(city: &str, population: u64) -> String {
        format!("{city}: {population} residents")
    }

    #[tokio::test]
    async fn test_injected_call_matches_direct_call() {
        let target = provider_fn(
            "describe",
            Signature::new()
                .param(Param::new("city").of::<String>())
                .param(Param::new("population").of::<u64>()),
            |args| {
                describe(
                    args.get::<String>("city").unwrap(),
                    args.get_cloned::<u64>("population").unwrap(),
                )
            },
        );
        let plan = build(&target, true).unwrap();

        let ctx = RuntimeContext::new();
        ctx.insert_typed("Reykjavik".to_string());
        ctx.insert_typed(140_000u64);

        let call = resolve(&ctx, &plan).await.unwrap();
        let injected = call.invoke_as::<String>().await.unwrap();
        assert_eq!(*injected, describe("Reykjavik", 140_000));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_group_async_providers_overlap() {
        let slow_a = async_provider_fn("slow_a", Signature::empty(), |_| async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            1u8
        });
        let slow_b = async_provider_fn("slow_b", Signature::empty(), |_| async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            2u8
        });
        let target = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("a").depends(slow_a))
                .param(Param::new("b").depends(slow_b)),
            |args| args.get_cloned::<u8>("a").unwrap() + args.get_cloned::<u8>("b").unwrap(),
        );
        let plan = build(&target, true).unwrap();

        let start = std::time::Instant::now();
        let call = resolve(&RuntimeContext::new(), &plan).await.unwrap();
        // serial execution would take at least 100ms
        assert!(start.elapsed() < Duration::from_millis(95));
        assert_eq!(*call.invoke_as::<u8>().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_priority_groups_run_in_ascending_order() {
        static SEQUENCE: AtomicU32 = AtomicU32::new(0);

        let early = async_provider_fn("early", Signature::empty(), |_| async {
            SEQUENCE.fetch_add(1, Ordering::SeqCst)
        });
        let late = value_provider("late", || SEQUENCE.fetch_add(1, Ordering::SeqCst));

        // declaration order is late-first; priority order must win
        let target = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("late").depends_in_group(late, 5))
                .param(Param::new("early").depends_in_group(early, 1)),
            |_| (),
        );
        let plan = build(&target, true).unwrap();

        let call = resolve(&RuntimeContext::new(), &plan).await.unwrap();
        assert_eq!(call.args().get_cloned::<u32>("early").unwrap(), 0);
        assert_eq!(call.args().get_cloned::<u32>("late").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_nested_model_field_access() {
        struct User {
            id: u64,
        }
        struct Request {
            user: User,
        }

        let target = provider_fn(
            "audit",
            Signature::new().param(Param::new("user_id").field_of("user.id", |r: &Request| r.user.id)),
            |args| args.get_cloned::<u64>("user_id").unwrap(),
        );
        let plan = build(&target, true).unwrap();

        let ctx = RuntimeContext::new();
        ctx.insert_typed(Request {
            user: User { id: 77 },
        });

        let call = resolve(&ctx, &plan).await.unwrap();
        assert_eq!(*call.invoke_as::<u64>().await.unwrap(), 77);

        // without the model instance the argument has no source
        let err = resolve(&RuntimeContext::new(), &plan).await.unwrap_err();
        assert!(matches!(err, InjectError::Unresolved { .. }));
    }

    #[tokio::test]
    async fn test_constraint_pipeline_end_to_end() {
        let target = provider_fn(
            "signup",
            Signature::new().param(
                Param::new("email")
                    .of::<String>()
                    .constrained(Constraints::new().pattern("^[^@]+@[^@]+$")),
            ),
            |args| args.get_cloned::<String>("email").unwrap(),
        );
        let plan = build(&target, true).unwrap();

        let ctx = RuntimeContext::new();
        ctx.insert_typed("alice@example.com".to_string());
        assert!(resolve(&ctx, &plan).await.is_ok());

        let ctx = RuntimeContext::new();
        ctx.insert_typed("not-an-address".to_string());
        let err = resolve(&ctx, &plan).await.unwrap_err();
        assert!(matches!(err, InjectError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_override_scoped_to_one_call_on_shared_plan() {
        let secret = value_provider("secret", || "real".to_string());
        let target = provider_fn(
            "reveal",
            Signature::new().param(Param::new("secret").depends(secret.clone())),
            |args| args.get_cloned::<String>("secret").unwrap(),
        );
        let plan = Arc::new(build(&target, true).unwrap());
        let ctx = RuntimeContext::new();

        let mut overrides = Overrides::new();
        overrides.insert(&secret, value_provider("secret", || "mocked".to_string()));
        let options = ResolveOptions {
            overrides,
            ..ResolveOptions::default()
        };

        let mocked = resolve_with(&ctx, &plan, options).await.unwrap();
        assert_eq!(*mocked.invoke_as::<String>().await.unwrap(), "mocked");

        let real = resolve(&ctx, &plan).await.unwrap();
        assert_eq!(*real.invoke_as::<String>().await.unwrap(), "real");
    }

    #[test]
    fn test_signature_lint_catches_unresolvable_argument() {
        let target = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("ok").of::<String>())
                .param(Param::new("mystery")),
            |_| (),
        );

        let problems = check_signature(&target, &CheckOptions::new());
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("mystery"));

        // the lint predicts the strict build outcome
        assert!(build(&target, true).is_err());
        assert!(build(&target, false).is_ok());
    }

    #[tokio::test]
    async fn test_deep_provider_chain() {
        let base = value_provider("base", || 2u64);
        let doubled = provider_fn(
            "doubled",
            Signature::new().param(Param::new("base").depends(base)),
            |args| args.get_cloned::<u64>("base").unwrap() * 2,
        );
        let squared = provider_fn(
            "squared",
            Signature::new().param(Param::new("doubled").depends(doubled)),
            |args| {
                let d = args.get_cloned::<u64>("doubled").unwrap();
                d * d
            },
        );
        let target = provider_fn(
            "handler",
            Signature::new().param(Param::new("n").depends(squared)),
            |args| args.get_cloned::<u64>("n").unwrap(),
        );

        let plan = build(&target, true).unwrap();
        let call = resolve(&RuntimeContext::new(), &plan).await.unwrap();
        assert_eq!(*call.invoke_as::<u64>().await.unwrap(), 16);
    }
}
