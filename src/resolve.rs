//! Plan execution: resolving arguments against a runtime context
//!
//! [`resolve`] walks a [`MappedContext`] group by group. Inside a group,
//! context lookups and synchronous providers run inline; asynchronous
//! providers are awaited as one joined batch, so independent slow
//! dependencies overlap instead of serializing. A group's constraint checks
//! run only after the whole group has settled.
//!
//! Each call gets a fresh provider cache, so a provider shared by several
//! arguments (or reached on several graph paths) runs at most once per call
//! while separate calls never observe each other's values.

use crate::constrained::Constraints;
use crate::context::{RuntimeContext, Value};
use crate::error::{InjectError, Result};
use crate::injectable::{Invocation, Provider, ProviderId};
use crate::overrides::Overrides;
use crate::plan::{self, Binding, MappedContext, PlannedArg, ProviderNode};
use crate::validation::{self, ValidationConfig};
use ahash::RandomState;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use futures::lock::Mutex as AsyncMutex;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call options for [`resolve_with`].
#[derive(Debug)]
pub struct ResolveOptions {
    /// Provider substitutions, scoped to this call only
    pub overrides: Overrides,
    /// Run constraint checks and coercion (on by default)
    pub validate: bool,
    /// Coercion configuration for this call
    pub validation: ValidationConfig,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            overrides: Overrides::new(),
            validate: true,
            validation: ValidationConfig::new(),
        }
    }
}

/// Per-call slot for one provider's value.
///
/// The async mutex is the once-per-call guarantee: the first resolver of a
/// shared provider runs it while concurrent members of the same group wait
/// on the slot and then read the settled value.
type ProviderSlot = Arc<AsyncMutex<Option<Value>>>;

/// Shared state for one resolution call.
struct ResolveEnv<'a> {
    overrides: &'a Overrides,
    validate: bool,
    validation: &'a ValidationConfig,
    cache: DashMap<ProviderId, ProviderSlot, RandomState>,
}

/// Resolve a plan against a context with default options.
///
/// # Examples
///
/// ```rust
/// use context_injector::{build, provider_fn, Param, RuntimeContext, Signature};
///
/// let greet = provider_fn(
///     "greet",
///     Signature::new().param(Param::new("name").of::<String>()),
///     |args| format!("hello {}", args.get_cloned::<String>("name").unwrap()),
/// );
/// let plan = build(&greet, true).unwrap();
///
/// let ctx = RuntimeContext::new();
/// ctx.insert_typed("alice".to_string());
///
/// let out = futures::executor::block_on(async {
///     let call = context_injector::resolve(&ctx, &plan).await?;
///     call.invoke_as::<String>().await
/// })
/// .unwrap();
/// assert_eq!(*out, "hello alice");
/// ```
pub async fn resolve(ctx: &RuntimeContext, plan: &MappedContext) -> Result<BoundCall> {
    resolve_with(ctx, plan, ResolveOptions::default()).await
}

/// Resolve a plan with explicit overrides and validation options.
pub async fn resolve_with(
    ctx: &RuntimeContext,
    plan: &MappedContext,
    options: ResolveOptions,
) -> Result<BoundCall> {
    let env = ResolveEnv {
        overrides: &options.overrides,
        validate: options.validate,
        validation: &options.validation,
        cache: DashMap::with_hasher(RandomState::new()),
    };

    let args = resolve_plan(ctx, plan, &env).await?;

    #[cfg(feature = "logging")]
    tracing::trace!(
        target: "context_injector",
        callable = plan.target_name(),
        resolved = args.len(),
        missing = args.missing().len(),
        "plan resolved"
    );

    Ok(BoundCall {
        target: plan.target.clone(),
        args,
    })
}

/// Resolve one plan level. Boxed because provider sub-plans recurse through
/// here.
fn resolve_plan<'a>(
    ctx: &'a RuntimeContext,
    plan: &'a MappedContext,
    env: &'a ResolveEnv<'a>,
) -> BoxFuture<'a, Result<ResolvedArgs>> {
    async move {
        let mut out = ResolvedArgs::default();
        let empty_constraints = Constraints::new();

        for group in &plan.groups {
            let mut settled: Vec<(usize, Value)> = Vec::with_capacity(
                group.lookups.len() + group.sync_providers.len() + group.async_providers.len(),
            );

            for &index in &group.lookups {
                let arg = &plan.args[index];
                match lookup(ctx, arg) {
                    Some(value) => settled.push((index, value)),
                    None if plan.strict => return Err(InjectError::unresolved(&arg.name)),
                    None => out.missing.push(arg.name.clone()),
                }
            }

            for &index in &group.sync_providers {
                let arg = &plan.args[index];
                let node = provider_node(arg)?;
                match resolve_provider(ctx, node, env)
                    .await
                    .map_err(|e| e.with_argument(&arg.name))?
                {
                    Some(value) => settled.push((index, value)),
                    None => out.missing.push(arg.name.clone()),
                }
            }

            if !group.async_providers.is_empty() {
                let batch = group.async_providers.iter().map(|&index| {
                    let arg = &plan.args[index];
                    async move {
                        let node = provider_node(arg)?;
                        let outcome = resolve_provider(ctx, node, env)
                            .await
                            .map_err(|e| e.with_argument(&arg.name))?;
                        Ok::<_, InjectError>((index, outcome))
                    }
                });
                // every member settles before the first error is reported
                let mut first_err = None;
                for result in join_all(batch).await {
                    match result {
                        Ok((index, Some(value))) => settled.push((index, value)),
                        Ok((index, None)) => out.missing.push(plan.args[index].name.clone()),
                        Err(e) if first_err.is_none() => first_err = Some(e),
                        Err(_) => {}
                    }
                }
                if let Some(e) = first_err {
                    return Err(e);
                }
            }

            // constraints see only fully settled groups
            for (index, value) in settled {
                let arg = &plan.args[index];
                let value = if env.validate && (arg.constraints.is_some() || arg.ty.is_some()) {
                    let constraints = arg.constraints.as_ref().unwrap_or(&empty_constraints);
                    validation::apply(&arg.name, value, arg.ty, constraints, env.validation)?
                } else {
                    value
                };
                out.values.insert(arg.name.clone(), value);
            }
        }

        Ok(out)
    }
    .boxed()
}

/// Context lookup chain: declared type, then argument name, then default.
fn lookup(ctx: &RuntimeContext, arg: &PlannedArg) -> Option<Value> {
    match &arg.binding {
        Binding::Lookup { ty } => {
            if let Some(ty) = ty {
                if let Some(value) = ctx.by_type_id(&ty.id()) {
                    return Some(value);
                }
            }
            ctx.by_name(&arg.name).or_else(|| arg.default.clone())
        }
        Binding::Field { model, accessor, .. } => ctx
            .by_type_id(&model.id())
            .and_then(|instance| accessor(&*instance))
            .or_else(|| arg.default.clone()),
        Binding::Deferred => arg.default.clone(),
        Binding::Provider(_) => None,
    }
}

fn provider_node(arg: &PlannedArg) -> Result<&Arc<ProviderNode>> {
    match &arg.binding {
        Binding::Provider(node) => Ok(node),
        other => Err(InjectError::Internal(format!(
            "argument '{}' grouped as provider but bound as {:?}",
            arg.name, other
        ))),
    }
}

/// Resolve one provider: per-call slot, override, or full sub-resolution.
///
/// The slot's async mutex is held for the duration of the provider's own
/// resolution, so concurrent group members sharing a provider (directly or
/// through a diamond) serialize on the slot and the provider body runs at
/// most once per call. The dependency graph is acyclic, so slot locks nest
/// along graph edges and cannot deadlock.
///
/// Override substitutes are planned at call time (their own dependencies
/// resolve through the same machinery) and cached under the original
/// provider's identity, so overriding never changes dedup behavior.
///
/// Returns `None` when a lenient sub-plan left arguments unresolved; the
/// caller records its own argument as missing instead of invoking the
/// provider with an incomplete argument set.
async fn resolve_provider(
    ctx: &RuntimeContext,
    node: &Arc<ProviderNode>,
    env: &ResolveEnv<'_>,
) -> Result<Option<Value>> {
    let id = node.provider.id();

    // clone the slot out of the dashmap guard before locking; holding a
    // shard guard across an await would block concurrent members
    let slot: ProviderSlot = env
        .cache
        .entry(id)
        .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
        .clone();
    let mut guard = slot.lock().await;
    if let Some(hit) = &*guard {
        return Ok(Some(hit.clone()));
    }

    let value = match env.overrides.get(id) {
        Some(substitute) => {
            let sub_plan = plan::build(substitute, node.plan.is_strict())?;
            let args = resolve_plan(ctx, &sub_plan, env).await?;
            if !args.missing().is_empty() {
                return Ok(None);
            }
            invoke_provider(substitute, args).await?
        }
        None => {
            let args = resolve_plan(ctx, &node.plan, env).await?;
            if !args.missing().is_empty() {
                return Ok(None);
            }
            invoke_provider(&node.provider, args).await?
        }
    };

    *guard = Some(value.clone());
    Ok(Some(value))
}

async fn invoke_provider(provider: &Arc<dyn Provider>, args: ResolvedArgs) -> Result<Value> {
    match provider.invoke(args) {
        Invocation::Ready(result) => result,
        Invocation::Future(future) => future.await,
    }
}

// =============================================================================
// Resolved output
// =============================================================================

/// Arguments produced by a resolution pass, keyed by name.
///
/// Providers receive their own arguments through this type, and a
/// [`BoundCall`] hands the top-level set to the target callable.
#[derive(Default)]
pub struct ResolvedArgs {
    values: HashMap<String, Value, RandomState>,
    missing: Vec<String>,
}

impl ResolvedArgs {
    /// Borrow an argument downcast to `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Result<&T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| InjectError::unresolved(name))?;
        value.downcast_ref::<T>().ok_or_else(|| {
            InjectError::Internal(format!(
                "argument '{name}' does not hold a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Clone an argument out as `T`.
    pub fn get_cloned<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        self.get::<T>(name).map(|v| v.clone())
    }

    /// Take the type-erased value for an argument.
    pub fn get_value(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    /// Whether an argument resolved.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Arguments that did not resolve (non-strict plans only).
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Number of resolved arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing resolved.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ResolvedArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ResolvedArgs")
            .field("resolved", &names)
            .field("missing", &self.missing)
            .finish()
    }
}

/// A callable with its arguments fully resolved, ready to invoke.
///
/// Resolution and invocation are separate steps so callers can inspect the
/// bound arguments, or batch resolution ahead of a latency-sensitive call.
pub struct BoundCall {
    pub(crate) target: Arc<dyn Provider>,
    pub(crate) args: ResolvedArgs,
}

impl BoundCall {
    /// Name of the callable these arguments are bound to.
    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// The resolved argument set.
    pub fn args(&self) -> &ResolvedArgs {
        &self.args
    }

    /// Whether every argument resolved.
    ///
    /// Always true for strict plans; non-strict resolution can leave gaps
    /// that only fail here or at [`invoke`](Self::invoke).
    pub fn is_complete(&self) -> bool {
        self.args.missing.is_empty()
    }

    /// Invoke the callable with the bound arguments.
    pub async fn invoke(self) -> Result<Value> {
        if let Some(name) = self.args.missing.first() {
            return Err(InjectError::unresolved(name));
        }
        match self.target.invoke(self.args) {
            Invocation::Ready(result) => result,
            Invocation::Future(future) => future.await,
        }
    }

    /// Invoke and downcast the result to `T`.
    pub async fn invoke_as<T: Send + Sync + 'static>(self) -> Result<Arc<T>> {
        let name = self.target.name().to_string();
        let value = self.invoke().await?;
        value.downcast::<T>().map_err(|_| {
            InjectError::Internal(format!(
                "'{name}' did not return a {}",
                std::any::type_name::<T>()
            ))
        })
    }
}

impl std::fmt::Debug for BoundCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundCall")
            .field("target", &self.target.name())
            .field("args", &self.args)
            .finish()
    }
}
