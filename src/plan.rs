//! Plan construction: recursive dependency mapping
//!
//! [`build`] walks a callable's signature once, recursing through every
//! `Depends` marker, and produces an immutable [`MappedContext`]. The plan
//! owns the variant assignment, the deduplicated provider graph, and the
//! priority-group layout; resolution never re-analyzes anything.
//!
//! Plans are `Send + Sync` and intended to be built once per callable and
//! shared across calls (typically behind an `Arc`).

use crate::constrained::Constraints;
use crate::context::Value;
use crate::error::{InjectError, Result};
use crate::injectable::{FieldAccessor, Injectable, Provider, ProviderId};
use crate::signature::{analyze, AnalyzeOptions, TypeKey};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

/// How one argument obtains its value at resolution time.
pub(crate) enum Binding {
    /// Context lookup: by type when one is known, then by name, then the
    /// declared default
    Lookup { ty: Option<TypeKey> },

    /// Locate a model instance in the context and read a field off it
    Field {
        model: TypeKey,
        field: String,
        accessor: FieldAccessor,
    },

    /// Invoke a provider; the node is shared between every argument that
    /// depends on the same provider instance
    Provider(Arc<ProviderNode>),

    /// No satisfying variant was found at build time (non-strict builds
    /// only); falls back to the default or reports the argument as missing
    Deferred,
}

impl Binding {
    fn kind(&self) -> &'static str {
        match self {
            Self::Lookup { .. } => "lookup",
            Self::Field { .. } => "field",
            Self::Provider(_) => "provider",
            Self::Deferred => "deferred",
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(node) => f
                .debug_struct("Provider")
                .field("name", &node.provider.name())
                .finish(),
            Self::Field { model, field, .. } => f
                .debug_struct("Field")
                .field("model", &model.name())
                .field("field", field)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// One provider in the plan graph, paired with its own sub-plan.
pub(crate) struct ProviderNode {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) plan: MappedContext,
}

/// One argument of the planned callable.
pub(crate) struct PlannedArg {
    pub(crate) name: String,
    pub(crate) ty: Option<TypeKey>,
    pub(crate) default: Option<Value>,
    pub(crate) constraints: Option<Constraints>,
    pub(crate) binding: Binding,
    pub(crate) priority: u32,
    pub(crate) position: usize,
}

impl std::fmt::Debug for PlannedArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedArg")
            .field("name", &self.name)
            .field("ty", &self.ty.map(|t| t.name()))
            .field("binding", &self.binding)
            .field("priority", &self.priority)
            .field("position", &self.position)
            .finish()
    }
}

/// Arguments that settle together, in ascending priority order.
///
/// Indices refer into the owning plan's argument list. Lookups are free of
/// side effects and run first; synchronous providers run inline; the
/// asynchronous remainder is awaited as one joined batch.
#[derive(Debug, Default)]
pub(crate) struct Group {
    pub(crate) priority: u32,
    pub(crate) lookups: Vec<usize>,
    pub(crate) sync_providers: Vec<usize>,
    pub(crate) async_providers: Vec<usize>,
}

impl Group {
    fn len(&self) -> usize {
        self.lookups.len() + self.sync_providers.len() + self.async_providers.len()
    }
}

/// Immutable resolution plan for one callable.
///
/// Produced by [`build`]; consumed by [`resolve`](crate::resolve). Holds no
/// runtime values, so one plan serves any number of concurrent calls.
pub struct MappedContext {
    pub(crate) target: Arc<dyn Provider>,
    pub(crate) args: Vec<PlannedArg>,
    pub(crate) groups: Vec<Group>,
    pub(crate) strict: bool,
}

impl MappedContext {
    /// Name of the planned callable.
    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// Argument names in declaration order.
    pub fn argument_names(&self) -> Vec<&str> {
        self.args.iter().map(|a| a.name.as_str()).collect()
    }

    /// Number of planned arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the callable takes no arguments.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether the plan was built under strict analysis.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// `(priority, member count)` per execution group, ascending.
    pub fn group_layout(&self) -> Vec<(u32, usize)> {
        self.groups.iter().map(|g| (g.priority, g.len())).collect()
    }
}

impl std::fmt::Debug for MappedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedContext")
            .field("target", &self.target.name())
            .field("args", &self.args)
            .field("groups", &self.group_layout())
            .field("strict", &self.strict)
            .finish()
    }
}

/// Build state threaded through the recursive walk.
///
/// `visiting` is the current recursion path (for cycle reporting); `nodes`
/// memoizes finished sub-plans so a provider shared by several arguments is
/// planned once and resolved once per call.
struct BuildState {
    visiting: Vec<(ProviderId, String)>,
    nodes: HashMap<ProviderId, Arc<ProviderNode>, RandomState>,
}

/// Build a resolution plan for a callable.
///
/// Under `strict`, signature problems anywhere in the graph fail the build
/// with every problem enumerated; otherwise problem arguments are deferred
/// to resolution time. Cycles fail the build in either mode.
///
/// # Examples
///
/// ```rust
/// use context_injector::{build, provider_fn, value_provider, Param, Signature};
///
/// let greeting = value_provider("greeting", || "hello".to_string());
/// let handler = provider_fn(
///     "handler",
///     Signature::new().param(Param::new("greeting").depends(greeting)),
///     |args| args.get_cloned::<String>("greeting").unwrap(),
/// );
///
/// let plan = build(&handler, true).unwrap();
/// assert_eq!(plan.argument_names(), vec!["greeting"]);
/// ```
pub fn build(target: &Arc<dyn Provider>, strict: bool) -> Result<MappedContext> {
    let mut state = BuildState {
        visiting: vec![(target.id(), target.name().to_string())],
        nodes: HashMap::with_hasher(RandomState::new()),
    };

    let plan = plan_for(target, strict, &mut state)?;

    #[cfg(feature = "logging")]
    tracing::debug!(
        target: "context_injector",
        callable = plan.target.name(),
        args = plan.args.len(),
        groups = plan.groups.len(),
        strict,
        "plan built"
    );

    Ok(plan)
}

fn plan_for(
    provider: &Arc<dyn Provider>,
    strict: bool,
    state: &mut BuildState,
) -> Result<MappedContext> {
    let signature = provider.signature();
    let specs = analyze(
        provider.name(),
        &signature,
        strict,
        &AnalyzeOptions::default(),
    )?;

    let mut args = Vec::with_capacity(specs.len());
    for spec in specs {
        let (variant, constraints) = match spec.variant {
            Injectable::Constrained { inner, constraints } => (*inner, Some(constraints)),
            other => (other, None),
        };

        let mut ty = spec.ty;
        let mut priority = 0;
        let binding = match variant {
            Injectable::NamedContext { .. } => Binding::Lookup { ty: None },
            Injectable::TypedContext { ty } => Binding::Lookup { ty: Some(ty) },
            Injectable::Dependency {
                provider: dep,
                priority: declared,
            } => {
                priority = declared.unwrap_or(0);
                Binding::Provider(node_for(&dep, strict, state)?)
            }
            Injectable::ModelField {
                model,
                field,
                field_ty,
                accessor,
            } => {
                ty = ty.or(field_ty);
                Binding::Field {
                    model,
                    field,
                    accessor,
                }
            }
            Injectable::Constrained { .. } => {
                return Err(InjectError::Internal(
                    "constraint wrapper nested inside itself".to_string(),
                ))
            }
            Injectable::Unresolved => Binding::Deferred,
        };

        args.push(PlannedArg {
            name: spec.name,
            ty,
            default: spec.default,
            constraints,
            binding,
            priority,
            position: spec.position,
        });
    }

    let groups = layout_groups(&args);
    Ok(MappedContext {
        target: provider.clone(),
        args,
        groups,
        strict,
    })
}

/// Plan one dependency provider, reusing the memoized node when the same
/// provider instance was already planned on another path.
fn node_for(
    dep: &Arc<dyn Provider>,
    strict: bool,
    state: &mut BuildState,
) -> Result<Arc<ProviderNode>> {
    let id = dep.id();

    if let Some(pos) = state.visiting.iter().position(|(v, _)| *v == id) {
        let cycle: Vec<String> = state.visiting[pos..]
            .iter()
            .map(|(_, name)| name.clone())
            .collect();
        return Err(InjectError::CircularDependency { cycle });
    }

    if let Some(node) = state.nodes.get(&id) {
        return Ok(node.clone());
    }

    state.visiting.push((id, dep.name().to_string()));
    let plan = plan_for(dep, strict, state);
    state.visiting.pop();

    let node = Arc::new(ProviderNode {
        provider: dep.clone(),
        plan: plan?,
    });
    state.nodes.insert(id, node.clone());
    Ok(node)
}

/// Partition arguments into execution groups, ascending by priority.
///
/// Within a group, member order follows signature order; the partition into
/// lookups, sync providers, and async providers drives the executor's
/// inline-then-join strategy.
fn layout_groups(args: &[PlannedArg]) -> Vec<Group> {
    let mut priorities: Vec<u32> = args.iter().map(|a| a.priority).collect();
    priorities.sort_unstable();
    priorities.dedup();

    let mut groups = Vec::with_capacity(priorities.len());
    for priority in priorities {
        let mut group = Group {
            priority,
            ..Group::default()
        };
        for (index, arg) in args.iter().enumerate() {
            if arg.priority != priority {
                continue;
            }
            match &arg.binding {
                Binding::Lookup { .. } | Binding::Field { .. } | Binding::Deferred => {
                    group.lookups.push(index)
                }
                Binding::Provider(node) => {
                    if node.provider.is_async() {
                        group.async_providers.push(index)
                    } else {
                        group.sync_providers.push(index)
                    }
                }
            }
        }
        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Value;
    use crate::injectable::{
        async_provider_fn, provider_fn, value_provider, Invocation, Provider,
    };
    use crate::resolve::ResolvedArgs;
    use crate::signature::{Param, Signature};
    use std::sync::Mutex;

    #[test]
    fn test_build_simple_plan() {
        let host = value_provider("host", || "localhost".to_string());
        let handler = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("host").depends(host))
                .param(Param::new("port").of::<u16>()),
            |_| (),
        );

        let plan = build(&handler, true).unwrap();
        assert_eq!(plan.target_name(), "handler");
        assert_eq!(plan.argument_names(), vec!["host", "port"]);
        assert!(plan.is_strict());
        assert_eq!(plan.group_layout(), vec![(0, 2)]);
    }

    #[test]
    fn test_shared_provider_planned_once() {
        let shared = value_provider("shared", || 1u8);
        let handler = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("a").depends(shared.clone()))
                .param(Param::new("b").depends(shared)),
            |_| (),
        );

        let plan = build(&handler, true).unwrap();
        let nodes: Vec<&Arc<ProviderNode>> = plan
            .args
            .iter()
            .filter_map(|a| match &a.binding {
                Binding::Provider(node) => Some(node),
                _ => None,
            })
            .collect();
        assert_eq!(nodes.len(), 2);
        assert!(Arc::ptr_eq(nodes[0], nodes[1]));
    }

    #[test]
    fn test_groups_ascend_by_priority() {
        let early = value_provider("early", || 1u8);
        let late = async_provider_fn("late", Signature::empty(), |_| async { 2u8 });
        let handler = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("late").depends_in_group(late, 5))
                .param(Param::new("early").depends_in_group(early, 1)),
            |_| (),
        );

        let plan = build(&handler, true).unwrap();
        assert_eq!(plan.group_layout(), vec![(1, 1), (5, 1)]);
        assert_eq!(plan.groups[0].sync_providers, vec![1]);
        assert_eq!(plan.groups[1].async_providers, vec![0]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let dep = value_provider("dep", || 0u8);
        let handler = provider_fn(
            "handler",
            Signature::new()
                .param(Param::new("x").depends(dep))
                .param(Param::new("y").of::<String>())
                .param(Param::new("z").default_value(false)),
            |_| (),
        );

        let first = build(&handler, true).unwrap();
        let second = build(&handler, true).unwrap();
        assert_eq!(first.argument_names(), second.argument_names());
        assert_eq!(first.group_layout(), second.group_layout());
    }

    #[test]
    fn test_strict_build_surfaces_nested_signature_problems() {
        let broken = provider_fn(
            "broken",
            Signature::new().param(Param::new("mystery")),
            |_| 0u8,
        );
        let handler = provider_fn(
            "handler",
            Signature::new().param(Param::new("dep").depends(broken)),
            |_| (),
        );

        let err = build(&handler, true).unwrap_err();
        assert!(matches!(err, InjectError::Signature { .. }));
        assert!(err.to_string().contains("broken"));

        // the same graph builds leniently, deferring the problem argument
        let plan = build(&handler, false).unwrap();
        assert!(!plan.is_strict());
    }

    /// Provider whose dependency edge is wired after construction, so tests
    /// can close a reference cycle.
    struct RewirableProvider {
        id: crate::injectable::ProviderId,
        name: String,
        next: Mutex<Option<Arc<dyn Provider>>>,
    }

    impl RewirableProvider {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: crate::injectable::ProviderId::next(),
                name: name.to_string(),
                next: Mutex::new(None),
            })
        }
    }

    impl Provider for RewirableProvider {
        fn id(&self) -> crate::injectable::ProviderId {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn signature(&self) -> Signature {
            match &*self.next.lock().unwrap() {
                Some(dep) => Signature::new().param(Param::new("dep").depends(dep.clone())),
                None => Signature::empty(),
            }
        }

        fn invoke(&self, _args: ResolvedArgs) -> Invocation<'_> {
            Invocation::Ready(Ok(Arc::new(0u8) as Value))
        }
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let a = RewirableProvider::new("a");
        let b = RewirableProvider::new("b");
        *a.next.lock().unwrap() = Some(b.clone() as Arc<dyn Provider>);
        *b.next.lock().unwrap() = Some(a.clone() as Arc<dyn Provider>);

        let target: Arc<dyn Provider> = a;
        let err = build(&target, true).unwrap_err();
        match err {
            InjectError::CircularDependency { cycle } => {
                assert_eq!(cycle, vec!["a".to_string(), "b".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let a = RewirableProvider::new("selfish");
        let wired = a.clone() as Arc<dyn Provider>;
        *a.next.lock().unwrap() = Some(wired.clone());

        let err = build(&wired, true).unwrap_err();
        match err {
            InjectError::CircularDependency { cycle } => {
                assert_eq!(cycle, vec!["selfish".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
