//! Declarative signatures and the signature analyzer
//!
//! Callables describe their parameter lists declaratively through
//! [`Signature`] and [`Param`] instead of runtime reflection. The analyzer
//! turns a signature into an ordered [`ArgumentSpec`] sequence by applying
//! the fixed variant precedence; [`check_signature`] runs the same catalogue
//! of checks as a pure lint pass, without building a plan.

use crate::constrained::Constraints;
use crate::context::Value;
use crate::error::{InjectError, Result};
use crate::injectable::{FieldAccessor, Injectable, Provider};
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Declared-type identity: a `TypeId` plus the type name for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for type `T`.
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Raw `TypeId`.
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name for diagnostics.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Explicit resolution marker attached to a parameter.
///
/// A marker always wins over type and name matching. At most one marker per
/// parameter is valid; extras are reported by the lint pass.
#[derive(Clone)]
pub enum Marker {
    /// Force context lookup by name
    Named,
    /// Force context lookup by declared type
    Typed,
    /// Resolve by invoking a provider
    Depends {
        provider: Arc<dyn Provider>,
        priority: Option<u32>,
    },
    /// Read a field off a model instance located in the context
    ModelField {
        model: TypeKey,
        field: String,
        field_ty: Option<TypeKey>,
        accessor: FieldAccessor,
    },
}

impl Marker {
    fn kind(&self) -> &'static str {
        match self {
            Self::Named => "named",
            Self::Typed => "typed",
            Self::Depends { .. } => "depends",
            Self::ModelField { .. } => "model-field",
        }
    }
}

impl std::fmt::Debug for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Depends { provider, priority } => f
                .debug_struct("Depends")
                .field("provider", &provider.name())
                .field("priority", priority)
                .finish(),
            Self::ModelField { model, field, .. } => f
                .debug_struct("ModelField")
                .field("model", &model.name())
                .field("field", field)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// One declared parameter of a callable.
///
/// Built fluently:
///
/// ```rust
/// use context_injector::{value_provider, Constraints, Param};
///
/// let age = Param::new("age").of::<i64>().constrained(Constraints::new().ge(18.0));
/// let token = Param::new("token").depends(value_provider("token", || "t".to_string()));
/// ```
#[derive(Clone)]
pub struct Param {
    pub(crate) name: String,
    pub(crate) ty: Option<TypeKey>,
    pub(crate) markers: Vec<Marker>,
    pub(crate) default: Option<Value>,
    pub(crate) default_ty: Option<TypeKey>,
    pub(crate) constraints: Option<Constraints>,
}

impl Param {
    /// Declare a parameter by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            markers: Vec::new(),
            default: None,
            default_ty: None,
            constraints: None,
        }
    }

    /// Declare the parameter's type.
    pub fn of<T: 'static>(mut self) -> Self {
        self.ty = Some(TypeKey::of::<T>());
        self
    }

    /// Declare a default value.
    ///
    /// The default's type is recorded so the analyzer can infer a missing
    /// declared type from it.
    pub fn default_value<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.default = Some(Arc::new(value) as Value);
        self.default_ty = Some(TypeKey::of::<T>());
        self
    }

    /// Force resolution by name lookup.
    pub fn from_name(mut self) -> Self {
        self.markers.push(Marker::Named);
        self
    }

    /// Force resolution by type lookup.
    pub fn from_type(mut self) -> Self {
        self.markers.push(Marker::Typed);
        self
    }

    /// Resolve through a provider.
    pub fn depends(mut self, provider: Arc<dyn Provider>) -> Self {
        self.markers.push(Marker::Depends {
            provider,
            priority: None,
        });
        self
    }

    /// Resolve through a provider in an explicit priority group.
    ///
    /// Groups execute in ascending priority order; members of one group may
    /// run concurrently.
    pub fn depends_in_group(mut self, provider: Arc<dyn Provider>, priority: u32) -> Self {
        self.markers.push(Marker::Depends {
            provider,
            priority: Some(priority),
        });
        self
    }

    /// Resolve by reading a field off a model instance found in the context.
    ///
    /// The accessor runs at execution time, once the model instance is
    /// available. Nested paths are expressed inside the accessor.
    pub fn field_of<M, F, A>(mut self, field: impl Into<String>, accessor: A) -> Self
    where
        M: Send + Sync + 'static,
        F: Send + Sync + 'static,
        A: Fn(&M) -> F + Send + Sync + 'static,
    {
        let access: FieldAccessor = Arc::new(move |any: &(dyn Any + Send + Sync)| {
            any.downcast_ref::<M>().map(|m| Arc::new(accessor(m)) as Value)
        });
        self.markers.push(Marker::ModelField {
            model: TypeKey::of::<M>(),
            field: field.into(),
            field_ty: Some(TypeKey::of::<F>()),
            accessor: access,
        });
        self
    }

    /// Attach constraints; the resolved value passes through validation
    /// before binding.
    pub fn constrained(mut self, constraints: Constraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type, if any.
    pub fn ty(&self) -> Option<TypeKey> {
        self.ty
    }
}

impl std::fmt::Debug for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("ty", &self.ty.map(|t| t.name()))
            .field("markers", &self.markers)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Ordered parameter list of a callable.
#[derive(Clone, Default)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    /// Start an empty signature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicitly empty signature (zero-argument callable).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Declared parameters in order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the signature has no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.params.iter()).finish()
    }
}

/// Analyzer output: one argument with its assigned resolution variant.
#[derive(Clone)]
pub struct ArgumentSpec {
    /// Parameter name
    pub name: String,
    /// Declared (or inferred) type
    pub ty: Option<TypeKey>,
    /// Assigned resolution variant
    pub variant: Injectable,
    /// Declared default value
    pub default: Option<Value>,
    /// Discovery position in the signature
    pub position: usize,
}

impl std::fmt::Debug for ArgumentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentSpec")
            .field("name", &self.name)
            .field("ty", &self.ty.map(|t| t.name()))
            .field("variant", &self.variant)
            .field("has_default", &self.default.is_some())
            .field("position", &self.position)
            .finish()
    }
}

/// Options controlling signature analysis.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzeOptions {
    /// Infer a parameter's type from its default value when no explicit
    /// type is declared
    pub infer_type_from_default: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            infer_type_from_default: true,
        }
    }
}

fn problem(name: &str, msg: &str) -> String {
    format!("argument '{name}': {msg}")
}

/// Analyze a callable's signature into ordered [`ArgumentSpec`]s.
///
/// Pure function of the signature; no caching, no provider invocation.
/// Under `strict`, any unresolvable parameter fails with
/// [`InjectError::Signature`] enumerating every problem at once; otherwise
/// problem parameters are assigned [`Injectable::Unresolved`] and re-checked
/// at resolution time.
pub fn analyze(
    callable: &str,
    signature: &Signature,
    strict: bool,
    options: &AnalyzeOptions,
) -> Result<Vec<ArgumentSpec>> {
    let mut specs = Vec::with_capacity(signature.len());
    let mut problems = Vec::new();

    for (position, param) in signature.params().iter().enumerate() {
        let effective_ty = param.ty.or(if options.infer_type_from_default {
            param.default_ty
        } else {
            None
        });

        let mut variant = assign_variant(param, effective_ty, &mut problems);
        if let Some(constraints) = &param.constraints {
            if !matches!(variant, Injectable::Unresolved) {
                variant = Injectable::Constrained {
                    inner: Box::new(variant),
                    constraints: constraints.clone(),
                };
            }
        }

        specs.push(ArgumentSpec {
            name: param.name.clone(),
            ty: effective_ty,
            variant,
            default: param.default.clone(),
            position,
        });
    }

    if strict && !problems.is_empty() {
        return Err(InjectError::signature(callable, problems));
    }
    Ok(specs)
}

/// Assign a variant by fixed precedence: explicit marker, then type match,
/// then name match, then default, then unresolved.
fn assign_variant(
    param: &Param,
    effective_ty: Option<TypeKey>,
    problems: &mut Vec<String>,
) -> Injectable {
    if param.markers.len() > 1 {
        let kinds: Vec<&str> = param.markers.iter().map(|m| m.kind()).collect();
        problems.push(problem(
            &param.name,
            &format!("has multiple injectable markers: {}", kinds.join(", ")),
        ));
        return Injectable::Unresolved;
    }

    if let Some(marker) = param.markers.first() {
        return match marker {
            Marker::Named => Injectable::NamedContext {
                name: param.name.clone(),
            },
            Marker::Typed => match effective_ty {
                Some(ty) => Injectable::TypedContext { ty },
                None => {
                    problems.push(problem(
                        &param.name,
                        "context-by-type marker requires a declared type",
                    ));
                    Injectable::Unresolved
                }
            },
            Marker::Depends { provider, priority } => Injectable::Dependency {
                provider: provider.clone(),
                priority: *priority,
            },
            Marker::ModelField {
                model,
                field,
                field_ty,
                accessor,
            } => Injectable::ModelField {
                model: *model,
                field: field.clone(),
                field_ty: *field_ty,
                accessor: accessor.clone(),
            },
        };
    }

    if let Some(ty) = effective_ty {
        return Injectable::TypedContext { ty };
    }

    if param.default.is_some() {
        // name match first, then the default; the executor tries both
        return Injectable::NamedContext {
            name: param.name.clone(),
        };
    }

    problems.push(problem(
        &param.name,
        "has no type definition and no usable default",
    ));
    Injectable::Unresolved
}

// =============================================================================
// Lint pass
// =============================================================================

/// Options for [`check_signature`].
#[derive(Clone, Default)]
pub struct CheckOptions {
    /// Restrict model-field injection to these model types
    pub allowed_models: Option<Vec<TypeKey>>,
    /// Treat a default value's type as a type declaration
    pub infer_type_from_default: bool,
}

impl CheckOptions {
    /// Defaults: no model restriction, infer types from defaults.
    pub fn new() -> Self {
        Self {
            allowed_models: None,
            infer_type_from_default: true,
        }
    }
}

/// Pure lint pass over a callable's signature.
///
/// Returns human-readable problems without building a plan; an empty list
/// means [`build`](crate::build) will not fail with a signature error.
pub fn check_signature(target: &Arc<dyn Provider>, options: &CheckOptions) -> Vec<String> {
    let signature = target.signature();
    let mut errors = Vec::new();

    for param in signature.params() {
        let effective_ty = param.ty.or(if options.infer_type_from_default {
            param.default_ty
        } else {
            None
        });

        if param.markers.len() > 1 {
            let kinds: Vec<&str> = param.markers.iter().map(|m| m.kind()).collect();
            errors.push(problem(
                &param.name,
                &format!("has multiple injectable markers: {}", kinds.join(", ")),
            ));
            continue;
        }

        match param.markers.first() {
            None => {
                if effective_ty.is_none() && param.default.is_none() {
                    errors.push(problem(
                        &param.name,
                        "has no type definition and no usable default",
                    ));
                }
            }
            Some(Marker::Named) => {}
            Some(Marker::Typed) => {
                if effective_ty.is_none() {
                    errors.push(problem(
                        &param.name,
                        "context-by-type marker requires a declared type",
                    ));
                }
            }
            Some(Marker::Depends { provider, .. }) => {
                if let (Some(declared), Some(returned)) = (effective_ty, provider.return_type()) {
                    if declared.id() != returned.id() {
                        errors.push(problem(
                            &param.name,
                            &format!(
                                "provider '{}' returns {} but {} was declared",
                                provider.name(),
                                returned.name(),
                                declared.name()
                            ),
                        ));
                    }
                }
            }
            Some(Marker::ModelField {
                model,
                field,
                field_ty,
                ..
            }) => {
                if let Some(allowed) = &options.allowed_models {
                    if !allowed.iter().any(|m| m.id() == model.id()) {
                        errors.push(problem(
                            &param.name,
                            &format!("model type {} is not allowed for field injection", model),
                        ));
                    }
                }
                if let (Some(declared), Some(actual)) = (effective_ty, field_ty) {
                    if declared.id() != actual.id() {
                        errors.push(problem(
                            &param.name,
                            &format!(
                                "field '{}' of {} has type {} but {} was declared",
                                field,
                                model.name(),
                                actual.name(),
                                declared.name()
                            ),
                        ));
                    }
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injectable::value_provider;

    #[derive(Clone)]
    struct Request {
        user: String,
    }

    #[test]
    fn test_analyze_precedence_marker_beats_type() {
        let provider = value_provider("ticket", || 9u64);
        let sig = Signature::new().param(Param::new("ticket").of::<u64>().depends(provider));

        let specs = analyze("handler", &sig, true, &AnalyzeOptions::default()).unwrap();
        assert!(matches!(specs[0].variant, Injectable::Dependency { .. }));
    }

    #[test]
    fn test_analyze_typed_then_named_then_default() {
        let sig = Signature::new()
            .param(Param::new("typed").of::<u32>())
            .param(Param::new("named").default_value("fallback".to_string()));

        let specs = analyze("handler", &sig, true, &AnalyzeOptions::default()).unwrap();
        // default's type is inferred, so the first precedence tier with
        // information wins in both cases
        assert!(matches!(specs[0].variant, Injectable::TypedContext { .. }));
        assert!(matches!(specs[1].variant, Injectable::TypedContext { .. }));
    }

    #[test]
    fn test_analyze_untyped_default_without_inference() {
        let sig = Signature::new().param(Param::new("named").default_value(1u8));
        let opts = AnalyzeOptions {
            infer_type_from_default: false,
        };

        let specs = analyze("handler", &sig, true, &opts).unwrap();
        assert!(matches!(specs[0].variant, Injectable::NamedContext { .. }));
    }

    #[test]
    fn test_analyze_strict_enumerates_all_problems() {
        let sig = Signature::new()
            .param(Param::new("a"))
            .param(Param::new("b"));

        let err = analyze("handler", &sig, true, &AnalyzeOptions::default()).unwrap_err();
        match err {
            InjectError::Signature { problems, .. } => assert_eq!(problems.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_analyze_lenient_defers() {
        let sig = Signature::new().param(Param::new("a"));
        let specs = analyze("handler", &sig, false, &AnalyzeOptions::default()).unwrap();
        assert!(matches!(specs[0].variant, Injectable::Unresolved));
    }

    #[test]
    fn test_constrained_wraps_inner_variant() {
        let sig = Signature::new().param(
            Param::new("age")
                .of::<i64>()
                .constrained(Constraints::new().ge(18.0)),
        );

        let specs = analyze("handler", &sig, true, &AnalyzeOptions::default()).unwrap();
        match &specs[0].variant {
            Injectable::Constrained { inner, .. } => {
                assert!(matches!(**inner, Injectable::TypedContext { .. }))
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_check_signature_depends_return_mismatch() {
        let provider = value_provider("count", || 3u64);
        let sig = Signature::new().param(Param::new("count").of::<String>().depends(provider));
        let specs = analyze("handler", &sig, true, &AnalyzeOptions::default());
        assert!(specs.is_ok()); // analysis accepts it

        // the lint catches the type mismatch
        let target = crate::injectable::provider_fn("handler", sig, |_| 0u8);
        let errors = check_signature(&target, &CheckOptions::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("returns u64"));
    }

    #[test]
    fn test_check_signature_model_field() {
        let sig = Signature::new().param(
            Param::new("user")
                .of::<u32>()
                .field_of("user", |r: &Request| r.user.clone()),
        );
        let target = crate::injectable::provider_fn("handler", sig, |_| 0u8);

        let errors = check_signature(&target, &CheckOptions::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("field 'user'"));

        let restricted = CheckOptions {
            allowed_models: Some(vec![TypeKey::of::<String>()]),
            infer_type_from_default: true,
        };
        let errors = check_signature(&target, &restricted);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_check_signature_clean() {
        let sig = Signature::new()
            .param(Param::new("name").of::<String>())
            .param(Param::new("retries").default_value(3u8));
        let target = crate::injectable::provider_fn("handler", sig, |_| 0u8);

        assert!(check_signature(&target, &CheckOptions::new()).is_empty());
    }
}
