//! Validation and coercion engine
//!
//! Constraint application is a three-step pipeline run after a priority
//! group fully settles: model hooks (external structured validation), then
//! type coercion, then the built-in constraint checks from
//! [`constrained`](crate::constrained).
//!
//! The coercion table maps `(source type, target type)` pairs to conversion
//! functions. A process-wide default table exists for convenience and can be
//! extended with [`register_coercion`]; a call-scoped [`ValidationConfig`]
//! can shadow or bypass it to keep tests from interfering with each other.

use crate::constrained::{self, Constraints};
use crate::context::Value;
use crate::error::{InjectError, Result};
use crate::signature::TypeKey;
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Coercion function: converts a type-erased value or rejects it with a
/// message.
pub type CoercionFn = Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Model-validation hook: given a declared target type and a resolved value,
/// returns `Some` when the hook handles that type, `None` to pass.
///
/// This is the seam for external structured-validation backends; the
/// built-in JSON support registers nothing, it lives in the default coercion
/// table instead.
pub type ModelHook =
    Arc<dyn Fn(&TypeKey, &Value) -> Option<std::result::Result<Value, String>> + Send + Sync>;

fn erase_coercion<S, T, F>(f: F) -> CoercionFn
where
    S: Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fn(&S) -> std::result::Result<T, String> + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| {
        let source = value
            .downcast_ref::<S>()
            .ok_or_else(|| "coercion source type mismatch".to_string())?;
        Ok(Arc::new(f(source)?) as Value)
    })
}

/// Process-wide default coercion table.
///
/// Global mutable state by design; see [`ValidationConfig`] for the
/// call-scoped alternative. Seeded with string→json, string→integer and
/// string→float conversions.
static COERCIONS: Lazy<DashMap<(TypeId, TypeId), CoercionFn, RandomState>> = Lazy::new(|| {
    let table: DashMap<(TypeId, TypeId), CoercionFn, RandomState> =
        DashMap::with_hasher(RandomState::new());

    table.insert(
        (TypeId::of::<String>(), TypeId::of::<serde_json::Value>()),
        erase_coercion(|s: &String| {
            serde_json::from_str::<serde_json::Value>(s).map_err(|e| format!("invalid JSON: {e}"))
        }),
    );
    table.insert(
        (TypeId::of::<String>(), TypeId::of::<i64>()),
        erase_coercion(|s: &String| s.parse::<i64>().map_err(|e| format!("not an integer: {e}"))),
    );
    table.insert(
        (TypeId::of::<String>(), TypeId::of::<f64>()),
        erase_coercion(|s: &String| s.parse::<f64>().map_err(|e| format!("not a number: {e}"))),
    );

    table
});

/// Registered model-validation hooks, consulted in registration order.
static MODEL_HOOKS: Lazy<RwLock<Vec<ModelHook>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Register a coercion from `S` to `T` in the process-wide table.
///
/// The effect is process-lifetime, not call-scoped; prefer
/// [`ValidationConfig::with_coercion`] inside tests.
pub fn register_coercion<S, T, F>(f: F)
where
    S: Send + Sync + 'static,
    T: Send + Sync + 'static,
    F: Fn(&S) -> std::result::Result<T, String> + Send + Sync + 'static,
{
    COERCIONS.insert((TypeId::of::<S>(), TypeId::of::<T>()), erase_coercion(f));
}

/// Register a model-validation hook.
///
/// Hooks run before coercion when a constrained argument declares a type;
/// the first hook returning `Some` wins.
pub fn register_model_hook(hook: ModelHook) {
    MODEL_HOOKS
        .write()
        .expect("model hook registry poisoned")
        .push(hook);
}

fn run_model_hooks(target: &TypeKey, value: &Value) -> Option<std::result::Result<Value, String>> {
    let hooks = MODEL_HOOKS.read().expect("model hook registry poisoned");
    for hook in hooks.iter() {
        if let Some(result) = hook(target, value) {
            return Some(result);
        }
    }
    None
}

/// Call-scoped validation configuration.
///
/// Carries a local coercion table consulted before (or instead of) the
/// process-wide one, plus an optional generic fallback tried when no exact
/// pair matches.
#[derive(Clone)]
pub struct ValidationConfig {
    local: HashMap<(TypeId, TypeId), CoercionFn, RandomState>,
    fallback: Option<CoercionFn>,
    use_process_table: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            local: HashMap::with_hasher(RandomState::new()),
            fallback: None,
            use_process_table: true,
        }
    }
}

impl ValidationConfig {
    /// Default configuration: process-wide table, no local entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a call-scoped coercion from `S` to `T`.
    pub fn with_coercion<S, T, F>(mut self, f: F) -> Self
    where
        S: Send + Sync + 'static,
        T: Send + Sync + 'static,
        F: Fn(&S) -> std::result::Result<T, String> + Send + Sync + 'static,
    {
        self.local
            .insert((TypeId::of::<S>(), TypeId::of::<T>()), erase_coercion(f));
        self
    }

    /// Set the generic fallback, tried when no exact pair matches.
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(f));
        self
    }

    /// Ignore the process-wide table for this call.
    pub fn isolated(mut self) -> Self {
        self.use_process_table = false;
        self
    }

    fn lookup(&self, source: TypeId, target: TypeId) -> Option<CoercionFn> {
        if let Some(f) = self.local.get(&(source, target)) {
            return Some(f.clone());
        }
        if self.use_process_table {
            if let Some(f) = COERCIONS.get(&(source, target)) {
                return Some(f.value().clone());
            }
        }
        None
    }
}

impl std::fmt::Debug for ValidationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationConfig")
            .field("local", &self.local.len())
            .field("has_fallback", &self.fallback.is_some())
            .field("use_process_table", &self.use_process_table)
            .finish()
    }
}

/// Apply hooks, coercion, and constraints to a resolved value.
///
/// Only invoked once the owning priority group has fully settled, so a
/// validator never observes partially-resolved state.
pub(crate) fn apply(
    argument: &str,
    value: Value,
    declared: Option<TypeKey>,
    constraints: &Constraints,
    config: &ValidationConfig,
) -> Result<Value> {
    let mut value = value;

    if let Some(target) = declared {
        if let Some(result) = run_model_hooks(&target, &value) {
            value = result.map_err(|msg| {
                InjectError::validation(argument, msg, constrained::value_summary(&value))
            })?;
        } else {
            let source = (*value).type_id();
            if source != target.id() {
                if let Some(coerce) = config
                    .lookup(source, target.id())
                    .or_else(|| config.fallback.clone())
                {
                    value = coerce(&value).map_err(|msg| {
                        InjectError::validation(argument, msg, constrained::value_summary(&value))
                    })?;
                }
                // no coercion entry: pass the value through unchanged and let
                // the constraint checks decide
            }
        }
    }

    constrained::check(argument, &value, constraints)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val<T: Send + Sync + 'static>(v: T) -> Value {
        Arc::new(v)
    }

    #[test]
    fn test_default_table_parses_json() {
        let out = apply(
            "payload",
            val("{\"a\": 1}".to_string()),
            Some(TypeKey::of::<serde_json::Value>()),
            &Constraints::new(),
            &ValidationConfig::new(),
        )
        .unwrap();

        let json = out.downcast::<serde_json::Value>().unwrap();
        assert_eq!(json["a"], 1);
    }

    #[test]
    fn test_default_table_rejects_bad_json() {
        let err = apply(
            "payload",
            val("not json".to_string()),
            Some(TypeKey::of::<serde_json::Value>()),
            &Constraints::new(),
            &ValidationConfig::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_string_to_integer_then_bounds() {
        let config = ValidationConfig::new();
        let c = Constraints::new().ge(10.0);

        let out = apply("n", val("42".to_string()), Some(TypeKey::of::<i64>()), &c, &config)
            .unwrap();
        assert_eq!(*out.downcast::<i64>().unwrap(), 42);

        let err =
            apply("n", val("3".to_string()), Some(TypeKey::of::<i64>()), &c, &config).unwrap_err();
        assert!(matches!(err, InjectError::Validation { .. }));
    }

    #[test]
    fn test_local_table_shadows_process_table() {
        // process table parses decimal; this call parses hex
        let config = ValidationConfig::new().with_coercion(|s: &String| {
            i64::from_str_radix(s, 16).map_err(|e| e.to_string())
        });

        let out = apply(
            "n",
            val("ff".to_string()),
            Some(TypeKey::of::<i64>()),
            &Constraints::new(),
            &config,
        )
        .unwrap();
        assert_eq!(*out.downcast::<i64>().unwrap(), 255);
    }

    #[test]
    fn test_isolated_config_skips_process_table() {
        let config = ValidationConfig::new().isolated();

        // no coercion available: value passes through unchanged
        let out = apply(
            "n",
            val("42".to_string()),
            Some(TypeKey::of::<i64>()),
            &Constraints::new(),
            &config,
        )
        .unwrap();
        assert!(out.downcast_ref::<String>().is_some());
    }

    #[test]
    fn test_fallback_tried_after_exact_pairs() {
        let config = ValidationConfig::new()
            .isolated()
            .with_fallback(|_| Ok(Arc::new(0i64) as Value));

        let out = apply(
            "n",
            val("anything".to_string()),
            Some(TypeKey::of::<i64>()),
            &Constraints::new(),
            &config,
        )
        .unwrap();
        assert_eq!(*out.downcast::<i64>().unwrap(), 0);
    }

    #[test]
    fn test_matching_type_skips_coercion() {
        let out = apply(
            "n",
            val(7i64),
            Some(TypeKey::of::<i64>()),
            &Constraints::new(),
            &ValidationConfig::new(),
        )
        .unwrap();
        assert_eq!(*out.downcast::<i64>().unwrap(), 7);
    }

    #[test]
    fn test_register_coercion_extends_process_table() {
        #[derive(Debug, PartialEq)]
        struct Port(u16);

        register_coercion(|s: &String| {
            s.parse::<u16>().map(Port).map_err(|e| e.to_string())
        });

        let out = apply(
            "port",
            val("8080".to_string()),
            Some(TypeKey::of::<Port>()),
            &Constraints::new(),
            &ValidationConfig::new(),
        )
        .unwrap();
        assert_eq!(*out.downcast::<Port>().unwrap(), Port(8080));
    }
}
