//! Built-in constraint checks
//!
//! A [`Constraints`] set is attached to a parameter and applied to its
//! resolved value after the owning priority group settles. Built-ins cover
//! length bounds, pattern matching, set membership, numeric bounds, and item
//! counts; a custom closure can replace or reject the value before the
//! built-ins run.

use crate::context::Value;
use crate::error::{InjectError, Result};
use regex::Regex;
use std::sync::Arc;

/// Custom per-argument validator: may coerce the value or reject it with a
/// message.
pub type CustomValidator =
    Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Declarative constraint set for one argument.
///
/// ```rust
/// use context_injector::Constraints;
///
/// let c = Constraints::new().min_length(3).max_length(16).pattern("^[a-z]+$");
/// let age = Constraints::new().ge(18.0).le(120.0);
/// ```
#[derive(Clone, Default)]
pub struct Constraints {
    pub(crate) min_length: Option<usize>,
    pub(crate) max_length: Option<usize>,
    pub(crate) pattern: Option<Regex>,
    pub(crate) pattern_error: Option<String>,
    pub(crate) gt: Option<f64>,
    pub(crate) ge: Option<f64>,
    pub(crate) lt: Option<f64>,
    pub(crate) le: Option<f64>,
    pub(crate) multiple_of: Option<f64>,
    pub(crate) min_items: Option<usize>,
    pub(crate) max_items: Option<usize>,
    pub(crate) one_of: Option<Vec<String>>,
    pub(crate) custom: Option<CustomValidator>,
}

impl Constraints {
    /// Start an empty constraint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum string length (in characters).
    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    /// Maximum string length (in characters).
    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    /// Regular-expression pattern the string must match.
    ///
    /// An invalid pattern is reported as a validation failure when the
    /// constraint is applied, not at construction.
    pub fn pattern(mut self, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => self.pattern = Some(re),
            Err(e) => self.pattern_error = Some(format!("invalid pattern '{pattern}': {e}")),
        }
        self
    }

    /// Value must be strictly greater than `bound`.
    pub fn gt(mut self, bound: f64) -> Self {
        self.gt = Some(bound);
        self
    }

    /// Value must be greater than or equal to `bound`.
    pub fn ge(mut self, bound: f64) -> Self {
        self.ge = Some(bound);
        self
    }

    /// Value must be strictly less than `bound`.
    pub fn lt(mut self, bound: f64) -> Self {
        self.lt = Some(bound);
        self
    }

    /// Value must be less than or equal to `bound`.
    pub fn le(mut self, bound: f64) -> Self {
        self.le = Some(bound);
        self
    }

    /// Value must be a multiple of `base`.
    pub fn multiple_of(mut self, base: f64) -> Self {
        self.multiple_of = Some(base);
        self
    }

    /// Minimum number of items in a sequence.
    pub fn min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    /// Maximum number of items in a sequence.
    pub fn max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    /// String value must be one of the given candidates.
    pub fn one_of<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of = Some(candidates.into_iter().map(Into::into).collect());
        self
    }

    /// Custom validator, run before the built-in checks; may replace the
    /// value.
    pub fn custom<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.custom = Some(Arc::new(f));
        self
    }

    /// Whether any check is configured.
    pub fn is_empty(&self) -> bool {
        self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
            && self.pattern_error.is_none()
            && self.gt.is_none()
            && self.ge.is_none()
            && self.lt.is_none()
            && self.le.is_none()
            && self.multiple_of.is_none()
            && self.min_items.is_none()
            && self.max_items.is_none()
            && self.one_of.is_none()
            && self.custom.is_none()
    }
}

impl std::fmt::Debug for Constraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraints")
            .field("min_length", &self.min_length)
            .field("max_length", &self.max_length)
            .field("pattern", &self.pattern.as_ref().map(|r| r.as_str()))
            .field("gt", &self.gt)
            .field("ge", &self.ge)
            .field("lt", &self.lt)
            .field("le", &self.le)
            .field("multiple_of", &self.multiple_of)
            .field("min_items", &self.min_items)
            .field("max_items", &self.max_items)
            .field("one_of", &self.one_of)
            .field("has_custom", &self.custom.is_some())
            .finish()
    }
}

fn string_view(value: &Value) -> Option<&str> {
    if let Some(s) = value.downcast_ref::<String>() {
        return Some(s.as_str());
    }
    value.downcast_ref::<&'static str>().copied()
}

fn numeric_view(value: &Value) -> Option<f64> {
    if let Some(v) = value.downcast_ref::<i64>() {
        return Some(*v as f64);
    }
    if let Some(v) = value.downcast_ref::<i32>() {
        return Some(*v as f64);
    }
    if let Some(v) = value.downcast_ref::<u64>() {
        return Some(*v as f64);
    }
    if let Some(v) = value.downcast_ref::<u32>() {
        return Some(*v as f64);
    }
    if let Some(v) = value.downcast_ref::<usize>() {
        return Some(*v as f64);
    }
    if let Some(v) = value.downcast_ref::<f64>() {
        return Some(*v);
    }
    value.downcast_ref::<f32>().map(|v| *v as f64)
}

fn item_count(value: &Value) -> Option<usize> {
    if let Some(v) = value.downcast_ref::<Vec<Value>>() {
        return Some(v.len());
    }
    if let Some(v) = value.downcast_ref::<Vec<String>>() {
        return Some(v.len());
    }
    if let Some(v) = value.downcast_ref::<Vec<i64>>() {
        return Some(v.len());
    }
    value.downcast_ref::<Vec<f64>>().map(|v| v.len())
}

/// Short human summary of a type-erased value for error messages.
pub(crate) fn value_summary(value: &Value) -> String {
    if let Some(s) = string_view(value) {
        if s.chars().count() > 40 {
            let head: String = s.chars().take(40).collect();
            return format!("\"{head}…\"");
        }
        return format!("\"{s}\"");
    }
    if let Some(n) = numeric_view(value) {
        return n.to_string();
    }
    if let Some(n) = item_count(value) {
        return format!("<sequence of {n} items>");
    }
    "<opaque value>".to_string()
}

fn fail(argument: &str, constraint: String, value: &Value) -> InjectError {
    InjectError::validation(argument, constraint, value_summary(value))
}

/// Apply a constraint set to a resolved value.
///
/// Returns the (possibly replaced) value, or a validation error naming the
/// failing constraint and a summary of the offending value.
pub(crate) fn check(argument: &str, value: &Value, c: &Constraints) -> Result<Value> {
    let mut value = value.clone();

    if let Some(custom) = &c.custom {
        value = custom(&value)
            .map_err(|msg| InjectError::validation(argument, msg, value_summary(&value)))?;
    }

    if let Some(msg) = &c.pattern_error {
        return Err(fail(argument, msg.clone(), &value));
    }

    if let Some(s) = string_view(&value) {
        let length = s.chars().count();
        if let Some(min) = c.min_length {
            if length < min {
                return Err(fail(argument, format!("min_length={min}"), &value));
            }
        }
        if let Some(max) = c.max_length {
            if length > max {
                return Err(fail(argument, format!("max_length={max}"), &value));
            }
        }
        if let Some(re) = &c.pattern {
            if !re.is_match(s) {
                return Err(fail(argument, format!("pattern={}", re.as_str()), &value));
            }
        }
        if let Some(allowed) = &c.one_of {
            if !allowed.iter().any(|a| a == s) {
                return Err(fail(
                    argument,
                    format!("one_of=[{}]", allowed.join(", ")),
                    &value,
                ));
            }
        }
    }

    if let Some(n) = numeric_view(&value) {
        if let Some(bound) = c.gt {
            if n <= bound {
                return Err(fail(argument, format!("gt={bound}"), &value));
            }
        }
        if let Some(bound) = c.ge {
            if n < bound {
                return Err(fail(argument, format!("ge={bound}"), &value));
            }
        }
        if let Some(bound) = c.lt {
            if n >= bound {
                return Err(fail(argument, format!("lt={bound}"), &value));
            }
        }
        if let Some(bound) = c.le {
            if n > bound {
                return Err(fail(argument, format!("le={bound}"), &value));
            }
        }
        if let Some(base) = c.multiple_of {
            if base != 0.0 && (n % base).abs() > f64::EPSILON {
                return Err(fail(argument, format!("multiple_of={base}"), &value));
            }
        }
    }

    if let Some(count) = item_count(&value) {
        if let Some(min) = c.min_items {
            if count < min {
                return Err(fail(argument, format!("min_items={min}"), &value));
            }
        }
        if let Some(max) = c.max_items {
            if count > max {
                return Err(fail(argument, format!("max_items={max}"), &value));
            }
        }
    }

    Ok(value)
}
