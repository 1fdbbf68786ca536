//! Error types for context injection

use thiserror::Error;

/// Boxed error type for user-provider failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building or executing a resolution plan
#[derive(Error, Debug)]
pub enum InjectError {
    /// Callable's parameter shape cannot be analyzed; raised at bootstrap
    #[error("invalid signature for '{callable}': {}", problems.join("; "))]
    Signature {
        callable: String,
        problems: Vec<String>,
    },

    /// Provider graph contains a cycle; raised at bootstrap
    #[error("circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// A required argument has no context entry, override, or default
    #[error("unresolved injectable '{argument}': no context entry, override, or default")]
    Unresolved { argument: String },

    /// A resolved value failed a constraint or coercion
    #[error("validation failed for '{argument}': {constraint} (value: {value})")]
    Validation {
        argument: String,
        constraint: String,
        value: String,
    },

    /// A user-supplied provider failed; the original error is preserved as source
    #[error("provider '{provider}' failed while resolving '{argument}'")]
    Provider {
        provider: String,
        argument: String,
        #[source]
        source: BoxError,
    },

    /// Internal injection error
    #[error("internal injection error: {0}")]
    Internal(String),
}

impl InjectError {
    /// Create a Signature error for a callable
    #[inline]
    pub fn signature(callable: impl Into<String>, problems: Vec<String>) -> Self {
        Self::Signature {
            callable: callable.into(),
            problems,
        }
    }

    /// Create an Unresolved error for an argument
    #[inline]
    pub fn unresolved(argument: impl Into<String>) -> Self {
        Self::Unresolved {
            argument: argument.into(),
        }
    }

    /// Create a Validation error
    #[inline]
    pub fn validation(
        argument: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            argument: argument.into(),
            constraint: constraint.into(),
            value: value.into(),
        }
    }

    /// Create a Provider error carrying the user error as source
    #[inline]
    pub fn provider(provider: impl Into<String>, source: BoxError) -> Self {
        Self::Provider {
            provider: provider.into(),
            argument: String::new(),
            source,
        }
    }

    /// Annotate a provider failure with the argument that triggered it.
    ///
    /// Only fills the argument slot when it is still empty, so the innermost
    /// triggering argument wins.
    #[inline]
    pub(crate) fn with_argument(mut self, name: &str) -> Self {
        if let Self::Provider { argument, .. } = &mut self {
            if argument.is_empty() {
                *argument = name.to_string();
            }
        }
        self
    }

    /// Returns the cycle chain if this is a CircularDependency error
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            Self::CircularDependency { cycle } => Some(cycle),
            _ => None,
        }
    }
}

/// Result type alias for injection operations
pub type Result<T> = std::result::Result<T, InjectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_error_joins_problems() {
        let err = InjectError::signature(
            "handler",
            vec!["bad arg".to_string(), "worse arg".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "invalid signature for 'handler': bad arg; worse arg"
        );
    }

    #[test]
    fn test_cycle_accessor() {
        let err = InjectError::CircularDependency {
            cycle: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.cycle(), Some(&["a".to_string(), "b".to_string()][..]));
        assert!(InjectError::unresolved("x").cycle().is_none());
    }

    #[test]
    fn test_with_argument_fills_empty_slot_once() {
        let err = InjectError::provider("db", "boom".into());
        let err = err.with_argument("conn").with_argument("outer");
        match err {
            InjectError::Provider { argument, .. } => assert_eq!(argument, "conn"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
