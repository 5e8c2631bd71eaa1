use std::time::Duration;

use thiserror::Error;

use crate::container::State;

/// A single stop-hook failure recorded during shutdown.
#[derive(Debug)]
pub struct ShutdownFailure {
    pub component: String,
    pub source: anyhow::Error,
}

/// Structured errors for composition, startup and shutdown.
///
/// Structural errors (duplicates, missing deps, cycles) indicate a
/// misconfigured composition and are never retried.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("a provider for '{key}' is already registered")]
    DuplicateProvider { key: &'static str },

    #[error("collection '{name}' is already declared")]
    DuplicateCollection { name: &'static str },

    #[error("collection '{name}' holds '{expected}', contribution produces '{found}'")]
    CollectionTypeMismatch {
        name: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("'{consumer}' depends on {key}, which no provider supplies")]
    MissingDependency { consumer: String, key: String },

    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("failed to construct '{component}'")]
    Construct {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("start hook failed for '{component}'")]
    StartupHook {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("shutdown completed with {} stop hook failure(s)", failures.len())]
    ShutdownAggregate { failures: Vec<ShutdownFailure> },

    #[error("'{component}' {phase} hook exceeded the {deadline:?} deadline")]
    Timeout {
        component: String,
        phase: &'static str,
        deadline: Duration,
    },

    #[error("cannot {action} while the container is {state:?}")]
    InvalidState { state: State, action: &'static str },
}
