//! wirekit: a lifecycle container for modular REST services.
//!
//! Components register providers, contribution collections and lifecycle
//! hooks against a [`Container`]; the container validates the dependency
//! graph, constructs everything exactly once in topological order, runs
//! start hooks under a deadline, and unwinds in reverse order on shutdown
//! or startup failure. The [`routing`] module defines the route, group and
//! middleware contribution types collected by the HTTP gateway.

pub mod container;
pub mod error;
mod graph;
pub mod key;
pub mod routing;

pub use container::{BuildCtx, Container, Hook, RunOptions, State};
pub use error::{ComposeError, ShutdownFailure};
pub use key::{Dep, TypeKey};

#[cfg(test)]
mod tests;
