/*!
 * Backend Selection
 *
 * Exactly two cooperative scheduler backends are supported. The choice is
 * per-process: the first `setup()` call wins and a later call naming the
 * other backend is rejected.
 */

use crate::core::Facility;
use std::collections::HashSet;
use std::fmt;

/// Supported cooperative scheduler backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Current-thread tokio runtime: tokio timers, `AsyncFd` readiness.
    Tokio,
    /// `async_executor::Executor` driven by `futures::executor::block_on`,
    /// with `async_io` timers and readiness.
    Smol,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Tokio => write!(f, "tokio"),
            Backend::Smol => write!(f, "smol"),
        }
    }
}

/// Runtime configuration passed to [`crate::setup`].
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    /// Facilities left unpatched: they behave as if permanently in native
    /// mode and never suspend cooperatively.
    pub exclude: HashSet<Facility>,
}

impl Config {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            exclude: HashSet::new(),
        }
    }

    pub fn exclude(mut self, facility: Facility) -> Self {
        self.exclude.insert(facility);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Backend::Tokio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_builder() {
        let config = Config::new(Backend::Tokio)
            .exclude(Facility::Time)
            .exclude(Facility::Time)
            .exclude(Facility::Io);
        assert_eq!(config.exclude.len(), 2);
        assert!(config.exclude.contains(&Facility::Time));
    }
}
