//! Per-build context.
//!
//! Carries the resolved configuration and the logging span for one build
//! invocation. Nothing in the builder reads process-wide state; everything
//! it needs arrives through this object.

use tracing::Span;

use crate::config::BuilderConfig;

/// Resolved configuration plus the logger handle for a single build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    config: BuilderConfig,
    span: Span,
}

impl BuildContext {
    /// Create a context whose span is tagged with the target repository.
    pub fn new(config: BuilderConfig, repository: &str) -> Self {
        let span = tracing::info_span!(
            "build",
            registry = %config.registry,
            repository = %repository
        );
        Self { config, span }
    }

    /// Create a context with an explicit span.
    pub fn with_span(config: BuilderConfig, span: Span) -> Self {
        Self { config, span }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Span that all build-step logging is recorded under.
    pub fn span(&self) -> &Span {
        &self.span
    }
}
