//! Tracing subscriber setup for the server binary
//!
//! Library code only emits events. The binary calls [`TracingConfig::init`]
//! once at startup. `log` records from the inference backends are bridged
//! into the same subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    Console,
    /// Compact output without colors, for containers and CI
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    /// Output format
    pub format: TracingFormat,
    /// Explicit filter directive, takes precedence over `RUST_LOG` and verbosity
    pub env_filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Explicit filter, then `RUST_LOG`, then verbosity
    fn build_filter(&self) -> anyhow::Result<EnvFilter> {
        if let Some(directive) = &self.env_filter {
            return Ok(EnvFilter::try_new(directive)?);
        }
        if self.verbosity == 0 {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }
        Ok(EnvFilter::try_new(self.verbosity_to_filter())?)
    }

    /// Install the global subscriber
    pub fn init(self) -> anyhow::Result<()> {
        let filter = self.build_filter()?;
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => registry
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(false)
                        .with_level(true)
                        .compact(),
                )
                .try_init()?,
            TracingFormat::Compact => registry
                .with(fmt::layer().with_ansi(false).with_target(true).compact())
                .try_init()?,
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true),
                )
                .try_init()?,
        }

        Ok(())
    }
}
