//! Logging setup.
//!
//! [`StageLoopTracer`] installs the global subscriber: a stdout layer and optionally a daily
//! rotated log file, each with its own [`LogFormat`] and filter directives. Without further
//! configuration it logs `info` and above to stdout.
//!
//! # Examples
//!
//! ```no_run
//! use stageloop_tracing::{
//!     tracing::level_filters::LevelFilter, FileInfo, LayerInfo, LogFormat, StageLoopTracer,
//!     Tracer,
//! };
//!
//! fn main() -> eyre::Result<()> {
//!     let _guard = StageLoopTracer::new()
//!         .with_stdout(LayerInfo::new(
//!             LogFormat::Terminal,
//!             LevelFilter::INFO.to_string(),
//!             "sync::stage_loop=debug".to_string(),
//!             Some("always".to_string()),
//!         ))
//!         .with_file(
//!             LayerInfo::new(LogFormat::Json, LevelFilter::DEBUG.to_string(), String::new(), None),
//!             FileInfo::new("logs", "stageloop.log"),
//!         )
//!         .init()?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

// Re-export tracing crates
pub use tracing;
pub use tracing_appender;
pub use tracing_subscriber;

pub use formatter::LogFormat;
pub use layers::FileInfo;
pub use test_tracer::TestTracer;

mod formatter;
mod layers;
mod test_tracer;

use crate::layers::Layers;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Builder of the global subscriber.
#[derive(Debug, Clone)]
pub struct StageLoopTracer {
    stdout: LayerInfo,
    file: Option<(LayerInfo, FileInfo)>,
}

impl StageLoopTracer {
    /// A tracer with the default stdout layer and no file output.
    pub fn new() -> Self {
        Self { stdout: LayerInfo::default(), file: None }
    }

    /// Replaces the stdout layer configuration.
    pub fn with_stdout(mut self, config: LayerInfo) -> Self {
        self.stdout = config;
        self
    }

    /// Also write logs to a file.
    pub fn with_file(mut self, config: LayerInfo, file_info: FileInfo) -> Self {
        self.file = Some((config, file_info));
        self
    }
}

impl Default for StageLoopTracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of one layer.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    format: LogFormat,
    default_directive: String,
    filters: String,
    color: Option<String>,
}

impl LayerInfo {
    /// Creates a layer configuration.
    ///
    /// `default_directive` applies when `RUST_LOG` is unset, `filters` are comma separated
    /// directives added on top. `color` enables colored output unless it is `"never"`.
    pub const fn new(
        format: LogFormat,
        default_directive: String,
        filters: String,
        color: Option<String>,
    ) -> Self {
        Self { format, default_directive, filters, color }
    }
}

impl Default for LayerInfo {
    /// Colored terminal output at `info`.
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            default_directive: LevelFilter::INFO.to_string(),
            filters: String::new(),
            color: Some("always".to_string()),
        }
    }
}

/// Installs a global logging configuration.
pub trait Tracer {
    /// Installs the subscriber.
    ///
    /// Returns the guard of the file writer, if any. Buffered file logs are flushed when it is
    /// dropped, so it must be held for the lifetime of the program.
    fn init(self) -> eyre::Result<Option<WorkerGuard>>;
}

impl Tracer for StageLoopTracer {
    fn init(self) -> eyre::Result<Option<WorkerGuard>> {
        let mut layers = Layers::new();

        layers.stdout(
            self.stdout.format,
            self.stdout.default_directive.parse()?,
            &self.stdout.filters,
            self.stdout.color,
        )?;

        let file_guard = match self.file {
            Some((config, file_info)) => {
                Some(layers.file(config.format, &config.filters, file_info)?)
            }
            None => None,
        };

        // fails only if a global subscriber is already installed
        let _ = tracing_subscriber::registry().with(layers.into_inner()).try_init().inspect_err(
            |err| tracing::warn!(%err, "Tracing subscriber could not be initialized"),
        );
        Ok(file_guard)
    }
}

/// Initializes a tracing subscriber for tests.
///
/// The filter is configurable via `RUST_LOG`. Does nothing if a subscriber is already installed.
pub fn init_test_tracing() {
    let _ = TestTracer::default().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_default_directive_is_rejected() {
        let tracer = StageLoopTracer::new().with_stdout(LayerInfo::new(
            LogFormat::Terminal,
            "sync=loud".to_string(),
            String::new(),
            None,
        ));
        assert!(tracer.init().is_err());
    }
}
