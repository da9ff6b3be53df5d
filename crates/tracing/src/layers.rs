use crate::formatter::LogFormat;
use std::path::{Path, PathBuf};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{filter::Directive, EnvFilter, Layer, Registry};

/// A boxed tracing [Layer].
pub(crate) type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Targets that are too chatty below `warn` unless asked for explicitly.
const DEFAULT_ENV_FILTER_DIRECTIVES: [&str; 2] = ["tokio=warn", "mio=warn"];

/// Collects the layers of the global subscriber.
pub(crate) struct Layers {
    inner: Vec<BoxedLayer<Registry>>,
}

impl Layers {
    pub(crate) const fn new() -> Self {
        Self { inner: vec![] }
    }

    pub(crate) fn into_inner(self) -> Vec<BoxedLayer<Registry>> {
        self.inner
    }

    /// Adds a layer writing to stdout.
    pub(crate) fn stdout(
        &mut self,
        format: LogFormat,
        default_directive: Directive,
        filters: &str,
        color: Option<String>,
    ) -> eyre::Result<()> {
        let filter = build_env_filter(Some(default_directive), filters)?;
        self.inner.push(format.apply(filter, color, None));
        Ok(())
    }

    /// Adds a layer writing to a daily rotated file. The returned guard flushes the writer when
    /// dropped.
    pub(crate) fn file(
        &mut self,
        format: LogFormat,
        filters: &str,
        file_info: FileInfo,
    ) -> eyre::Result<WorkerGuard> {
        let (writer, guard) = file_info.create_log_writer()?;
        let filter = build_env_filter(None, filters)?;
        self.inner.push(format.apply(filter, None, Some(writer)));
        Ok(guard)
    }
}

impl std::fmt::Debug for Layers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layers").field("layers", &self.inner.len()).finish()
    }
}

/// Where file logs go.
#[derive(Debug, Clone)]
pub struct FileInfo {
    dir: PathBuf,
    file_name: String,
}

impl FileInfo {
    /// Log to `file_name` in `dir`, rotated daily.
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self { dir: dir.into(), file_name: file_name.into() }
    }

    /// The log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create_log_writer(
        &self,
    ) -> eyre::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.dir)?;
        let appender = rolling::daily(&self.dir, &self.file_name);
        Ok(tracing_appender::non_blocking(appender))
    }
}

/// Builds an [`EnvFilter`] from `RUST_LOG` on top of `default_directive`, the quiet defaults and
/// the comma separated `directives`.
pub(crate) fn build_env_filter(
    default_directive: Option<Directive>,
    directives: &str,
) -> eyre::Result<EnvFilter> {
    let env_filter = match default_directive {
        Some(directive) => EnvFilter::builder().with_default_directive(directive).from_env_lossy(),
        None => EnvFilter::builder().from_env_lossy(),
    };

    DEFAULT_ENV_FILTER_DIRECTIVES
        .into_iter()
        .chain(directives.split(',').filter(|directive| !directive.is_empty()))
        .try_fold(env_filter, |env_filter, directive| {
            Ok(env_filter.add_directive(directive.parse()?))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_directives_are_parsed() {
        let filter = build_env_filter(None, "sync::stage_loop=debug,mining=trace").unwrap();
        assert!(filter.to_string().contains("sync::stage_loop=debug"));
        assert!(filter.to_string().contains("mining=trace"));
    }

    #[test]
    fn invalid_directive_is_an_error() {
        assert!(build_env_filter(None, "sync=loud").is_err());
    }

    #[test]
    fn file_layer_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let info = FileInfo::new(dir.path().join("logs"), "stageloop.log");
        let mut layers = Layers::new();
        let _guard = layers.file(LogFormat::Json, "", info.clone()).unwrap();
        assert!(info.dir().is_dir());
        assert_eq!(layers.into_inner().len(), 1);
    }
}
