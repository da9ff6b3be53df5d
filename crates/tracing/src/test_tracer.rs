use crate::Tracer;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Writes through the test harness' captured output, filtered by `RUST_LOG`.
///
/// Installing it twice is not an error.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct TestTracer;

impl Tracer for TestTracer {
    fn init(self) -> eyre::Result<Option<WorkerGuard>> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Ok(None)
    }
}
