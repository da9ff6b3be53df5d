use crate::layers::BoxedLayer;
use clap::ValueEnum;
use std::fmt;
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Output format of a log layer.
#[derive(Debug, Copy, Clone, ValueEnum, Eq, PartialEq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// `key=value` pairs.
    #[value(name = "logfmt")]
    LogFmt,
    /// Human readable lines.
    Terminal,
}

impl LogFormat {
    /// Builds a layer of this format filtered by `filter`, writing to `writer` or stdout.
    ///
    /// `color` enables ANSI colors unless it is `"never"`; `RUST_LOG_STYLE` takes precedence.
    /// Targets are printed when `RUST_LOG_TARGET` is set to anything but `0`, or, if unset,
    /// whenever the filter lets debug events through.
    pub fn apply(
        &self,
        filter: EnvFilter,
        color: Option<String>,
        writer: Option<NonBlocking>,
    ) -> BoxedLayer<Registry> {
        let ansi = color.is_some_and(|color| {
            std::env::var("RUST_LOG_STYLE").map(|style| style != "never").unwrap_or(color != "never")
        });
        let target = std::env::var("RUST_LOG_TARGET").map(|val| val != "0").unwrap_or_else(|_| {
            filter.max_level_hint().map_or(true, |max_level| max_level > tracing::Level::INFO)
        });

        match self {
            Self::Json => {
                let layer = tracing_subscriber::fmt::layer().json().with_target(target);
                match writer {
                    Some(writer) => layer.with_writer(writer).with_filter(filter).boxed(),
                    None => layer.with_filter(filter).boxed(),
                }
            }
            Self::LogFmt => tracing_logfmt::layer().with_filter(filter).boxed(),
            Self::Terminal => {
                let layer = tracing_subscriber::fmt::layer().with_ansi(ansi).with_target(target);
                match writer {
                    // no escape codes in files
                    Some(writer) => {
                        layer.with_ansi(false).with_writer(writer).with_filter(filter).boxed()
                    }
                    None => layer.with_filter(filter).boxed(),
                }
            }
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::LogFmt => write!(f, "logfmt"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_the_command_line_names() {
        for format in [LogFormat::Json, LogFormat::LogFmt, LogFormat::Terminal] {
            assert_eq!(LogFormat::from_str(&format.to_string(), false), Ok(format));
        }
        assert!(LogFormat::from_str("yaml", true).is_err());
    }
}
