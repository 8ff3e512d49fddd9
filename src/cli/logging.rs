//! Tracing setup for the command-line front end

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Console verbosity picked on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors
    Quiet,
    /// The configured level
    Normal,
    /// Debug output
    Verbose,
}

impl Verbosity {
    /// From the `-q` / `-v` flags; `-v` wins
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Self::Verbose,
            (false, true) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    /// Filter directive, `configured` for `Normal`
    pub fn directive(self, configured: &str) -> String {
        match self {
            Self::Quiet => "warn".to_string(),
            Self::Normal => configured.to_string(),
            Self::Verbose => "debug".to_string(),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the directive. Logs go to stderr and, when
/// `log_dir` is set, to a daily file. Keep the returned guard alive until
/// exit so the file writer flushes.
pub fn init_logging(
    verbosity: Verbosity,
    configured_level: &str,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let directive = verbosity.directive(configured_level);
    let filter = || EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directive));

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter()?);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "portpilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter()?);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;

    Ok(guard)
}
