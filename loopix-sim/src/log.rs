//! Log configuration (ambient A.2). Mirrors the teacher's
//! `LogFormat`/`LogOutput`/`config_tracing` shape, but builds its layer with
//! plain `tracing_subscriber::fmt` rather than `nomos_tracing`'s
//! file/writer layer helpers, which depend on a private registry crate this
//! crate has no access to.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Default, Copy, Clone)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" => Ok(LogFormat::Plain),
            _ => Err(anyhow::anyhow!("unknown log format: {s}")),
        }
    }
}

#[derive(Default, Clone)]
pub enum LogOutput {
    #[default]
    StdOut,
    StdErr,
    File(PathBuf),
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::StdOut),
            "stderr" => Ok(Self::StdErr),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

/// Initializes the global tracing subscriber. The returned guard must be
/// kept alive for the process lifetime when logging to a file (it flushes
/// the non-blocking writer on drop).
pub fn config_tracing(fmt: LogFormat, log_to: &LogOutput) -> anyhow::Result<WorkerGuard> {
    let (non_blocking, guard) = match log_to {
        LogOutput::StdOut => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::StdErr => tracing_appender::non_blocking(std::io::stderr()),
        LogOutput::File(path) => {
            let file = std::fs::File::create(path)?;
            tracing_appender::non_blocking(file)
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_writer(non_blocking);

    match fmt {
        LogFormat::Json => builder.json().init(),
        LogFormat::Plain => builder.init(),
    }

    Ok(guard)
}
