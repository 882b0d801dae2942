use indicatif::MultiProgress;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// Target prefix shared by the library and this binary.
const CCLIB_TARGET: &str = "cclib";

/// The log file always records the full wire trace of the proxy session.
const FILE_DIRECTIVES: &str = "info,cclib=trace";

/// Progress bars currently on the terminal, if any.
static PROGRESS_BAR: LazyLock<Mutex<Option<MultiProgress>>> = LazyLock::new(|| Mutex::new(None));

/// Keeps the JSON log writer alive until the command is done.
pub struct LogFile {
    _worker: WorkerGuard,
    path: PathBuf,
}

impl Drop for LogFile {
    fn drop(&mut self) {
        tracing::info!("Wrote log to {}", self.path.display());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[clap(rename_all = "UPPER")]
#[serde(rename_all = "UPPERCASE")]
pub enum LevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LevelFilter {
    fn as_directive(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Filter directives for the terminal.
///
/// Levels above WARN only open up the `cclib` targets, so serial port and
/// config crates stay quiet.
fn terminal_directives(level: LevelFilter) -> String {
    match level {
        LevelFilter::Off | LevelFilter::Error | LevelFilter::Warn => {
            level.as_directive().to_string()
        }
        _ => format!("warn,{CCLIB_TARGET}={}", level.as_directive()),
    }
}

/// Without a level, `RUST_LOG` decides.
fn terminal_filter(level: Option<LevelFilter>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::builder().parse_lossy(terminal_directives(level)),
        None => EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
            .from_env_lossy(),
    }
}

/// Drops one trailing line ending, the terminal adds its own.
fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

// Log lines go above the progress bars instead of through them.
struct ProgressBarWriter;

impl std::io::Write for ProgressBarWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        eprintln(strip_line_ending(&String::from_utf8_lossy(buf)));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Installs the terminal logger and, with `log_path`, a JSON log file.
pub fn setup_logging(
    log_path: Option<&Path>,
    level: Option<LevelFilter>,
) -> anyhow::Result<Option<LogFile>> {
    let terminal = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(|| ProgressBarWriter)
        .with_filter(terminal_filter(level));

    let Some(log_path) = log_path else {
        tracing_subscriber::registry().with(terminal).init();
        return Ok(None);
    };

    let (writer, worker) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .lossy(false)
        .buffered_lines_limit(128 * 1024)
        .finish(File::create(log_path)?);

    let file = tracing_subscriber::fmt::layer()
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(writer)
        .with_filter(EnvFilter::builder().parse_lossy(FILE_DIRECTIVES));

    tracing_subscriber::registry().with(terminal).with(file).init();
    tracing::info!("Writing log to {}", log_path.display());

    Ok(Some(LogFile {
        _worker: worker,
        path: log_path.to_path_buf(),
    }))
}

pub fn set_progress_bar(progress: MultiProgress) {
    *PROGRESS_BAR.lock() = Some(progress);
}

pub fn clear_progress_bar() {
    *PROGRESS_BAR.lock() = None;
}

enum Stream {
    Stdout,
    Stderr,
}

fn emit(message: &str, stream: Stream) {
    let locked = PROGRESS_BAR.lock();
    match (locked.as_ref(), stream) {
        (Some(progress), _) => {
            let _ = progress.println(message);
        }
        (None, Stream::Stdout) => println!("{message}"),
        (None, Stream::Stderr) => eprintln!("{message}"),
    }
}

/// Writes a message to stderr, above the progress bars if any are displayed.
pub fn eprintln(message: impl AsRef<str>) {
    emit(message.as_ref(), Stream::Stderr)
}

/// Writes a message to stdout, above the progress bars if any are displayed.
pub fn println(message: impl AsRef<str>) {
    emit(message.as_ref(), Stream::Stdout)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(LevelFilter::Off, "off")]
    #[test_case(LevelFilter::Error, "error")]
    #[test_case(LevelFilter::Warn, "warn")]
    #[test_case(LevelFilter::Info, "warn,cclib=info")]
    #[test_case(LevelFilter::Debug, "warn,cclib=debug")]
    #[test_case(LevelFilter::Trace, "warn,cclib=trace")]
    fn verbose_levels_only_open_cclib_targets(level: LevelFilter, expected: &str) {
        let directives = terminal_directives(level);

        assert_eq!(directives, expected);
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn file_directives_parse() {
        assert!(EnvFilter::try_new(FILE_DIRECTIVES).is_ok());
    }

    #[test_case("Erasing\n", "Erasing")]
    #[test_case("Erasing\r\n", "Erasing")]
    #[test_case("two\n\n", "two\n")]
    #[test_case("plain", "plain")]
    fn one_line_ending_is_stripped(line: &str, expected: &str) {
        assert_eq!(strip_line_ending(line), expected);
    }
}
