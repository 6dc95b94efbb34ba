// src/logging.rs
//
// Logs go to stderr, to syslog, or are appended to a file that can be
// re-opened on SIGHUP so external log rotation works.

use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Append-only log file that can be swapped for a fresh handle on the same path.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFile {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-open the path, creating the file if it was moved or deleted.
    pub fn reopen(&self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        let mut file = self.lock();
        let _ = file.flush();
        *file = fresh;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, File> {
        // A panic mid-write leaves the File itself intact.
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for &LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// `MakeWriter` handle shared between the subscriber and the SIGHUP watcher.
#[derive(Debug, Clone)]
pub struct SharedLogFile(pub Arc<LogFile>);

impl<'a> MakeWriter<'a> for SharedLogFile {
    type Writer = &'a LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        &self.0
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug {
        "tcp_fallback=debug"
    } else {
        "tcp_fallback=info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Returns the log file handle when one is used.
pub fn init_logging(config: &Config) -> Result<Option<Arc<LogFile>>> {
    let filter = env_filter(config.debug);

    if config.syslog {
        init_syslog(filter)?;
        return Ok(None);
    }

    match config.log_file.as_deref() {
        Some(path) => {
            let file = Arc::new(
                LogFile::open(path)
                    .with_context(|| format!("Failed to open log file {}", path.display()))?,
            );
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(SharedLogFile(file.clone()))
                .try_init()
                .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
            Ok(Some(file))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .try_init()
                .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))?;
            Ok(None)
        }
    }
}

#[cfg(unix)]
fn init_syslog(filter: EnvFilter) -> Result<()> {
    let sink = SyslogSink::connect(env!("CARGO_PKG_NAME"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .without_time()
        .with_writer(SharedSyslog(Arc::new(sink)))
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

#[cfg(not(unix))]
fn init_syslog(_filter: EnvFilter) -> Result<()> {
    anyhow::bail!("syslog output is only available on unix")
}

/// Syslog priority an event is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

impl Severity {
    pub fn from_level(level: &tracing::Level) -> Self {
        if *level == tracing::Level::ERROR {
            Severity::Error
        } else if *level == tracing::Level::WARN {
            Severity::Warning
        } else if *level == tracing::Level::INFO {
            Severity::Info
        } else {
            Severity::Debug
        }
    }
}

/// One formatted event, without the trailing line break the formatter adds.
fn event_text(buf: &[u8]) -> Cow<'_, str> {
    match String::from_utf8_lossy(buf) {
        Cow::Borrowed(text) => Cow::Borrowed(text.trim_end()),
        Cow::Owned(text) => Cow::Owned(text.trim_end().to_string()),
    }
}

/// Connection to the local syslog daemon.
#[cfg(unix)]
pub struct SyslogSink {
    logger: Mutex<syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>>,
}

#[cfg(unix)]
impl SyslogSink {
    pub fn connect(process: &str) -> Result<Self> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: process.to_string(),
            pid: std::process::id(),
        };
        let logger =
            syslog::unix(formatter).map_err(|e| anyhow!("Failed to connect to syslog: {}", e))?;

        Ok(Self {
            logger: Mutex::new(logger),
        })
    }

    fn send(&self, severity: Severity, message: &str) -> io::Result<()> {
        let mut logger = self.logger.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let sent = match severity {
            Severity::Error => logger.err(message),
            Severity::Warning => logger.warning(message),
            Severity::Info => logger.info(message),
            Severity::Debug => logger.debug(message),
        };
        sent.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

/// `MakeWriter` that sends each event to syslog at the event's severity.
#[cfg(unix)]
#[derive(Clone)]
pub struct SharedSyslog(pub Arc<SyslogSink>);

#[cfg(unix)]
pub struct SyslogLine<'a> {
    sink: &'a SyslogSink,
    severity: Severity,
}

#[cfg(unix)]
impl Write for SyslogLine<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.send(self.severity, &event_text(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl<'a> MakeWriter<'a> for SharedSyslog {
    type Writer = SyslogLine<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine {
            sink: &self.0,
            severity: Severity::Info,
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        SyslogLine {
            sink: &self.0,
            severity: Severity::from_level(meta.level()),
        }
    }
}

/// Re-open the log file every time the process receives `SIGHUP`.
#[cfg(unix)]
pub fn watch_sighup(log_file: Option<Arc<LogFile>>, shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    if let Some(file) = &log_file {
                        if let Err(e) = file.reopen() {
                            error!("Failed to re-open log file {}: {}", file.path().display(), e);
                            continue;
                        }
                    }
                    info!("SIGHUP received");
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
pub fn watch_sighup(_log_file: Option<Arc<LogFile>>, _shutdown: CancellationToken) -> Result<()> {
    Ok(())
}
