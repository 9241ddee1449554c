//! Rolling Logger
//!
//! Installs a global `tracing` subscriber that writes to `<dir>/<app>.log`,
//! rotates the file once it grows past a size limit, and keeps the most
//! recent lines in a circular buffer for in-app diagnostics.
//!
//! `log` records are bridged into the same subscriber, so the plain
//! `info`/`warn`/`error` helpers and `tracing` macros end up in one file.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 5;
pub const DEFAULT_BUFFER_LINES: usize = 500;

static LOGGER: OnceLock<RollingWriter> = OnceLock::new();

/// Errors raised while setting up or using the logger
#[derive(Debug)]
pub enum LoggerError {
    Io(io::Error),
    AlreadyInitialized,
    NotInitialized,
}

impl std::fmt::Display for LoggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggerError::Io(e) => write!(f, "Log file error: {}", e),
            LoggerError::AlreadyInitialized => write!(f, "Logger already initialized"),
            LoggerError::NotInitialized => write!(f, "Logger not initialized"),
        }
    }
}

impl std::error::Error for LoggerError {}

impl From<io::Error> for LoggerError {
    fn from(e: io::Error) -> Self {
        LoggerError::Io(e)
    }
}

/// Rotation and buffering limits
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Rotate once the active file would exceed this many bytes
    pub max_file_size: u64,
    /// Rotated files kept on disk (the active file is not counted)
    pub max_files: usize,
    /// Lines kept in the in-memory buffer
    pub buffer_lines: usize,
    pub level: LevelFilter,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_files: DEFAULT_MAX_FILES,
            buffer_lines: DEFAULT_BUFFER_LINES,
            level: LevelFilter::INFO,
        }
    }
}

/// Initialize the global logger with default limits
pub fn init_logger(log_dir: PathBuf, app_name: &str) -> Result<(), LoggerError> {
    init_logger_with(log_dir, app_name, LoggerConfig::default())
}

/// Initialize the global logger
pub fn init_logger_with(
    log_dir: PathBuf,
    app_name: &str,
    config: LoggerConfig,
) -> Result<(), LoggerError> {
    if LOGGER.get().is_some() {
        return Err(LoggerError::AlreadyInitialized);
    }

    let level = config.level;
    let writer = RollingWriter::open(&log_dir, app_name, &config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer.clone())
                .with_ansi(false)
                .with_filter(level),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(level),
        )
        .try_init()
        .map_err(|_| LoggerError::AlreadyInitialized)?;

    LOGGER
        .set(writer)
        .map_err(|_| LoggerError::AlreadyInitialized)
}

pub fn info(msg: &str) -> Result<(), LoggerError> {
    ensure_initialized()?;
    log::info!("{}", msg);
    Ok(())
}

pub fn warn(msg: &str) -> Result<(), LoggerError> {
    ensure_initialized()?;
    log::warn!("{}", msg);
    Ok(())
}

pub fn error(msg: &str) -> Result<(), LoggerError> {
    ensure_initialized()?;
    log::error!("{}", msg);
    Ok(())
}

/// Most recent log lines, oldest first. Empty before initialization.
pub fn recent_lines() -> Vec<String> {
    LOGGER.get().map(RollingWriter::recent_lines).unwrap_or_default()
}

/// Path of the active log file, if the logger is running
pub fn log_file_path() -> Option<PathBuf> {
    LOGGER.get().and_then(RollingWriter::current_path)
}

fn ensure_initialized() -> Result<(), LoggerError> {
    LOGGER.get().map(|_| ()).ok_or(LoggerError::NotInitialized)
}

/// Shared writer handed to the fmt layer
#[derive(Clone)]
pub struct RollingWriter {
    inner: Arc<Mutex<WriterState>>,
}

struct WriterState {
    file: RollingFile,
    recent: VecDeque<String>,
    capacity: usize,
    partial: String,
}

impl RollingWriter {
    pub fn open(dir: &Path, app_name: &str, config: &LoggerConfig) -> io::Result<Self> {
        let file = RollingFile::open(dir, app_name, config.max_file_size, config.max_files)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(WriterState {
                file,
                recent: VecDeque::with_capacity(config.buffer_lines),
                capacity: config.buffer_lines.max(1),
                partial: String::new(),
            })),
        })
    }

    pub fn recent_lines(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(state) => state.recent.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.inner.lock().ok().map(|state| state.file.current_path())
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        state.file.write_bytes(buf)?;
        state.remember(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        state.file.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl WriterState {
    fn remember(&mut self, buf: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(buf));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            if self.recent.len() == self.capacity {
                self.recent.pop_front();
            }
            self.recent.push_back(line);
        }
    }
}

struct RollingFile {
    dir: PathBuf,
    base_name: String,
    max_size: u64,
    max_files: usize,
    file: File,
    size: u64,
}

impl RollingFile {
    fn open(dir: &Path, app_name: &str, max_size: u64, max_files: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let base_name = sanitize_name(app_name);
        let path = dir.join(format!("{}.log", base_name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            base_name,
            max_size,
            max_files,
            file,
            size,
        })
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.size > 0 && self.size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let mut target = self.dir.join(format!("{}.{}.log", self.base_name, stamp));
        let mut n = 1;
        while target.exists() {
            target = self
                .dir
                .join(format!("{}.{}-{}.log", self.base_name, stamp, n));
            n += 1;
        }
        fs::rename(self.current_path(), &target)?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.size = 0;
        self.prune()
    }

    /// Delete the oldest rotated files beyond `max_files`
    fn prune(&self) -> io::Result<()> {
        let prefix = format!("{}.", self.base_name);
        let active = format!("{}.log", self.base_name);

        let mut rotated: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".log") && n != active)
                    .unwrap_or(false)
            })
            .collect();

        rotated.sort();
        while rotated.len() > self.max_files {
            let oldest = rotated.remove(0);
            fs::remove_file(oldest)?;
        }
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "app".to_string()
    } else {
        cleaned
    }
}
