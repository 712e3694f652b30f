//! Logging setup for the Lumen binary.
//!
//! Two layers: a size-rotated log file under `$LUMEN_HOME/logs` that always
//! records at the `RUST_LOG` level, and stderr whose verbosity follows the
//! command line.

use anyhow::{anyhow, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "lumen=info,lumen_worker=info,lumen_cluster=info,lumen_store=warn";
const KEEP_GENERATIONS: usize = 4;
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;

pub struct LogConfig<'a> {
    /// Base name of the log file (`<app_name>.log`)
    pub app_name: &'a str,
    pub verbose: bool,
    /// Only warnings and errors on stderr
    pub quiet: bool,
    /// Overrides `$LUMEN_HOME/logs`
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber. Fails if the log directory is unusable or a
/// subscriber is already installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir()?,
    };
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let writer = RotatingWriter::open(&dir, config.app_name, KEEP_GENERATIONS, ROTATE_AT_BYTES)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new(format!("{},lumen=debug,lumen_worker=debug", DEFAULT_LOG_FILTER))
    } else if config.quiet {
        EnvFilter::new("warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(config.verbose)
                .with_filter(console_filter),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(())
}

/// Lumen home directory: `$LUMEN_HOME`, else `~/.lumen`.
pub fn lumen_home() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("LUMEN_HOME") {
        return Ok(PathBuf::from(path));
    }
    dirs::home_dir()
        .map(|home| home.join(".lumen"))
        .ok_or_else(|| anyhow!("Could not determine home directory; set LUMEN_HOME"))
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(lumen_home()?.join("logs"))
}

/// Append-only log file that shifts `<name>.log` to `<name>.log.1`,
/// `.1` to `.2` and so on once it grows past `limit` bytes.
struct RotatingLog {
    dir: PathBuf,
    name: String,
    generations: usize,
    limit: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingLog {
    fn open(dir: &Path, name: &str, generations: usize, limit: u64) -> io::Result<Self> {
        let mut log = Self {
            dir: dir.to_path_buf(),
            name: file_stem(name),
            generations,
            limit,
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written >= log.limit {
            log.shift()?;
        }
        Ok(log)
    }

    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.name)),
            n => self.dir.join(format!("{}.log.{}", self.name, n)),
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn shift(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        if self.generations > 0 {
            let oldest = self.path(self.generations);
            if oldest.exists() {
                fs::remove_file(oldest)?;
            }
            for generation in (0..self.generations).rev() {
                let from = self.path(generation);
                if from.exists() {
                    fs::rename(from, self.path(generation + 1))?;
                }
            }
        } else {
            fs::remove_file(self.path(0))?;
        }
        self.reopen()
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.shift()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file closed"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handle; every event locks the shared file.
#[derive(Clone)]
struct RotatingWriter(Arc<Mutex<RotatingLog>>);

impl RotatingWriter {
    fn open(dir: &Path, name: &str, generations: usize, limit: u64) -> io::Result<Self> {
        let log = RotatingLog::open(dir, name, generations, limit)?;
        Ok(Self(Arc::new(Mutex::new(log))))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer poisoned"))?
            .flush()
    }
}

fn file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "lumen".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_replaces_separators() {
        assert_eq!(file_stem("lumen"), "lumen");
        assert_eq!(file_stem("../evil name"), "___evil_name");
        assert_eq!(file_stem(""), "lumen");
    }

    #[test]
    fn test_rotation_keeps_bounded_generations() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RotatingLog::open(dir.path(), "app", 2, 16).unwrap();
        for _ in 0..5 {
            log.write_all(b"0123456789abcdef").unwrap();
        }
        log.flush().unwrap();

        assert!(dir.path().join("app.log").exists());
        assert!(dir.path().join("app.log.1").exists());
        assert!(dir.path().join("app.log.2").exists());
        assert!(!dir.path().join("app.log.3").exists());
        let current = fs::read(dir.path().join("app.log")).unwrap();
        assert_eq!(current.len(), 16);
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = RotatingLog::open(dir.path(), "app", 1, 1024).unwrap();
            log.write_all(b"first\n").unwrap();
        }
        let mut log = RotatingLog::open(dir.path(), "app", 1, 1024).unwrap();
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();
        let text = fs::read_to_string(dir.path().join("app.log")).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
