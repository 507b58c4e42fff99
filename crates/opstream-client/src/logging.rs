use chrono::{NaiveDate, Utc};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub const LOG_LEVEL_ENV: &str = "OPSTREAM_LOG_LEVEL";

type SharedFile = Arc<Mutex<File>>;

/// Keeps the daily log file open for the life of the process.
pub struct LogGuard {
    file: Option<SharedFile>,
    path: Option<PathBuf>,
}

impl LogGuard {
    fn stderr_only() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `OPSTREAM_LOG_LEVEL`,
/// which wins over `info`. An unusable log dir degrades to stderr only.
pub fn init_logging(log_dir: &str) -> Option<LogGuard> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_dir, Utc::now().date_naive()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: dir={log_dir} error={err}");
            LogGuard::stderr_only()
        }
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || TeeWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

/// Opens `<log_dir>/opstream-YYYYMMDD.log` for appending. An empty dir means
/// no file.
pub fn open_log_file(log_dir: &str, date: NaiveDate) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard::stderr_only());
    }
    let dir = PathBuf::from(log_dir.trim());
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("opstream-{}.log", date.format("%Y%m%d")));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
        path: Some(path),
    })
}

/// Copies every log line to stderr and, when configured, the log file.
/// stdout stays free for the ledger summary.
struct TeeWriter {
    stderr: io::Stderr,
    file: Option<SharedFile>,
}

impl TeeWriter {
    fn new(file: Option<SharedFile>) -> Self {
        Self {
            stderr: io::stderr(),
            file,
        }
    }

    fn with_file(&self, op: impl FnOnce(&mut File) -> io::Result<()>) {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = op(&mut file);
        }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stderr.write_all(buf);
        self.with_file(|file| file.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stderr.flush();
        self.with_file(|file| file.flush());
        Ok(())
    }
}
