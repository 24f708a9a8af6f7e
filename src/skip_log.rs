//! Append-only per-combination log of skipped and failed items.
//!
//! Items run concurrently, so every line goes through one writer thread. The
//! file is created on the first line; a combination with nothing to report
//! leaves no file behind.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum SkipLogError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("skip log channel closed")]
    Closed,
    #[error("skip log writer failed: {0}")]
    Join(String),
}

/// Cloneable handle used by pipeline tasks to append lines.
#[derive(Clone)]
pub struct SkipLog {
    sender: mpsc::Sender<String>,
}

/// Owner of the writer thread. Join it after every handle has been dropped.
pub struct SkipLogWorker {
    handle: Option<std::thread::JoinHandle<Result<usize, SkipLogError>>>,
}

impl SkipLogWorker {
    /// Wait for the writer to drain. Returns the number of lines written.
    pub fn join(mut self) -> Result<usize, SkipLogError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(SkipLogError::Join("skip log writer panicked".to_string())),
            },
            None => Ok(0),
        }
    }
}

impl SkipLog {
    pub fn open(path: impl AsRef<Path>) -> (Self, SkipLogWorker) {
        let path = path.as_ref().to_path_buf();
        let (sender, receiver) = mpsc::channel::<String>();
        let handle = std::thread::spawn(move || write_loop(path, receiver));
        (
            Self { sender },
            SkipLogWorker {
                handle: Some(handle),
            },
        )
    }

    /// Queue one line. Embedded newlines are flattened so each entry stays on
    /// one line.
    pub fn append(&self, line: impl Into<String>) -> Result<(), SkipLogError> {
        let line: String = line.into();
        let line = if line.contains('\n') {
            line.replace("\r\n", " ").replace('\n', " ")
        } else {
            line
        };
        self.sender.send(line).map_err(|_| SkipLogError::Closed)
    }
}

fn write_loop(path: PathBuf, receiver: mpsc::Receiver<String>) -> Result<usize, SkipLogError> {
    let io_err = |source: std::io::Error| SkipLogError::Io {
        path: path.clone(),
        source,
    };
    let mut writer: Option<BufWriter<File>> = None;
    let mut written = 0usize;

    for line in receiver {
        if writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_err)?;
            writer = Some(BufWriter::new(file));
        }
        let Some(out) = writer.as_mut() else {
            continue;
        };
        writeln!(out, "{line}").map_err(io_err)?;
        written += 1;
    }

    if let Some(mut out) = writer {
        out.flush().map_err(io_err)?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_lines_means_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skipped.log");
        let (log, worker) = SkipLog::open(&path);
        drop(log);
        assert_eq!(worker.join().unwrap(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn multiline_entries_are_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skipped.log");
        let (log, worker) = SkipLog::open(&path);
        log.append("first\nsecond").unwrap();
        drop(log);
        assert_eq!(worker.join().unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first second\n");
    }
}
