//! Per-request working directories and what the portal reads back from them.
//!
//! Layout under the configured base directory:
//!
//! ```text
//! <base>/<request_id>/<output file>
//! <base>/<request_id>/std.out
//! <base>/<request_id>/std.err
//! <base>/<request_id>/.done        completion marker
//! ```

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tokio::fs;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::{RequestId, RequestStatus};

pub const ARCHIVE_NAME: &str = "results.zip";
const MARKER: &str = ".done";

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("output file '{0}' not found")]
    MissingOutput(String),
    #[error("log file '{0}' not found")]
    MissingLog(&'static str),
    #[error("invalid file name '{0}'")]
    InvalidName(String),
    #[error("failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn file_name(self) -> &'static str {
        match self {
            LogStream::Stdout => "std.out",
            LogStream::Stderr => "std.err",
        }
    }
}

impl FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            other => Err(format!("unknown log stream '{other}', expected 'stdout' or 'stderr'")),
        }
    }
}

/// Root of all per-request directories.
#[derive(Debug, Clone)]
pub struct WorkDir {
    base: PathBuf,
}

impl WorkDir {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn request_dir(&self, id: RequestId) -> PathBuf {
        self.base.join(id.to_string())
    }

    /// Resolves a declared output file. Only bare file names are accepted.
    pub fn output_path(&self, id: RequestId, name: &str) -> Result<PathBuf, ResultsError> {
        let bare = Path::new(name).file_name().and_then(|n| n.to_str());
        if bare != Some(name) || name == MARKER {
            return Err(ResultsError::InvalidName(name.to_string()));
        }
        Ok(self.request_dir(id).join(name))
    }

    pub fn log_path(&self, id: RequestId, stream: LogStream) -> PathBuf {
        self.request_dir(id).join(stream.file_name())
    }

    /// Atomically writes the completion marker holding the final status.
    pub async fn publish(&self, id: RequestId, status: RequestStatus) -> Result<(), ResultsError> {
        let dir = self.request_dir(id);
        fs::create_dir_all(&dir).await?;
        let tmp = dir.join(".done.tmp");
        fs::write(&tmp, status.as_str()).await?;
        fs::rename(&tmp, dir.join(MARKER)).await?;
        Ok(())
    }

    pub async fn is_published(&self, id: RequestId) -> bool {
        fs::try_exists(self.request_dir(id).join(MARKER)).await.unwrap_or(false)
    }

    /// Zips every declared output file under its bare name. A single missing
    /// file fails the whole archive.
    pub async fn package(&self, id: RequestId, output_files: &[String]) -> Result<Vec<u8>, ResultsError> {
        let mut entries = Vec::with_capacity(output_files.len());
        for name in output_files {
            let path = self.output_path(id, name)?;
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(ResultsError::MissingOutput(name.clone()));
                }
                Err(e) => return Err(e.into()),
            };
            entries.push((name.as_str(), bytes));
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(name, options)?;
            zip.write_all(&bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }

    pub async fn read_log(&self, id: RequestId, stream: LogStream) -> Result<Vec<u8>, ResultsError> {
        match fs::read(self.log_path(id, stream)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ResultsError::MissingLog(stream.file_name())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn write(dir: &WorkDir, id: RequestId, name: &str, content: &[u8]) {
        let path = dir.request_dir(id);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn archive_holds_exactly_the_declared_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = WorkDir::new(tmp.path());
        write(&dir, 5, "a.txt", b"alpha");
        write(&dir, 5, "b.txt", b"beta\n");
        write(&dir, 5, "ignored.txt", b"nope");

        let bytes = dir.package(5, &["a.txt".to_string(), "b.txt".to_string()]).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut content = String::new();
        archive.by_name("b.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "beta\n");
        content.clear();
        archive.by_name("a.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "alpha");
    }

    #[tokio::test]
    async fn missing_output_fails_the_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = WorkDir::new(tmp.path());
        write(&dir, 5, "a.txt", b"alpha");

        let err = dir.package(5, &["a.txt".to_string(), "b.txt".to_string()]).await.unwrap_err();
        assert!(matches!(err, ResultsError::MissingOutput(name) if name == "b.txt"));
    }

    #[tokio::test]
    async fn output_names_cannot_escape_the_request_dir() {
        let dir = WorkDir::new("/srv/portal");
        assert!(matches!(dir.output_path(1, "../2/a.txt"), Err(ResultsError::InvalidName(_))));
        assert!(matches!(dir.output_path(1, "/etc/passwd"), Err(ResultsError::InvalidName(_))));
        assert_eq!(dir.output_path(1, "a.txt").unwrap(), PathBuf::from("/srv/portal/1/a.txt"));
    }

    #[tokio::test]
    async fn logs_are_read_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = WorkDir::new(tmp.path());
        write(&dir, 3, "std.out", b"line one\nline two\n");

        assert_eq!(dir.read_log(3, LogStream::Stdout).await.unwrap(), b"line one\nline two\n");
        assert!(matches!(dir.read_log(3, LogStream::Stderr).await, Err(ResultsError::MissingLog("std.err"))));
        assert!(matches!(dir.read_log(4, LogStream::Stdout).await, Err(ResultsError::MissingLog(_))));
    }

    #[tokio::test]
    async fn publish_writes_the_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = WorkDir::new(tmp.path());
        assert!(!dir.is_published(8).await);
        dir.publish(8, RequestStatus::Completed).await.unwrap();
        assert!(dir.is_published(8).await);
        assert!(!dir.request_dir(8).join(".done.tmp").exists());
    }

    #[test]
    fn log_stream_selectors() {
        assert_eq!("stdout".parse::<LogStream>().unwrap().file_name(), "std.out");
        assert_eq!("stderr".parse::<LogStream>().unwrap().file_name(), "std.err");
        assert!("stdin".parse::<LogStream>().is_err());
    }
}
