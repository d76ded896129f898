//! Local I/O failures
//!
//! Raised while touching the SQLite file, the images directory or a media
//! file handed to the hasher. Socket errors stay in
//! [`ProtocolError`](crate::protocol::ProtocolError).

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What was being touched when the error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoTarget {
    /// The command database or its directory
    Database,
    /// A downloaded image or the images directory
    Image,
    /// A local file being hashed
    MediaFile,
}

impl fmt::Display for IoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Database => "open database",
            Self::Image => "store image",
            Self::MediaFile => "hash",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    FileNotFound,
    PermissionDenied,
    StorageFull,
    Other,
}

#[derive(Error, Debug)]
#[error("{}", describe(self))]
pub struct IoError {
    pub kind: IoErrorKind,
    pub target: Option<IoTarget>,
    pub path: Option<PathBuf>,
    #[source]
    pub source: Option<std::io::Error>,
}

impl IoError {
    pub fn from_std(source: std::io::Error) -> Self {
        let kind = match source.kind() {
            std::io::ErrorKind::NotFound => IoErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            std::io::ErrorKind::StorageFull => IoErrorKind::StorageFull,
            _ => IoErrorKind::Other,
        };
        Self {
            kind,
            target: None,
            path: None,
            source: Some(source),
        }
    }

    /// A media file queued for hashing is gone
    pub fn media_not_found(path: &Path) -> Self {
        Self {
            kind: IoErrorKind::FileNotFound,
            target: Some(IoTarget::MediaFile),
            path: Some(path.to_path_buf()),
            source: None,
        }
    }

    /// Attach what was being touched, and where
    pub fn at(mut self, target: IoTarget, path: &Path) -> Self {
        self.target = Some(target);
        self.path = Some(path.to_path_buf());
        self
    }

    /// Retrying later will not help until someone fixes the file system
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.kind,
            IoErrorKind::FileNotFound | IoErrorKind::PermissionDenied
        )
    }
}

fn describe(error: &IoError) -> String {
    let cause = match (error.kind, &error.source) {
        (IoErrorKind::FileNotFound, _) => "file not found".to_string(),
        (IoErrorKind::PermissionDenied, _) => "permission denied".to_string(),
        (IoErrorKind::StorageFull, _) => "no space left on device".to_string(),
        (IoErrorKind::Other, Some(source)) => source.to_string(),
        (IoErrorKind::Other, None) => "I/O error".to_string(),
    };
    match (error.target, &error.path) {
        (Some(target), Some(path)) => format!("Cannot {target} {}: {cause}", path.display()),
        (None, Some(path)) => format!("{}: {cause}", path.display()),
        (Some(target), None) => format!("Cannot {target}: {cause}"),
        (None, None) => cause,
    }
}
