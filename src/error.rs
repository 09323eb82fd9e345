use std::io;
use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes, used to pick a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    MalformedResponse,
    UnsupportedFormat,
    Filesystem,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Transport => 3,
            ErrorKind::MalformedResponse => 4,
            ErrorKind::Filesystem => 5,
            ErrorKind::UnsupportedFormat => 6,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("invalid url {0:?}")]
    InvalidUrl(String),
    #[error("malformed listing response")]
    Malformed(#[from] serde_json::Error),
    #[error("decode image")]
    Decode(#[source] image::ImageError),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("unsupported extension: {0:?}")]
    UnsupportedExtension(String),
    #[error("encode image")]
    Encode(#[source] image::ImageError),
    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } | Error::Status { .. } | Error::InvalidUrl(_) => {
                ErrorKind::Transport
            }
            Error::Malformed(_) => ErrorKind::MalformedResponse,
            Error::Decode(_)
            | Error::UnsupportedFormat(_)
            | Error::UnsupportedExtension(_)
            | Error::Encode(_) => ErrorKind::UnsupportedFormat,
            Error::Io { .. } => ErrorKind::Filesystem,
        }
    }

    pub(crate) fn transport(url: &str, source: reqwest::Error) -> Self {
        Error::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
