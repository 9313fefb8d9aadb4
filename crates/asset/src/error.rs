use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while importing a scene file.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}: {message}")]
    Parse {
        file: String,
        line: usize,
        message: String,
    },

    #[error("'{0}' contained no faces")]
    Empty(PathBuf),
}

impl ImportError {
    pub(crate) fn parse(file: &str, line_no: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            file: file.to_owned(),
            line: line_no + 1,
            message: message.into(),
        }
    }
}

/// Errors produced while decoding an image into raw pixels.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode image '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to decode in-memory image: {0}")]
    Memory(#[source] image::ImageError),
}
