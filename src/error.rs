use std::io;

use thiserror::Error;

use crate::data::model::ModelError;
use crate::retriever::status;

/// Which half of the user/password exchange was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    BadUser,
    BadPassword,
}

#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("authentication failed: {0:?}")]
    Auth(AuthFailure),

    #[error("malformed source descriptor: {0}")]
    MalformedSource(String),

    #[error("malformed file content in {file}: {reason}")]
    MalformedContent { file: String, reason: String },

    #[error("index {index} out of range for {count} DataSets")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("server answered status {0}")]
    Status(i32),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RetrieveError {
    pub fn content(file: &str, reason: impl Into<String>) -> Self {
        RetrieveError::MalformedContent {
            file: file.to_string(),
            reason: reason.into(),
        }
    }

    pub fn from_status(code: i32) -> Self {
        match code {
            status::BAD_USER_NAME => RetrieveError::Auth(AuthFailure::BadUser),
            status::BAD_PASSWORD => RetrieveError::Auth(AuthFailure::BadPassword),
            status::SERVER_DOWN | status::NOT_CONNECTED | status::NO_CONNECTION => {
                RetrieveError::Transport(status::message(code))
            }
            other => RetrieveError::Status(other),
        }
    }

    /// The negative code a retriever reports for this failure.
    pub fn status_code(&self) -> i32 {
        match self {
            RetrieveError::Transport(_) | RetrieveError::Io(_) => status::SERVER_DOWN,
            RetrieveError::Auth(AuthFailure::BadUser) => status::BAD_USER_NAME,
            RetrieveError::Auth(AuthFailure::BadPassword) => status::BAD_PASSWORD,
            RetrieveError::MalformedSource(_) => status::NOT_CONNECTED,
            RetrieveError::MalformedContent { .. } | RetrieveError::Model(_) => {
                status::BAD_FILE_NAME
            }
            RetrieveError::IndexOutOfRange { .. } => status::BAD_FILE_NAME,
            RetrieveError::Status(code) => *code,
        }
    }
}
