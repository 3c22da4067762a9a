//! Store error types.

use sled::transaction::TransactionError;
use thiserror::Error;

use crate::message::MessageId;

/// Message store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Message does not exist.
    #[error("message {0} not found")]
    NotFound(MessageId),

    /// Message already exists.
    #[error("message {0} already exists")]
    AlreadyExists(MessageId),
}

impl From<TransactionError<Error>> for Error {
    fn from(err: TransactionError<Error>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => Error::Storage(e),
        }
    }
}
