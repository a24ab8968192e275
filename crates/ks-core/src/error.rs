use thiserror::Error;

use crate::protocol::{Command, Errno};

pub type KsResult<T> = Result<T, KeystoreError>;

#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Bad size, unknown spec, negative slot, malformed IV, short buffer
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing buffer or aliasing source/destination regions
    #[error("bad buffer: {0}")]
    Fault(String),

    #[error("keystore backend failed {command:?}: {errno}")]
    Backend { command: Command, errno: Errno },

    /// The wrapped key was replaced in place; persist it and load again
    #[error("wrapped key must be rewrapped before it can be loaded")]
    RetryRequired,

    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeystoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        KeystoreError::InvalidArgument(msg.into())
    }

    pub fn fault(msg: impl Into<String>) -> Self {
        KeystoreError::Fault(msg.into())
    }

    /// Classify a failed backend round trip. `EAGAIN` on load is the only
    /// code that carries data back to the caller.
    pub fn from_backend(command: Command, errno: Errno) -> Self {
        if command == Command::LoadKey && errno == Errno::AGAIN {
            KeystoreError::RetryRequired
        } else {
            KeystoreError::Backend { command, errno }
        }
    }

    /// Negative errno equivalent of this error.
    pub fn code(&self) -> i32 {
        match self {
            KeystoreError::InvalidArgument(_) | KeystoreError::Config(_) => -libc::EINVAL,
            KeystoreError::Fault(_) => -libc::EFAULT,
            KeystoreError::Backend { errno, .. } => -errno.0,
            KeystoreError::RetryRequired => -libc::EAGAIN,
            KeystoreError::OutOfMemory { .. } => -libc::ENOMEM,
            KeystoreError::Io(e) => -e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    pub fn is_retry_required(&self) -> bool {
        matches!(self, KeystoreError::RetryRequired)
    }
}
