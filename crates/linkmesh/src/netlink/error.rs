//! Netlink errors.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An `NLMSG_ERROR` reply, optionally tagged with what was being done.
    #[error("{}", describe(.context, .errno))]
    Kernel {
        context: Option<String>,
        /// Positive errno.
        errno: i32,
    },

    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),

    /// A name lookup in a link dump found nothing.
    #[error("interface not found: {name}")]
    InterfaceNotFound { name: String },
}

fn describe(context: &Option<String>, errno: &i32) -> String {
    let reason = io::Error::from_raw_os_error(*errno);
    match context {
        Some(context) => format!("{context}: {reason} (errno {errno})"),
        None => format!("kernel error: {reason} (errno {errno})"),
    }
}

impl Error {
    /// From the negative errno carried in `nlmsgerr.error`.
    pub fn from_errno(errno: i32) -> Self {
        Self::Kernel {
            context: None,
            errno: -errno,
        }
    }

    /// Tag a kernel error with the operation; the innermost tag wins.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel {
                context: None,
                errno,
            } => Self::Kernel {
                context: Some(operation.into()),
                errno,
            },
            other => other,
        }
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// ENOENT, ESRCH (xfrm), ENODEV, or a failed name lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InterfaceNotFound { .. })
            || matches!(
                self.errno(),
                Some(libc::ENOENT | libc::ESRCH | libc::ENODEV)
            )
    }

    pub fn is_already_exists(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }
}
