//! Hash engine error type.

use std::error;
use std::fmt::{self, Display};
use std::result;

/// Hash engine generic result type.
pub type Result<T> = result::Result<T, Error>;

/// A list specifying general errors for the hash engine.
///
/// Variant names preserve the error *kinds* from the language-neutral
/// contract (invalid-argument, not-found, resource-exhausted, no-space,
/// internal), not any particular source-language naming.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A key or value argument was empty, or a requested bucket count
    /// was zero, at an API boundary that requires a non-empty value.
    InvalidArgument,
    /// A lookup or delete found no entry for the given key.
    NotFound,
    /// An allocation or a resize could not be satisfied within the
    /// engine's bucket-count bounds.
    ResourceExhausted,
    /// The probe chain was exhausted (table saturated) and a grow
    /// could not be attempted because the table is already at
    /// `Engine::MAX_BUCKETS`.
    NoSpace,
    /// A state-machine invariant was violated. Should be unreachable
    /// in a correct implementation; surfaced rather than panicking so
    /// that a caller can still decide how to react.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::ResourceExhausted => "resource exhausted",
            ErrorKind::NoSpace => "no space",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The primary and general error type for the hash engine.
#[derive(Debug)]
pub enum Error {
    Simple(ErrorKind),
    Message(ErrorKind, String),
    Custom(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl Error {
    pub fn new<E>(error_kind: ErrorKind, inner_error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Custom(error_kind, inner_error.into())
    }

    /// Returns the `ErrorKind` carried by this error, regardless of variant.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Simple(kind) => *kind,
            Error::Message(kind, _) => *kind,
            Error::Custom(kind, _) => *kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Simple(error_kind) => {
                write!(f, "{error_kind}")
            }
            Error::Message(error_kind, string) => {
                write!(f, "{error_kind}: {string}")
            }
            Error::Custom(error_kind, ref box_error) => {
                write!(f, "{error_kind}, error: {}", *box_error)
            }
        }
    }
}

impl error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(error_kind: ErrorKind) -> Self {
        Self::Simple(error_kind)
    }
}

impl<S: ToString> From<(ErrorKind, S)> for Error {
    fn from((error_kind, stringable): (ErrorKind, S)) -> Self {
        Self::Message(error_kind, stringable.to_string())
    }
}
