use std::fmt;

#[doc(hidden)]
type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A list specifying categories of errors
///
/// used with the [`Error`] type
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A selector, field path or patch template is malformed
    Configuration,
    /// A value does not have the shape expected by its parameter (wrong kind,
    /// incomplete assignment, partial or out of range baseline)
    DataShape,
    /// The local and remote experiment definitions do not match
    Incompatible,
    /// An error happened trying to serialize or deserialize a record
    Serialization,
    /// The remote service rejected a request
    Remote,
    /// An internal error happened, this is probably a bug
    Internal,
}

impl ErrorKind {
    pub(crate) fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match *self {
            Configuration => "invalid configuration",
            DataShape => "unexpected data shape",
            Incompatible => "incompatible definitions",
            Serialization => "serialization failed",
            Remote => "remote service error",
            Internal => "internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    /// Shows a human-readable description of the `ErrorKind`.
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind, error: None }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(ErrorKind::Serialization, e)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: Option<BoxError>,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    /// Shows a human-readable description of the `Error`.
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = self.error.as_ref() {
            write!(fmt, "{source}")
        } else {
            write!(fmt, "{}", self.kind.as_str())
        }
    }
}

impl Error {
    pub fn new<E: Into<BoxError>>(kind: ErrorKind, error: E) -> Self {
        Self {
            kind,
            error: Some(error.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn source(&self) -> Option<&BoxError> {
        self.error.as_ref()
    }

    pub fn configuration<E: Into<BoxError>>(error: E) -> Self {
        Self::new(ErrorKind::Configuration, error)
    }

    pub fn data_shape<E: Into<BoxError>>(error: E) -> Self {
        Self::new(ErrorKind::DataShape, error)
    }

    pub fn incompatible<E: Into<BoxError>>(error: E) -> Self {
        Self::new(ErrorKind::Incompatible, error)
    }

    pub fn remote<E: Into<BoxError>>(error: E) -> Self {
        Self::new(ErrorKind::Remote, error)
    }

    pub fn internal<E: Into<BoxError>>(error: E) -> Self {
        Self::new(ErrorKind::Internal, error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn it_shows_the_source_when_available() {
        let err = Error::data_shape(anyhow!("baseline out of range for parameter 'cpu'"));
        assert_eq!(err.kind(), ErrorKind::DataShape);
        assert_eq!(
            err.to_string(),
            "baseline out of range for parameter 'cpu'"
        );
    }

    #[test]
    fn it_falls_back_to_the_kind_description() {
        let err = Error::from(ErrorKind::Incompatible);
        assert_eq!(err.to_string(), "incompatible definitions");
        assert!(err.source().is_none());
    }
}
