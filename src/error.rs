use std::fmt::Display;

/// emberdb errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The requested key is not in the index.
    NotFound,
    /// The stored record's type tag differs from the one the caller asked
    /// for, e.g. `get` on a key written with `put_int64`. Carries the type
    /// the caller expected.
    TypeMismatch(&'static str),
    /// A record's self-declared lengths do not add up, a read returned
    /// fewer bytes than declared, or a type tag is unknown.
    Corrupted(String),
    /// An underlying filesystem error (open, read, write, seek, rename,
    /// remove).
    Io(String),
    /// Conflicting or incomplete open options.
    Config(String),
    /// An operation was submitted after the store was closed.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::NotFound => write!(f, "record does not exist"),
            Error::TypeMismatch(expected) => {
                write!(f, "value does not match expected type: {expected}")
            }
            Error::Corrupted(msg) => write!(f, "corrupted data: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Config(msg) => write!(f, "configuration error: {msg}"),
            Error::Closed => write!(f, "store is closed"),
        }
    }
}

/// Constructs an Error::Corrupted for the given format string.
#[macro_export]
macro_rules! corrupted {
    ($($args:tt)*) => { $crate::error::Error::Corrupted(format!($($args)*)) };
}

/// An emberdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_api_contract() {
        assert_eq!(Error::NotFound.to_string(), "record does not exist");
        assert_eq!(
            Error::TypeMismatch("string").to_string(),
            "value does not match expected type: string"
        );
        assert_eq!(
            Error::TypeMismatch("int64").to_string(),
            "value does not match expected type: int64"
        );
    }

    #[test]
    fn test_io_errors_convert() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_corrupted_macro_formats() {
        let err = corrupted!("record size {} exceeds remaining {}", 64, 12);
        assert_eq!(
            err,
            Error::Corrupted("record size 64 exceeds remaining 12".to_string())
        );
    }
}
