use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for fast-filter-rs operations.
///
/// Every failure mode of the stream engine is represented here; the core
/// never recovers internally, so one of these ends the current `run()`.
#[derive(Debug)]
pub enum FilterError {
    /// Wrapper around lower-level I/O failures.
    Io(io::Error),
    /// The parser could not match the fast-export grammar.
    MalformedStream {
        /// Element kind (or production) being parsed when matching failed.
        kind: &'static str,
        /// The offending line, bytes as read.
        line: Vec<u8>,
    },
    /// The leading token at element position is not a known command.
    UnknownElement(Vec<u8>),
    /// A `data <N>` payload ended before N bytes arrived.
    SizeMismatch { expected: usize, actual: usize },
    /// A mark reference could not be parsed as `:<digits>`.
    BadMark(Vec<u8>),
    /// The upstream exporter exited with a non-zero status.
    UpstreamClosed(String),
    /// The downstream importer closed its input early or failed.
    DownstreamClosed(String),
    /// A host callback reported a terminal error.
    Callback(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Io(err) => write!(f, "{err}"),
            FilterError::MalformedStream { kind, line } => {
                write!(
                    f,
                    "malformed {} line: {:?}",
                    kind,
                    String::from_utf8_lossy(line)
                )
            }
            FilterError::UnknownElement(line) => {
                write!(
                    f,
                    "unknown element at stream position: {:?}",
                    String::from_utf8_lossy(line)
                )
            }
            FilterError::SizeMismatch { expected, actual } => {
                write!(
                    f,
                    "data payload truncated: expected {expected} bytes, got {actual}"
                )
            }
            FilterError::BadMark(bytes) => {
                write!(f, "bad mark reference: {:?}", String::from_utf8_lossy(bytes))
            }
            FilterError::UpstreamClosed(msg) => write!(f, "fast-export failed: {msg}"),
            FilterError::DownstreamClosed(msg) => write!(f, "fast-import closed: {msg}"),
            FilterError::Callback(msg) => write!(f, "callback error: {msg}"),
        }
    }
}

impl StdError for FilterError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            FilterError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FilterError {
    fn from(err: io::Error) -> Self {
        FilterError::Io(err)
    }
}

impl From<FilterError> for io::Error {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

impl FilterError {
    /// Convenience constructor for host callbacks that need to abort the run.
    pub fn callback(msg: impl Into<String>) -> Self {
        FilterError::Callback(msg.into())
    }
}

/// Convenience result alias using [`FilterError`].
pub type Result<T> = std::result::Result<T, FilterError>;
