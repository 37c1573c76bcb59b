//! Error types for whalechat.
//!
//! Errors fall into three families: configuration problems detected before any
//! network activity, transport failures while talking to a backend, and local
//! bookkeeping errors (busy or missing sessions, persistence).  Lines that fail to
//! decode inside a response stream are not errors at all; see [`crate::decoder`].

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Shared underlying cause.  `Arc` keeps [`Error`] cheap to clone into outcomes.
type Cause = Arc<dyn error::Error + Send + Sync>;

/// Boxed cause accepted by the constructors.
pub type BoxedCause = Box<dyn error::Error + Send + Sync>;

/// The main error type for whalechat.
#[derive(Clone, Debug)]
pub enum Error {
    /// A provider or client setting is unusable.  Raised before any request is sent.
    Configuration {
        /// What is wrong with the setting.
        message: String,
        /// Setting that caused the error.
        param: Option<String>,
    },

    /// The backend answered with a non-success status.
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// A request timed out, either waiting for headers or between stream events.
    Timeout {
        /// What was being waited for.
        message: String,
        /// The limit that was exceeded, in seconds.
        duration: Option<f64>,
    },

    /// The backend could not be reached.
    Connection { message: String, source: Option<Cause> },

    /// Any other failure of the HTTP client.
    HttpClient { message: String, source: Option<Cause> },

    /// The response body broke off, or the backend reported an error inside it.
    Streaming { message: String, source: Option<Cause> },

    /// A send is already active for this session.
    SessionBusy {
        /// Session that rejected the send.
        session_id: String,
    },

    /// The session does not exist (never created, or deleted).
    SessionNotFound {
        /// The missing session.
        session_id: String,
    },

    /// A provider, knowledge base, or document does not exist.
    NotFound {
        message: String,
        /// Kind of the missing entity.
        resource_type: Option<String>,
        /// Identifier that was looked up.
        resource_id: Option<String>,
    },

    /// Invalid input supplied by the caller.
    Validation {
        message: String,
        /// Input that was rejected.
        param: Option<String>,
    },

    /// JSON or YAML could not be read or written, or a data file has the wrong version.
    Serialization { message: String, source: Option<Cause> },

    /// Reading or writing a local file failed.
    Io { message: String, source: Arc<io::Error> },

    /// A URL could not be parsed.
    Url {
        message: String,
        source: Option<url::ParseError>,
    },
}

impl Error {
    /// A setting is unusable.
    pub fn configuration(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            param,
        }
    }

    /// The backend answered `status_code`.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status_code,
            message: message.into(),
        }
    }

    /// A wait of `duration` seconds ran out.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// The backend is unreachable.
    pub fn connection(message: impl Into<String>, source: Option<BoxedCause>) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Cause::from),
        }
    }

    /// The HTTP client failed.
    pub fn http_client(message: impl Into<String>, source: Option<BoxedCause>) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Cause::from),
        }
    }

    /// A response stream failed.
    pub fn streaming(message: impl Into<String>, source: Option<BoxedCause>) -> Self {
        Error::Streaming {
            message: message.into(),
            source: source.map(Cause::from),
        }
    }

    /// `session_id` already has a send in flight.
    pub fn session_busy(session_id: impl Into<String>) -> Self {
        Error::SessionBusy {
            session_id: session_id.into(),
        }
    }

    /// `session_id` does not exist.
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Error::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// An entity lookup came up empty.
    pub fn not_found(
        message: impl Into<String>,
        resource_type: Option<String>,
        resource_id: Option<String>,
    ) -> Self {
        Error::NotFound {
            message: message.into(),
            resource_type,
            resource_id,
        }
    }

    /// The caller's input was rejected.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Data could not be encoded or decoded.
    pub fn serialization(message: impl Into<String>, source: Option<BoxedCause>) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Cause::from),
        }
    }

    /// A local file operation failed.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Returns true if this error was detected before any network call.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Returns true if this error came from talking to a backend.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Api { .. }
                | Error::Timeout { .. }
                | Error::Connection { .. }
                | Error::HttpClient { .. }
                | Error::Streaming { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Returns true if this error rejected a send on a busy session.
    pub fn is_session_busy(&self) -> bool {
        matches!(self, Error::SessionBusy { .. })
    }

    /// Returns true if this error names a missing session.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Error::SessionNotFound { .. })
    }

    /// Returns true for a missing provider, knowledge base, or document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if opening the request again may succeed.
    ///
    /// Only consulted before a response stream has delivered anything.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Api { status_code, .. } => {
                *status_code == 408 || *status_code == 409 || *status_code == 429 || *status_code >= 500
            }
            Error::Timeout { .. } | Error::Connection { .. } => true,
            _ => false,
        }
    }

    /// The HTTP status of an [`Error::Api`].
    pub fn status_code(&self) -> Option<u16> {
        if let Error::Api { status_code, .. } = self {
            Some(*status_code)
        } else {
            None
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { message, param: Some(param) } => {
                write!(f, "Configuration error: {message} (setting: {param})")
            }
            Error::Configuration { message, param: None } => {
                write!(f, "Configuration error: {message}")
            }
            Error::Api { status_code, message } => {
                write!(f, "Backend returned {status_code}: {message}")
            }
            Error::Timeout { message, duration: Some(secs) } => {
                write!(f, "Timed out after {secs}s: {message}")
            }
            Error::Timeout { message, duration: None } => write!(f, "Timed out: {message}"),
            Error::Connection { message, .. } => write!(f, "Connection error: {message}"),
            Error::HttpClient { message, .. } => write!(f, "HTTP error: {message}"),
            Error::Streaming { message, .. } => write!(f, "Stream error: {message}"),
            Error::SessionBusy { session_id } => write!(
                f,
                "Session {session_id} is still answering; wait for it or cancel it first"
            ),
            Error::SessionNotFound { session_id } => {
                write!(f, "Session not found: {session_id}")
            }
            Error::NotFound {
                message,
                resource_type,
                resource_id,
            } => {
                match resource_type {
                    Some(kind) => write!(f, "No such {kind}: {message}")?,
                    None => write!(f, "Not found: {message}")?,
                }
                match resource_id {
                    Some(id) => write!(f, " [{id}]"),
                    None => Ok(()),
                }
            }
            Error::Validation { message, param: Some(param) } => {
                write!(f, "Invalid {param}: {message}")
            }
            Error::Validation { message, param: None } => write!(f, "Invalid input: {message}"),
            Error::Serialization { message, .. } => write!(f, "Data error: {message}"),
            Error::Io { message, .. } => write!(f, "I/O error: {message}"),
            Error::Url { message, .. } => write!(f, "Bad URL: {message}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Streaming { source, .. }
            | Error::Serialization { source, .. } => {
                source.as_deref().map(|cause| cause as &(dyn error::Error + 'static))
            }
            Error::Io { source, .. } => Some(source.as_ref()),
            Error::Url { source, .. } => source.as_ref().map(|cause| cause as _),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("invalid JSON: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("invalid YAML: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Url {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::timeout(format!("request timed out: {err}"), None)
        } else if err.is_connect() {
            Error::connection(format!("cannot reach backend: {err}"), Some(Box::new(err)))
        } else if err.is_body() || err.is_decode() {
            Error::streaming(format!("response body failed: {err}"), Some(Box::new(err)))
        } else {
            Error::http_client(format!("request failed: {err}"), Some(Box::new(err)))
        }
    }
}

/// Result type for whalechat operations.
pub type Result<T> = std::result::Result<T, Error>;
