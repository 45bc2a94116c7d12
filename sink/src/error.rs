use std::error;
use std::fmt;

/// Convenient result type for sink operations using [`SinkError`] as the error type.
pub type SinkResult<T> = Result<T, SinkError>;

/// Main error type of the sink.
///
/// [`SinkError`] can represent single errors, errors with additional detail, or multiple
/// aggregated errors. The [`ErrorKind`] decides how the reader reacts: protocol errors stop
/// the run, stream-fatal errors fail one stream, transient destination errors are retried.
#[derive(Debug, Clone)]
pub struct SinkError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<SinkError>),
}

/// Categories of errors that can occur while sinking a message stream.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Input Errors
    ProtocolError,

    // Stream Errors
    UnsupportedType,
    SchemaConflict,
    MissingPrimaryKey,
    MissingTargetSchema,

    // Destination Errors
    DestinationTransient,
    DestinationFatal,

    // Configuration Errors
    ConfigError,

    // IO & Data Errors
    IoError,
    SerializationError,
    ConversionError,

    // State & Workflow Errors
    InvalidState,
    LoadWorkerPanic,
    DrainTimeout,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns whether this kind fails only the stream it occurred on.
    pub fn is_stream_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::UnsupportedType
                | ErrorKind::SchemaConflict
                | ErrorKind::MissingPrimaryKey
                | ErrorKind::MissingTargetSchema
        )
    }

    /// Returns whether an operation failing with this kind may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::DestinationTransient)
    }
}

impl SinkError {
    /// Creates a [`SinkError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<SinkError>) -> SinkError {
        SinkError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns whether the whole error only concerns a single stream.
    pub fn is_stream_fatal(&self) -> bool {
        let kinds = self.kinds();
        !kinds.is_empty() && kinds.iter().all(ErrorKind::is_stream_fatal)
    }

    /// Returns whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        let kinds = self.kinds();
        !kinds.is_empty() && kinds.iter().all(ErrorKind::is_transient)
    }
}

impl PartialEq for SinkError {
    fn eq(&self, other: &SinkError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for SinkError {}

impl From<(ErrorKind, &'static str)> for SinkError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SinkError {
        SinkError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for SinkError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SinkError {
        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for SinkError
where
    E: Into<SinkError>,
{
    fn from(errors: Vec<E>) -> SinkError {
        SinkError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> SinkError {
        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`serde_json::Error`] to [`SinkError`].
///
/// Syntax and data errors come from reading input lines and are protocol errors.
impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> SinkError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::ProtocolError, "Malformed JSON message")
            }
        };

        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

impl From<chrono::ParseError> for SinkError {
    fn from(err: chrono::ParseError) -> SinkError {
        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConversionError,
                "Date/time parsing failed",
                err.to_string(),
            ),
        }
    }
}

impl From<bigdecimal::ParseBigDecimalError> for SinkError {
    fn from(err: bigdecimal::ParseBigDecimalError) -> SinkError {
        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConversionError,
                "Decimal parsing failed",
                err.to_string(),
            ),
        }
    }
}

impl From<sink_config::shared::ValidationError> for SinkError {
    fn from(err: sink_config::shared::ValidationError) -> SinkError {
        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Invalid configuration",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`tokio_postgres::Error`] to [`SinkError`] by SQLSTATE.
///
/// Errors that can go away on a fresh attempt become [`ErrorKind::DestinationTransient`],
/// everything else is [`ErrorKind::DestinationFatal`]. A closed connection, which carries no
/// SQLSTATE, is transient.
#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for SinkError {
    fn from(err: tokio_postgres::Error) -> SinkError {
        use tokio_postgres::error::SqlState;

        let (kind, description) = match err.code() {
            Some(sqlstate) => match *sqlstate {
                // Connection errors (08xxx)
                SqlState::CONNECTION_EXCEPTION
                | SqlState::CONNECTION_DOES_NOT_EXIST
                | SqlState::CONNECTION_FAILURE
                | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION => (
                    ErrorKind::DestinationTransient,
                    "PostgreSQL connection error",
                ),

                // Transaction rollback errors (40xxx)
                SqlState::TRANSACTION_ROLLBACK
                | SqlState::T_R_SERIALIZATION_FAILURE
                | SqlState::T_R_DEADLOCK_DETECTED => (
                    ErrorKind::DestinationTransient,
                    "PostgreSQL transaction rolled back",
                ),

                SqlState::LOCK_NOT_AVAILABLE => (
                    ErrorKind::DestinationTransient,
                    "PostgreSQL lock not available",
                ),

                // Operator intervention errors (57xxx)
                SqlState::QUERY_CANCELED => (
                    ErrorKind::DestinationTransient,
                    "PostgreSQL query canceled",
                ),
                SqlState::ADMIN_SHUTDOWN
                | SqlState::CRASH_SHUTDOWN
                | SqlState::CANNOT_CONNECT_NOW => (
                    ErrorKind::DestinationTransient,
                    "PostgreSQL server unavailable",
                ),

                // Resource errors (53xxx)
                SqlState::TOO_MANY_CONNECTIONS => (
                    ErrorKind::DestinationTransient,
                    "PostgreSQL too many connections",
                ),

                // Data conversion errors (22xxx)
                SqlState::DATA_EXCEPTION
                | SqlState::INVALID_TEXT_REPRESENTATION
                | SqlState::INVALID_DATETIME_FORMAT
                | SqlState::NUMERIC_VALUE_OUT_OF_RANGE => (
                    ErrorKind::DestinationFatal,
                    "PostgreSQL data conversion error",
                ),

                // Data integrity violations (23xxx)
                SqlState::INTEGRITY_CONSTRAINT_VIOLATION
                | SqlState::NOT_NULL_VIOLATION
                | SqlState::UNIQUE_VIOLATION
                | SqlState::CHECK_VIOLATION => (
                    ErrorKind::DestinationFatal,
                    "PostgreSQL constraint violation",
                ),

                // Authentication errors (28xxx)
                SqlState::INVALID_AUTHORIZATION_SPECIFICATION | SqlState::INVALID_PASSWORD => (
                    ErrorKind::DestinationFatal,
                    "PostgreSQL authentication failed",
                ),

                // Syntax and access errors (42xxx)
                SqlState::SYNTAX_ERROR
                | SqlState::INSUFFICIENT_PRIVILEGE
                | SqlState::UNDEFINED_TABLE
                | SqlState::UNDEFINED_COLUMN
                | SqlState::UNDEFINED_OBJECT => (
                    ErrorKind::DestinationFatal,
                    "PostgreSQL syntax or access error",
                ),

                _ => (ErrorKind::DestinationFatal, "PostgreSQL error"),
            },
            None if err.is_closed() => (
                ErrorKind::DestinationTransient,
                "PostgreSQL connection closed",
            ),
            // Errors without a SQLSTATE are raised on the client side (io, tls, protocol).
            None => (
                ErrorKind::DestinationTransient,
                "PostgreSQL client error",
            ),
        };

        SinkError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}
