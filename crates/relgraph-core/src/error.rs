use std::fmt;

/// Machine-readable error codes for operators and calling services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingField,
    InvalidArgument,
    InvalidRequestType,
    UnknownAggregateType,
    NotFound,
    AggregateNotFound,
    WrongExpectedVersion,
    DeadlineExceeded,
    Cancelled,
    ConfigParseError,
    GraphDriverFailure,
    PayloadCodecFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MissingField => "E1001",
            Self::InvalidArgument => "E1002",
            Self::InvalidRequestType => "E1003",
            Self::UnknownAggregateType => "E1004",
            Self::NotFound => "E2001",
            Self::AggregateNotFound => "E2002",
            Self::WrongExpectedVersion => "E3001",
            Self::DeadlineExceeded => "E4001",
            Self::Cancelled => "E4002",
            Self::ConfigParseError => "E5001",
            Self::GraphDriverFailure => "E6001",
            Self::PayloadCodecFailure => "E6002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::MissingField => "Required field missing",
            Self::InvalidArgument => "Invalid argument",
            Self::InvalidRequestType => "Invalid request type",
            Self::UnknownAggregateType => "Unknown aggregate type",
            Self::NotFound => "Entity not found",
            Self::AggregateNotFound => "Aggregate not found",
            Self::WrongExpectedVersion => "Aggregate version conflict",
            Self::DeadlineExceeded => "Deadline exceeded",
            Self::Cancelled => "Operation cancelled",
            Self::ConfigParseError => "Config file parse error",
            Self::GraphDriverFailure => "Graph driver failure",
            Self::PayloadCodecFailure => "Event payload codec failure",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::MissingField | Self::InvalidArgument => {
                Some("Fix the request payload and retry.")
            }
            Self::InvalidRequestType | Self::UnknownAggregateType => None,
            Self::NotFound | Self::AggregateNotFound => None,
            Self::WrongExpectedVersion => {
                Some("Reload the aggregate and retry the command.")
            }
            Self::DeadlineExceeded => Some("Retry with a longer deadline."),
            Self::Cancelled => None,
            Self::ConfigParseError => Some("Fix syntax in relgraph.toml and retry."),
            Self::GraphDriverFailure => {
                Some("Retry the command; check disk space and database locks if persistent.")
            }
            Self::PayloadCodecFailure => {
                Some("The stored event payload does not match the event type.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }

    /// Transport status the code maps to at the command boundary.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::MissingField
            | Self::InvalidArgument
            | Self::InvalidRequestType
            | Self::UnknownAggregateType => StatusCode::InvalidArgument,
            Self::NotFound | Self::AggregateNotFound => StatusCode::NotFound,
            Self::WrongExpectedVersion => StatusCode::Aborted,
            Self::DeadlineExceeded => StatusCode::DeadlineExceeded,
            Self::Cancelled => StatusCode::Cancelled,
            Self::ConfigParseError
            | Self::GraphDriverFailure
            | Self::PayloadCodecFailure
            | Self::InternalUnexpected => StatusCode::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Coarse status returned to callers of the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    Aborted,
    DeadlineExceeded,
    Cancelled,
    Internal,
}

/// Library error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid request type: {0}")]
    InvalidRequestType(String),

    #[error("unknown aggregate type `{0}`")]
    UnknownAggregateType(String),

    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },

    #[error("aggregate `{0}` not found")]
    AggregateNotFound(String),

    #[error("wrong expected version for stream `{stream}`: expected {expected}, actual {actual}")]
    WrongExpectedVersion {
        stream: String,
        expected: i64,
        actual: i64,
    },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("graph driver error: {0}")]
    Driver(#[from] rusqlite::Error),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::MissingField(_) => ErrorCode::MissingField,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidRequestType(_) => ErrorCode::InvalidRequestType,
            Self::UnknownAggregateType(_) => ErrorCode::UnknownAggregateType,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AggregateNotFound(_) => ErrorCode::AggregateNotFound,
            Self::WrongExpectedVersion { .. } => ErrorCode::WrongExpectedVersion,
            Self::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Config(_) => ErrorCode::ConfigParseError,
            Self::Driver(_) => ErrorCode::GraphDriverFailure,
            Self::Codec(_) => ErrorCode::PayloadCodecFailure,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Transport status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::AggregateNotFound(_))
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Converts an optional lookup into the explicit `NotFound` sentinel.
pub trait OptionExt<T> {
    fn or_not_found(self, entity: &'static str, id: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, entity: &'static str, id: &str) -> Result<T> {
        self.ok_or_else(|| Error::not_found(entity, id))
    }
}
