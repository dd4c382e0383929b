//! gRPC status codes.

use std::fmt;
use std::io;

/// gRPC status codes (distinct from HTTP status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    /// The operation completed successfully.
    Ok = 0,
    /// The operation was cancelled.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// Invalid argument was provided.
    InvalidArgument = 3,
    /// Deadline expired before operation could complete.
    DeadlineExceeded = 4,
    /// Requested entity was not found.
    NotFound = 5,
    /// Entity already exists.
    AlreadyExists = 6,
    /// Permission denied.
    PermissionDenied = 7,
    /// Resource has been exhausted.
    ResourceExhausted = 8,
    /// System is not in a state required for the operation.
    FailedPrecondition = 9,
    /// Operation was aborted.
    Aborted = 10,
    /// Operation was attempted past the valid range.
    OutOfRange = 11,
    /// Operation is not implemented or supported.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// Service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// Request does not have valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Create a Code from its numeric value. Out-of-range values map to `Unknown`.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// Numeric value of this code, as carried in the `grpc-status` trailer.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Canonical SCREAMING_SNAKE name of this code.
    pub fn name(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Check if this is the successful status.
    pub fn is_ok(self) -> bool {
        self == Code::Ok
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// gRPC status delivered in response trailers.
///
/// Every status carries a [`Code`]; the human-readable details string is
/// optional and surfaces as the `grpc-message` trailer.
#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    details: Option<String>,
}

impl Status {
    /// Create a new status with details.
    pub fn new(code: Code, details: impl Into<String>) -> Self {
        Self {
            code,
            details: Some(details.into()),
        }
    }

    /// Create an OK status.
    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    /// Create a status from just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            details: None,
        }
    }

    /// The status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The details string, if any.
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Check if this is a successful status.
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Create a cancelled status.
    pub fn cancelled(details: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, details)
    }

    /// Create an invalid argument status.
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, details)
    }

    /// Create an unimplemented status.
    pub fn unimplemented(details: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, details)
    }

    /// Create an internal error status.
    pub fn internal(details: impl Into<String>) -> Self {
        Self::new(Code::Internal, details)
    }

    /// Create an unavailable status.
    pub fn unavailable(details: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, details)
    }

    /// Create a resource exhausted status.
    pub fn resource_exhausted(details: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, details)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

// Errors converted from foreign sources carry no gRPC code; they default
// to INTERNAL.
impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        Status::internal(err.to_string())
    }
}
