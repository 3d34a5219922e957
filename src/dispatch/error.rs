use serde::Serialize;
use thiserror::Error;

use crate::StatusCode;
use crate::validation::{Issue, SchemaError, ValidationError};

/// Message sent to clients for failures that are not safe to describe.
pub const GENERIC_ERROR_MESSAGE: &str = "Internal Server Error";

/// A domain error that maps directly onto an HTTP status and message.
///
/// Route handlers return it to reject a request with a precise status; both
/// fields are sent to the client verbatim.
///
/// # Examples
///
/// ```
/// use fileroute::dispatch::{Failure, HttpException};
///
/// fn check(stock: u32) -> Result<u32, Failure> {
///     if stock == 0 {
///         return Err(HttpException::conflict("Out of stock").into());
///     }
///     Ok(stock)
/// }
///
/// assert!(matches!(check(0), Err(Failure::Http(e)) if e.code().as_u16() == 409));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct HttpException {
    code: StatusCode,
    message: String,
}

impl HttpException {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Every way a route handler can fail.
///
/// The dispatcher resolves each variant to a response by exhaustive match:
/// validation failures become `400` with the issue list, HTTP exceptions use
/// their own status and message, and anything else is a `500` whose cause is
/// logged but never sent to the client.
#[derive(Debug, Error)]
pub enum Failure {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Http(#[from] HttpException),

    #[error(transparent)]
    Unclassified(Box<dyn std::error::Error + Send + Sync>),
}

impl Failure {
    /// Wraps any error (or message) as an unclassified failure.
    pub fn unclassified(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unclassified(err.into())
    }

    /// The status this failure is answered with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Http(exception) => exception.code(),
            Self::Unclassified(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Self::unclassified(err)
    }
}

impl From<SchemaError> for Failure {
    fn from(err: SchemaError) -> Self {
        Self::unclassified(err)
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Self::unclassified(err)
    }
}

/// The JSON body of every error response produced by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Vec<Issue>>,
}

impl ErrorResponse {
    /// The body for failures whose details stay server side.
    pub fn generic() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: GENERIC_ERROR_MESSAGE.to_owned(),
            validation: None,
        }
    }
}

impl From<Failure> for ErrorResponse {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Validation(err) => Self {
                status: StatusCode::BAD_REQUEST,
                message: err.message(),
                validation: Some(err.into_issues()),
            },
            Failure::Http(exception) => Self {
                status: exception.code,
                message: exception.message,
                validation: None,
            },
            Failure::Unclassified(_) => Self::generic(),
        }
    }
}
