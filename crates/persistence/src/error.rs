//! Reporting error types

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// How a failed request should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Socket write would block; retry shortly at a fixed interval
    Transient,
    /// Server asked us to slow down (408, 429)
    RateLimited,
    /// Server or network unavailable (connect, timeout, 5xx gateway errors)
    Unavailable,
    /// Retrying cannot help
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }

    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 => ErrorKind::RateLimited,
            500 | 502 | 503 | 504 => ErrorKind::Unavailable,
            _ => ErrorKind::Fatal,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {message}")]
    Network { kind: ErrorKind, message: String },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device not bound, bind code {bind_code}")]
    DeviceBind { bind_code: String },

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReportError::Status { status, .. } => ErrorKind::from_status(*status),
            ReportError::Network { kind, .. } => *kind,
            _ => ErrorKind::Fatal,
        }
    }
}

impl From<reqwest::Error> for ReportError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return ReportError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            };
        }

        if err.is_decode() {
            return ReportError::InvalidResponse(err.to_string());
        }

        if err.is_builder() {
            return ReportError::Configuration(err.to_string());
        }

        let kind = if would_block(&err) {
            ErrorKind::Transient
        } else if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            ErrorKind::Unavailable
        } else {
            ErrorKind::Fatal
        };

        ReportError::Network {
            kind,
            message: err.to_string(),
        }
    }
}

/// Whether an I/O `WouldBlock` sits anywhere in the source chain
fn would_block(err: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::WouldBlock {
                return true;
            }
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(408), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Unavailable);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::Fatal);
        assert_eq!(ErrorKind::from_status(501), ErrorKind::Fatal);
    }

    #[test]
    fn test_business_errors_are_fatal() {
        assert_eq!(ReportError::DeviceNotFound("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(
            ReportError::DeviceBind {
                bind_code: "123456".into()
            }
            .kind(),
            ErrorKind::Fatal
        );
        assert!(!ErrorKind::Fatal.is_retryable());
        assert!(ErrorKind::Transient.is_retryable());
    }

    #[derive(Debug, Error)]
    #[error("wrapped")]
    struct Wrapped(#[source] io::Error);

    #[test]
    fn test_would_block_found_in_source_chain() {
        let err = Wrapped(io::Error::new(io::ErrorKind::WouldBlock, "again"));
        assert!(would_block(&err));

        let err = Wrapped(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(!would_block(&err));
    }
}
