use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

use crate::http::status::StatusCode;

/// Why a request could not be mapped onto a runnable program.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no script mapping for '{0}'")]
    NoMapping(String),

    #[error("script not found: {0}")]
    NotFound(PathBuf),

    #[error("path escapes script directory: {0}")]
    EscapesRoot(String),

    #[error("script is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("invalid environment entry '{0}'")]
    InvalidEnvironment(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("failed to spawn '{}': {source}", script.display())]
    Spawn {
        script: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{}' failed ({exit}) after writing {captured} bytes", script.display())]
    Execution {
        script: PathBuf,
        exit: ExitStatus,
        captured: usize,
    },

    #[error("'{}' wrote more than {limit} bytes", script.display())]
    OutputTooLarge { script: PathBuf, limit: usize },

    #[error("'{}' timed out after {after:?}", script.display())]
    Timeout { script: PathBuf, after: Duration },

    #[error("client disconnected")]
    ClientDisconnect,

    #[error("gateway overloaded")]
    Overloaded,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GatewayError {
    /// Status sent to the client when this error aborts a request.
    /// `None` means no response is attempted.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            GatewayError::Configuration(ConfigurationError::NotExecutable(_))
            | GatewayError::Configuration(ConfigurationError::EscapesRoot(_)) => {
                Some(StatusCode::FORBIDDEN)
            }
            GatewayError::Configuration(ConfigurationError::InvalidEnvironment(_)) => {
                Some(StatusCode::BAD_REQUEST)
            }
            GatewayError::Configuration(_) => Some(StatusCode::NOT_FOUND),
            GatewayError::Spawn { .. }
            | GatewayError::Execution { .. }
            | GatewayError::OutputTooLarge { .. } => Some(StatusCode::BAD_GATEWAY),
            GatewayError::Timeout { .. } => Some(StatusCode::GATEWAY_TIMEOUT),
            GatewayError::ClientDisconnect => None,
            GatewayError::Overloaded => Some(StatusCode::SERVICE_UNAVAILABLE),
            GatewayError::Parse(_) => Some(StatusCode::BAD_REQUEST),
            GatewayError::PayloadTooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            GatewayError::Config(_) | GatewayError::Io(_) => {
                Some(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Text for the client-facing error page. Paths, exit statuses and OS
    /// errors stay in the log.
    pub fn client_message(&self) -> &'static str {
        match self {
            GatewayError::Configuration(ConfigurationError::NotExecutable(_))
            | GatewayError::Configuration(ConfigurationError::EscapesRoot(_)) => {
                "Access to the requested script is forbidden."
            }
            GatewayError::Configuration(ConfigurationError::InvalidEnvironment(_)) => {
                "The request cannot be passed to a script."
            }
            GatewayError::Configuration(_) => "No script is mapped to the requested path.",
            GatewayError::Spawn { .. } | GatewayError::Execution { .. } => {
                "The script did not produce a valid response."
            }
            GatewayError::OutputTooLarge { .. } => "The script produced too much output.",
            GatewayError::Timeout { .. } => "The script did not respond in time.",
            GatewayError::ClientDisconnect => "Client disconnected.",
            GatewayError::Overloaded => "The gateway is busy. Try again later.",
            GatewayError::Parse(_) => "The request could not be parsed.",
            GatewayError::PayloadTooLarge(_) => "The request body is too large.",
            GatewayError::Config(_) | GatewayError::Io(_) => "Internal gateway error.",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = GatewayError::from(ConfigurationError::NotFound(PathBuf::from("/x")));
        assert_eq!(not_found.status_code(), Some(StatusCode::NOT_FOUND));

        let escape = GatewayError::from(ConfigurationError::EscapesRoot("../etc".to_string()));
        assert_eq!(escape.status_code(), Some(StatusCode::FORBIDDEN));

        let timeout = GatewayError::Timeout {
            script: PathBuf::from("slow.sh"),
            after: Duration::from_secs(1),
        };
        assert_eq!(timeout.status_code(), Some(StatusCode::GATEWAY_TIMEOUT));

        let flood = GatewayError::OutputTooLarge {
            script: PathBuf::from("yes.sh"),
            limit: 16,
        };
        assert_eq!(flood.status_code(), Some(StatusCode::BAD_GATEWAY));

        assert_eq!(GatewayError::ClientDisconnect.status_code(), None);
        assert_eq!(
            GatewayError::Overloaded.status_code(),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
    }

    #[test]
    fn test_client_message_hides_details() {
        let errors = [
            GatewayError::from(ConfigurationError::NotFound(PathBuf::from("/srv/private/x"))),
            GatewayError::from(ConfigurationError::NotExecutable(PathBuf::from("/srv/private/y"))),
            GatewayError::Spawn {
                script: PathBuf::from("/srv/private/z"),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            },
            GatewayError::Io(io::Error::new(io::ErrorKind::Other, "/srv/private/socket")),
        ];
        for err in errors {
            assert!(err.to_string().contains("/srv/private"));
            assert!(!err.client_message().contains("/srv/private"));
        }
    }
}
