//! Error types for the proxy.

use crate::translate::types::ErrorResponse;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream transport error: {message}")]
    Transport { message: String },

    #[error(
        "Upstream returned status {status}: {}",
        .message.as_deref().unwrap_or("<no error message>")
    )]
    Upstream {
        status: u16,
        message: Option<String>,
    },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("All {attempts} candidate models failed; last error: {last}")]
    AllCandidatesFailed {
        attempts: usize,
        last: Box<ProxyError>,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: Some(msg.into()),
        }
    }

    /// Upstream failure whose body carried no readable error message.
    pub fn upstream_status(status: u16) -> Self {
        Self::Upstream {
            status,
            message: None,
        }
    }

    /// HTTP status reported by the upstream, if this failure has one.
    pub fn upstream_status_code(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::AllCandidatesFailed { last, .. } => last.upstream_status_code(),
            _ => None,
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// HTTP status and JSON body the consumer sees for this error.
    ///
    /// Upstream details are only ever exposed through the `message` field.
    pub fn status_and_body(&self) -> (u16, ErrorResponse) {
        match self {
            Self::AllCandidatesFailed { attempts, last } if *attempts > 1 => (
                503,
                ErrorResponse::new(
                    "service_unavailable",
                    format!("All models failed. Last error: {last}"),
                )
                .with_code("all_models_failed"),
            ),
            Self::AllCandidatesFailed { last, .. } => last.status_and_body(),
            Self::Upstream {
                status,
                message: Some(message),
            } if (400..600).contains(status) => (*status, ErrorResponse::api_error(message.clone())),
            Self::Upstream { status, .. } => (
                500,
                ErrorResponse::api_error(format!("Upstream returned status {status}")),
            ),
            Self::Config { message } => (500, ErrorResponse::api_error(message.clone())),
            Self::Translation { message } => (
                500,
                ErrorResponse::api_error(format!("Malformed upstream response: {message}")),
            ),
            Self::Transport { .. } => (
                500,
                ErrorResponse::api_error("Failed to reach the upstream model service"),
            ),
            Self::Toml(_) => (500, ErrorResponse::api_error("Internal proxy error")),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
