// Error taxonomy for the SSO login flow.
//
// Every stage failure maps to exactly one variant; the orchestrator boundary
// converts these into a `LoginOutcome` so nothing propagates past it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors produced while acquiring a service token.
#[derive(Debug, thiserror::Error)]
pub enum SsoError {
    /// The login page did not expose the expected hidden auth-state field.
    /// Usually means the provider markup changed or the flow started from
    /// the wrong page.
    #[error("login page did not contain the expected auth-state field")]
    MissingAuthState,

    /// The identity provider rejected the submitted username or password.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The post-credential response carried no usable SAML form.
    #[error("identity provider response contained no SAML form")]
    MissingSamlResponse,

    /// Neither the redirect walk nor the out-of-band capture produced a
    /// token-bearing URL within the capture window.
    #[error("no token-bearing redirect was observed before the capture window closed")]
    TokenCaptureTimeout,

    /// The captured token failed base64 or delimiter decoding.
    #[error("token payload could not be decoded")]
    MalformedToken,

    /// Any underlying HTTP failure (DNS, connection, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The whole login attempt exceeded its outer time budget.
    #[error("login attempt timed out")]
    Timeout,
}

impl SsoError {
    /// Stable machine-readable code for the RPC surface.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingAuthState => ErrorCode::MissingAuthState,
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::MissingSamlResponse => ErrorCode::MissingSamlResponse,
            Self::TokenCaptureTimeout => ErrorCode::TokenCaptureTimeout,
            Self::MalformedToken => ErrorCode::MalformedToken,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Timeout => ErrorCode::Timeout,
        }
    }

    /// Returns `true` if this is a network-level error.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Machine-readable error codes mirroring the `SsoError` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingAuthState,
    InvalidCredentials,
    MissingSamlResponse,
    TokenCaptureTimeout,
    MalformedToken,
    NetworkError,
    Timeout,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingAuthState => "MISSING_AUTH_STATE",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MissingSamlResponse => "MISSING_SAML_RESPONSE",
            Self::TokenCaptureTimeout => "TOKEN_CAPTURE_TIMEOUT",
            Self::MalformedToken => "MALFORMED_TOKEN",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

/// Unified result type for SSO operations.
pub type Result<T> = std::result::Result<T, SsoError>;
