// Outcome and stage types crossing the orchestrator boundary.

use serde::{Deserialize, Serialize};

use moodle_sso_core::error::{ErrorCode, SsoError};

/// What a login attempt produced. This is the RPC-surface shape: errors are
/// folded in rather than propagated, so the embedder always gets a value it
/// can serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    /// Set when the attempt found no existing session and interactive login
    /// is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_login: Option<bool>,
}

impl LoginOutcome {
    pub fn success(token: impl Into<String>) -> Self {
        Self {
            success: true,
            token: Some(token.into()),
            error: None,
            error_code: None,
            needs_login: None,
        }
    }

    pub fn failure(error: &SsoError) -> Self {
        Self {
            success: false,
            token: None,
            error: Some(error.to_string()),
            error_code: Some(error.code()),
            needs_login: None,
        }
    }

    pub fn needs_login() -> Self {
        Self {
            success: false,
            token: None,
            error: None,
            error_code: None,
            needs_login: Some(true),
        }
    }
}

impl From<moodle_sso_core::Result<String>> for LoginOutcome {
    fn from(result: moodle_sso_core::Result<String>) -> Self {
        match result {
            Ok(token) => Self::success(token),
            Err(error) => Self::failure(&error),
        }
    }
}

/// Stage transitions logged as a login attempt progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Started,
    Launched,
    AuthStateFound,
    CredentialsSubmitted,
    SamlResponseFound,
    TokenCapturing,
    Completed,
    Failed,
}

impl LoginStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Launched => "launched",
            Self::AuthStateFound => "authStateFound",
            Self::CredentialsSubmitted => "credentialsSubmitted",
            Self::SamlResponseFound => "samlResponseFound",
            Self::TokenCapturing => "tokenCapturing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LoginStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
