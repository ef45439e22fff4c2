use std::fmt;

use thiserror::Error;

/// Which external service produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Llm,
    Repo,
    Deploy,
    Skills,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Llm => "llm",
            Self::Repo => "repo",
            Self::Deploy => "deploy",
            Self::Skills => "skills",
        };
        f.write_str(s)
    }
}

/// HTTP-style status class attached to external-service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Auth,
    Payment,
    RateLimited,
    NotFound,
    Server,
    Transport,
    Cancelled,
    Unexpected,
}

impl StatusClass {
    pub fn from_http(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            402 => Self::Payment,
            429 => Self::RateLimited,
            404 => Self::NotFound,
            500..=599 => Self::Server,
            _ => Self::Unexpected,
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Payment => "payment",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::Server => "server",
            Self::Transport => "transport",
            Self::Cancelled => "cancelled",
            Self::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("arrêté manuellement")]
    Cancelled,

    #[error("{provider} error ({status}): {body}")]
    External {
        provider: Provider,
        status: StatusClass,
        body: String,
    },

    #[error("could not parse JSON from model reply: {0}")]
    Parse(String),

    #[error("missing `{0}` artifact")]
    MissingArtifact(&'static str),

    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("pipeline {0} is not in a terminal phase")]
    NotTerminal(String),

    #[error("unknown pipeline {0}")]
    UnknownPipeline(String),
}

impl PipelineError {
    pub fn external(provider: Provider, status: StatusClass, body: impl Into<String>) -> Self {
        Self::External { provider, status, body: body.into() }
    }

    /// True when trying further models/retries cannot help.
    pub fn aborts_fallback(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::External { status, .. } => {
                matches!(status, StatusClass::Auth | StatusClass::Payment | StatusClass::Cancelled)
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::External { status: StatusClass::Cancelled, .. }
        )
    }
}

/// Whether an anyhow chain bottoms out in a cancellation.
pub fn chain_is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_cancelled)
    })
}
