//! Error taxonomy for session operations
//!
//! Every fallible session operation returns [`InferoError`]. The session also
//! records the rendered message as its last error, so callers that only keep
//! a success flag can still ask what went wrong.

use crate::engine::EngineError;
use crate::session::SessionState;

/// Broad category of an [`InferoError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Configuration missing, malformed, or naming an unloadable model
    Config,
    /// Operation issued outside its valid lifecycle state
    State,
    /// Bad argument: role, token ceiling, model name
    Validation,
    /// Failure inside the inference engine while generating
    Generation,
}

#[derive(Debug, thiserror::Error)]
pub enum InferoError {
    #[error("config error: {reason}")]
    Config { reason: String },

    #[error("failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("loading of model '{model}' was aborted by the progress callback")]
    LoadAborted { model: String },

    #[error("cannot {operation} while session is {state}")]
    State {
        operation: &'static str,
        state: SessionState,
    },

    #[error("invalid role '{0}' (expected system, user, assistant or tool)")]
    InvalidRole(String),

    #[error("max_tokens must be greater than zero")]
    ZeroMaxTokens,

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("generation failed: {0}")]
    Generation(#[from] EngineError),
}

impl InferoError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } | Self::ModelLoad { .. } | Self::LoadAborted { .. } => {
                ErrorKind::Config
            }
            Self::State { .. } => ErrorKind::State,
            Self::InvalidRole(_) | Self::ZeroMaxTokens | Self::UnknownModel(_) => {
                ErrorKind::Validation
            }
            Self::Generation(_) => ErrorKind::Generation,
        }
    }
}
