//! Inference engine abstraction
//!
//! This module defines the interface between the session and whatever actually
//! runs the model. The session never tokenizes or samples by itself - it hands a
//! rendered prompt to a [`LoadedModel`] and receives token pieces back.

use crate::config::ModelSpec;
use std::path::PathBuf;
use std::time::Duration;

/// Errors reported by an engine implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("model file not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("model load aborted")]
    LoadAborted,

    #[error("model load failed: {0}")]
    Load(String),

    #[error("prompt of {prompt_tokens} tokens does not fit a context of {max_context}")]
    ContextOverflow { prompt_tokens: u32, max_context: u32 },

    #[error("backend error: {0}")]
    Backend(String),
}

/// Size and timing of one generation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationStats {
    /// Tokens in the rendered prompt
    pub prompt_tokens: u32,

    /// Wall-clock time spent preparing and evaluating the prompt
    pub prompt_eval: Duration,

    /// Wall-clock time spent sampling and decoding output tokens
    pub generation: Duration,
}

/// Host-side engine that turns model descriptions into loaded models
///
/// Implementors own whatever process-wide backend state they need. Each model
/// returned by [`Engine::load_model`] is exclusively owned by one session and
/// released when dropped.
pub trait Engine {
    /// Load a model.
    ///
    /// `progress` receives values in `0.0..=1.0`; when it returns `false` the
    /// load must stop and report [`EngineError::LoadAborted`].
    fn load_model(
        &mut self,
        model: &ModelSpec,
        progress: &mut dyn FnMut(f32) -> bool,
    ) -> Result<Box<dyn LoadedModel>, EngineError>;
}

/// A model ready to generate text
pub trait LoadedModel {
    /// Generate a continuation of `prompt`.
    ///
    /// Every produced token piece is passed to `on_token` as soon as it is
    /// sampled. A piece may be empty when a token ends inside a multi-byte
    /// character; its bytes are carried into the next piece. Generation stops
    /// at end-of-sequence, after `max_tokens` pieces, or as soon as
    /// `on_token` returns `false`.
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<GenerationStats, EngineError>;
}
