//! llama.cpp engine implementation
//!
//! This module encapsulates all llama.cpp-specific logic.

use infero_core::{Engine, EngineError, GenerationStats, LoadedModel, ModelSpec};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::model::{AddBos, Special};
use llama_cpp_2::token::data_array::LlamaTokenDataArray;
use once_cell::sync::OnceCell;
use std::num::NonZeroU32;
use std::time::Instant;
use tracing::debug;

// llama.cpp can only be initialized once per process
static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    BACKEND
        .get_or_try_init(LlamaBackend::init)
        .map_err(|e| EngineError::Backend(format!("failed to initialize llama.cpp: {}", e)))
}

fn backend_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::Backend(e.to_string())
}

/// Context sized to the model's window.
///
/// The whole prompt is decoded in one batch, and llama.cpp aborts when a
/// batch is larger than `n_batch`, so the batch limit matches the window.
fn context_params(max_context: u32) -> LlamaContextParams {
    LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(max_context))
        .with_n_batch(max_context)
}

/// Reassembles token byte pieces into UTF-8 text.
///
/// A multi-byte character may be split across tokens; its leading bytes are
/// held back until the rest arrive.
#[derive(Debug, Default)]
struct Utf8Pieces {
    pending: Vec<u8>,
}

impl Utf8Pieces {
    /// Append one token's bytes and take the text that is now complete
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(complete) => {
                    text.push_str(complete);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Bytes that can never form a character
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Drop an unfinished character, returning how many bytes it had
    fn discard_incomplete(&mut self) -> usize {
        let len = self.pending.len();
        self.pending.clear();
        len
    }
}

/// Engine that loads GGUF models with llama.cpp
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaCppEngine;

impl LlamaCppEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for LlamaCppEngine {
    fn load_model(
        &mut self,
        model: &ModelSpec,
        progress: &mut dyn FnMut(f32) -> bool,
    ) -> Result<Box<dyn LoadedModel>, EngineError> {
        if !model.path.is_file() {
            return Err(EngineError::ModelNotFound(model.path.clone()));
        }
        if !progress(0.0) {
            return Err(EngineError::LoadAborted);
        }

        let backend = backend()?;
        let model_params = LlamaModelParams::default();
        let llama_model = LlamaModel::load_from_file(backend, &model.path, &model_params)
            .map_err(|e| EngineError::Load(e.to_string()))?;

        if !progress(1.0) {
            return Err(EngineError::LoadAborted);
        }

        debug!(model = %model.name, path = %model.path.display(), "llama.cpp model loaded");

        Ok(Box::new(LlamaCppModel {
            model: llama_model,
            max_context: model.max_context,
        }))
    }
}

/// A loaded GGUF model.
///
/// A fresh context is created for every generation, since the whole history
/// is re-sent as the prompt each time.
pub struct LlamaCppModel {
    model: LlamaModel,
    max_context: u32,
}

impl LoadedModel for LlamaCppModel {
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<GenerationStats, EngineError> {
        let prompt_started = Instant::now();

        let backend = backend()?;
        let mut context = self
            .model
            .new_context(backend, context_params(self.max_context))
            .map_err(backend_error)?;

        // Tokenize prompt
        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(backend_error)?;
        let prompt_tokens = tokens.len() as u32;

        if tokens.is_empty() || prompt_tokens >= self.max_context {
            return Err(EngineError::ContextOverflow {
                prompt_tokens,
                max_context: self.max_context,
            });
        }

        // Never generate past the end of the context window
        let budget = max_tokens.min(self.max_context - prompt_tokens);

        let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
        for (i, token) in tokens.iter().enumerate() {
            let is_last = i == tokens.len() - 1;
            batch
                .add(*token, i as i32, &[0], is_last)
                .map_err(backend_error)?;
        }

        // Decode the prompt
        context.decode(&mut batch).map_err(backend_error)?;
        let prompt_eval = prompt_started.elapsed();
        let generation_started = Instant::now();

        // Generate tokens
        let mut pieces = Utf8Pieces::default();
        let mut n_generated: u32 = 0;
        while n_generated < budget {
            // Get token candidates and sample greedily
            let candidates = context.candidates();
            let mut candidates_array = LlamaTokenDataArray::from_iter(candidates, false);

            candidates_array.sample_token_greedy();
            let token = match candidates_array.selected_token() {
                Some(t) => t,
                None => break,
            };

            if self.model.is_eog_token(token) {
                break;
            }

            n_generated += 1;

            // One piece per token, empty while a character is still incomplete
            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(backend_error)?;
            if !on_token(&pieces.push(&bytes)) {
                break;
            }

            if n_generated >= budget {
                break;
            }

            // Prepare next batch
            batch.clear();
            batch
                .add(token, (prompt_tokens + n_generated - 1) as i32, &[0], true)
                .map_err(backend_error)?;

            context.decode(&mut batch).map_err(backend_error)?;
        }

        let generation = generation_started.elapsed();

        let dropped = pieces.discard_incomplete();
        if dropped > 0 {
            debug!(bytes = dropped, "generation ended inside a multi-byte character");
        }
        debug!(prompt_tokens, n_generated, "llama.cpp generation finished");

        Ok(GenerationStats {
            prompt_tokens,
            prompt_eval,
            generation,
        })
    }
}
