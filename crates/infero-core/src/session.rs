//! Inference session
//!
//! A [`Session`] owns the message history, the installed callbacks and every
//! model loaded at `init`. It moves through
//! `Uninitialized -> Ready -> (Inferring) -> Ready -> ... -> Shutdown`.
//!
//! All operations take `&mut self`, so a session is driven by one owner at a
//! time and an inference call can never interleave with another call on the
//! same session. `Session` is not `Sync`; sharing one across threads is not
//! supported. There is no way to cancel an inference once it has started: it
//! runs until end-of-sequence, the token ceiling, or an engine failure.

use crate::callbacks::Callbacks;
use crate::config::{InferoConfig, ModelSpec};
use crate::engine::{Engine, EngineError, LoadedModel};
use crate::error::InferoError;
use crate::message::{Message, MessageHistory, Role};
use crate::prompt::render_prompt;
use crate::usage::UsageStats;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn, Level};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Inferring,
    Shutdown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Inferring => "inferring",
            SessionState::Shutdown => "shutdown",
        })
    }
}

/// What happens to a successful reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyPolicy {
    /// Leave the history untouched
    #[default]
    Discard,
    /// Append the reply as an `assistant` message
    AppendToHistory,
}

/// Result of a successful inference call
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub response: String,
    pub usage: UsageStats,
}

struct ModelSlot {
    spec: ModelSpec,
    model: Box<dyn LoadedModel>,
}

pub struct Session {
    engine: Box<dyn Engine>,
    state: SessionState,
    config: Option<InferoConfig>,
    models: HashMap<String, ModelSlot>,
    history: MessageHistory,
    callbacks: Callbacks,
    usage: UsageStats,
    reply_policy: ReplyPolicy,
    last_error: String,
}

impl Session {
    /// Create an uninitialized session that will load models through `engine`
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            engine,
            state: SessionState::Uninitialized,
            config: None,
            models: HashMap::new(),
            history: MessageHistory::new(),
            callbacks: Callbacks::new(),
            usage: UsageStats::default(),
            reply_policy: ReplyPolicy::default(),
            last_error: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message of the most recent failure, or `""` if none is recorded.
    ///
    /// Overwritten by the next failure; successful calls leave it alone.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn clear_last_error(&mut self) {
        self.last_error.clear();
    }

    /// Usage of the most recent successful inference.
    ///
    /// A failed inference keeps the previous value; `init` resets it.
    pub fn usage(&self) -> UsageStats {
        self.usage
    }

    pub fn messages(&self) -> &[Message] {
        self.history.as_slice()
    }

    pub fn config(&self) -> Option<&InferoConfig> {
        self.config.as_ref()
    }

    /// Names of the models loaded by `init`, sorted
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn reply_policy(&self) -> ReplyPolicy {
        self.reply_policy
    }

    pub fn set_reply_policy(&mut self, policy: ReplyPolicy) {
        self.reply_policy = policy;
    }

    /// Load `config_path`, install `callbacks` and load every configured model.
    ///
    /// Valid from `Uninitialized` or `Shutdown`. On failure the session keeps
    /// its previous state and no callbacks stay installed.
    pub fn init(
        &mut self,
        config_path: impl AsRef<Path>,
        callbacks: Callbacks,
    ) -> Result<(), InferoError> {
        self.ensure_can_init()?;
        self.callbacks = callbacks;

        let result =
            InferoConfig::load(config_path).and_then(|config| self.load_models(config));
        self.finish_init(result)
    }

    /// Same as [`Session::init`] with an already parsed configuration
    pub fn init_with_config(
        &mut self,
        config: InferoConfig,
        callbacks: Callbacks,
    ) -> Result<(), InferoError> {
        self.ensure_can_init()?;
        self.callbacks = callbacks;

        let result = config.validate().and_then(|()| self.load_models(config));
        self.finish_init(result)
    }

    /// Release every loaded model and uninstall callbacks.
    ///
    /// A no-op unless the session is initialized.
    pub fn quit(&mut self) {
        if !matches!(self.state, SessionState::Ready | SessionState::Inferring) {
            return;
        }

        let released = self.models.len();
        self.models.clear();
        self.config = None;
        self.history.clear();
        self.callbacks.info(Level::INFO, "session shut down");
        self.callbacks = Callbacks::new();
        self.state = SessionState::Shutdown;

        info!(released_models = released, "infero session shut down");
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> Result<(), InferoError> {
        self.ensure_ready("add a message")?;

        let content = content.into();
        debug!(role = %role, len = content.len(), "message added");
        self.history.push(role, content);
        Ok(())
    }

    /// Add a message whose role is given as one of the role strings
    pub fn add_message_str(&mut self, role: &str, content: impl Into<String>) -> Result<(), InferoError> {
        self.ensure_ready("add a message")?;

        match role.parse::<Role>() {
            Ok(role) => self.add_message(role, content),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn clear_messages(&mut self) -> Result<(), InferoError> {
        self.ensure_ready("clear messages")?;

        debug!(cleared = self.history.len(), "messages cleared");
        self.history.clear();
        Ok(())
    }

    /// Content of the most recent `user` message
    pub fn last_user_message(&self) -> Option<&str> {
        self.history.last_user_message()
    }

    /// Run inference on `model_name` over the whole history.
    ///
    /// Emits `InferenceStart`, one `InferenceToken` per generated token and,
    /// only on success, `InferenceDone`. An empty history is sent as is.
    /// A zero `max_tokens` or an unknown model fails before any callback
    /// fires, the Error handler included. At most `max_tokens` tokens are
    /// produced; hitting the ceiling truncates the reply and still succeeds.
    /// Tokens streamed before a failure are not retracted and should be
    /// discarded by the caller.
    pub fn inference(
        &mut self,
        model_name: &str,
        max_tokens: u32,
    ) -> Result<InferenceOutput, InferoError> {
        self.ensure_ready("run inference")?;

        // Argument errors are recorded without firing any callback
        if max_tokens == 0 {
            return Err(self.record(InferoError::ZeroMaxTokens));
        }
        if !self.models.contains_key(model_name) {
            return Err(self.record(InferoError::UnknownModel(model_name.to_string())));
        }

        self.state = SessionState::Inferring;
        let result = self.generate(model_name, max_tokens);
        self.state = SessionState::Ready;

        let output = match result {
            Ok(output) => output,
            Err(err) => return Err(self.fail(err)),
        };

        self.usage = output.usage;
        self.callbacks.inference_done(&output.response);

        if self.reply_policy == ReplyPolicy::AppendToHistory {
            self.history.push(Role::Assistant, output.response.clone());
        }

        info!(
            model = model_name,
            input_tokens = output.usage.input_tokens,
            output_tokens = output.usage.output_tokens,
            input_tps = output.usage.token_input_speed,
            output_tps = output.usage.token_output_speed,
            "inference complete"
        );

        Ok(output)
    }

    fn generate(&mut self, model_name: &str, max_tokens: u32) -> Result<InferenceOutput, InferoError> {
        let Self {
            models,
            history,
            callbacks,
            ..
        } = self;

        let slot = models
            .get_mut(model_name)
            .ok_or_else(|| InferoError::UnknownModel(model_name.to_string()))?;

        let prompt = render_prompt(&slot.spec, history.as_slice());
        debug!(
            model = model_name,
            messages = history.len(),
            prompt_len = prompt.len(),
            max_tokens,
            "starting inference"
        );

        callbacks.inference_start();

        let mut response = String::new();
        let mut output_tokens: u32 = 0;

        let stats = slot.model.generate(&prompt, max_tokens, &mut |token| {
            // The ceiling holds even if the engine keeps producing
            if output_tokens >= max_tokens {
                return false;
            }
            output_tokens += 1;
            response.push_str(token);
            callbacks.inference_token(token);
            output_tokens < max_tokens
        })?;

        Ok(InferenceOutput {
            response,
            usage: UsageStats::measure(
                stats.prompt_tokens,
                output_tokens,
                stats.prompt_eval,
                stats.generation,
            ),
        })
    }

    fn load_models(
        &mut self,
        config: InferoConfig,
    ) -> Result<(InferoConfig, HashMap<String, ModelSlot>), InferoError> {
        let mut models = HashMap::new();

        for spec in config.model_specs() {
            self.callbacks.info(
                Level::INFO,
                &format!("loading model '{}' from {}", spec.name, spec.path.display()),
            );

            let callbacks = &mut self.callbacks;
            let mut aborted = false;
            let loaded = self.engine.load_model(&spec, &mut |progress| {
                let keep_going = callbacks.load_model_progress(&spec.name, progress);
                aborted |= !keep_going;
                keep_going
            });

            match loaded {
                Ok(model) if !aborted => {
                    self.callbacks.load_model_complete(&spec.name, true);
                    models.insert(spec.name.clone(), ModelSlot { spec, model });
                }
                Ok(_) | Err(EngineError::LoadAborted) => {
                    self.callbacks.load_model_complete(&spec.name, false);
                    return Err(InferoError::LoadAborted { model: spec.name });
                }
                Err(err) => {
                    self.callbacks.load_model_complete(&spec.name, false);
                    return Err(InferoError::ModelLoad {
                        model: spec.name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok((config, models))
    }

    fn finish_init(
        &mut self,
        result: Result<(InferoConfig, HashMap<String, ModelSlot>), InferoError>,
    ) -> Result<(), InferoError> {
        match result {
            Ok((config, models)) => {
                self.reply_policy = if config.append_response {
                    ReplyPolicy::AppendToHistory
                } else {
                    ReplyPolicy::Discard
                };
                self.models = models;
                self.config = Some(config);
                self.history.clear();
                self.usage = UsageStats::default();
                self.state = SessionState::Ready;

                self.callbacks.info(Level::INFO, "session ready");
                info!(models = ?self.model_names(), "infero session initialized");
                Ok(())
            }
            Err(err) => {
                let err = self.fail(err);
                self.callbacks = Callbacks::new();
                Err(err)
            }
        }
    }

    fn ensure_can_init(&mut self) -> Result<(), InferoError> {
        match self.state {
            SessionState::Uninitialized | SessionState::Shutdown => Ok(()),
            state => Err(self.fail(InferoError::State {
                operation: "initialize",
                state,
            })),
        }
    }

    fn ensure_ready(&mut self, operation: &'static str) -> Result<(), InferoError> {
        match self.state {
            SessionState::Ready => Ok(()),
            state => Err(self.fail(InferoError::State { operation, state })),
        }
    }

    /// Record a failure: last error, error callback and log
    fn fail(&mut self, err: InferoError) -> InferoError {
        let err = self.record(err);
        self.callbacks.error(&self.last_error);
        err
    }

    /// Record a failure in the last error and the log only
    fn record(&mut self, err: InferoError) -> InferoError {
        let message = err.to_string();
        warn!(kind = ?err.kind(), "{}", message);
        self.last_error = message;
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.quit();
    }
}
