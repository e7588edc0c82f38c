//! Test doubles shared by the unit tests

use crate::callbacks::Callbacks;
use crate::config::{InferoConfig, ModelConfig, ModelSpec, DEFAULT_TEMPLATE, DEFAULT_TEMPLATE_END};
use crate::engine::{Engine, EngineError, GenerationStats, LoadedModel};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Script {
    tokens: Vec<String>,
    fail_after: Option<usize>,
    ignore_stop: bool,
    prompt_tokens: u32,
    prompt_eval: Duration,
    generation: Duration,
    missing_models: Vec<String>,
    prompts: Vec<String>,
    live_models: usize,
}

/// Engine that replays a fixed token script.
///
/// Clones share the same script, so a test can keep a handle after moving
/// the engine into a session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    script: Rc<RefCell<Script>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: &[&str]) -> Self {
        let engine = Self::new();
        engine.script.borrow_mut().tokens = tokens.iter().map(|t| t.to_string()).collect();
        engine
    }

    /// Fail with a backend error instead of producing token `index`
    pub fn failing_after(self, index: usize) -> Self {
        self.fail_after(index);
        self
    }

    pub fn fail_after(&self, index: usize) {
        self.script.borrow_mut().fail_after = Some(index);
    }

    /// Keep producing tokens even when told to stop
    pub fn ignoring_stop(self) -> Self {
        self.script.borrow_mut().ignore_stop = true;
        self
    }

    pub fn with_prompt_tokens(self, count: u32) -> Self {
        self.script.borrow_mut().prompt_tokens = count;
        self
    }

    /// Phase durations reported for every generation
    pub fn with_timings(self, prompt_eval: Duration, generation: Duration) -> Self {
        {
            let mut script = self.script.borrow_mut();
            script.prompt_eval = prompt_eval;
            script.generation = generation;
        }
        self
    }

    pub fn with_missing_model(self, name: &str) -> Self {
        self.script.borrow_mut().missing_models.push(name.to_string());
        self
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.script.borrow().prompts.last().cloned()
    }

    /// Models loaded and not yet dropped
    pub fn live_models(&self) -> usize {
        self.script.borrow().live_models
    }
}

impl Engine for ScriptedEngine {
    fn load_model(
        &mut self,
        model: &ModelSpec,
        progress: &mut dyn FnMut(f32) -> bool,
    ) -> Result<Box<dyn LoadedModel>, EngineError> {
        if self.script.borrow().missing_models.contains(&model.name) {
            return Err(EngineError::ModelNotFound(model.path.clone()));
        }

        for step in [0.0, 0.5, 1.0] {
            if !progress(step) {
                return Err(EngineError::LoadAborted);
            }
        }

        self.script.borrow_mut().live_models += 1;
        Ok(Box::new(ScriptedModel {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedModel {
    script: Rc<RefCell<Script>>,
}

impl LoadedModel for ScriptedModel {
    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: u32,
        on_token: &mut dyn FnMut(&str) -> bool,
    ) -> Result<GenerationStats, EngineError> {
        let (tokens, fail_after, ignore_stop, prompt_tokens, prompt_eval, generation) = {
            let mut script = self.script.borrow_mut();
            script.prompts.push(prompt.to_string());
            let prompt_tokens = if script.prompt_tokens > 0 {
                script.prompt_tokens
            } else {
                prompt.split_whitespace().count() as u32
            };
            (
                script.tokens.clone(),
                script.fail_after,
                script.ignore_stop,
                prompt_tokens,
                script.prompt_eval,
                script.generation,
            )
        };

        for (i, token) in tokens.iter().enumerate() {
            if fail_after == Some(i) {
                return Err(EngineError::Backend("out of memory".into()));
            }
            if !ignore_stop && i as u32 >= max_tokens {
                break;
            }
            if !on_token(token) && !ignore_stop {
                break;
            }
        }

        if matches!(fail_after, Some(n) if n >= tokens.len()) {
            return Err(EngineError::Backend("out of memory".into()));
        }

        Ok(GenerationStats {
            prompt_tokens,
            prompt_eval,
            generation,
        })
    }
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.script.borrow_mut().live_models -= 1;
    }
}

/// Everything a session reported through its callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Error(String),
    Info(String),
    Progress(String, f32),
    LoadComplete(String, bool),
    Start,
    Token(String),
    Done(String),
}

pub fn recording_callbacks() -> (Callbacks, Rc<RefCell<Vec<Event>>>) {
    let events = Rc::new(RefCell::new(Vec::new()));

    let (e1, e2, e3, e4, e5, e6, e7) = (
        events.clone(),
        events.clone(),
        events.clone(),
        events.clone(),
        events.clone(),
        events.clone(),
        events.clone(),
    );

    let callbacks = Callbacks::new()
        .on_error(move |_, msg| e1.borrow_mut().push(Event::Error(msg.to_string())))
        .on_info(move |_, _, text| e2.borrow_mut().push(Event::Info(text.to_string())))
        .on_load_model_progress(move |_, name, progress| {
            e3.borrow_mut().push(Event::Progress(name.to_string(), progress));
            true
        })
        .on_load_model_complete(move |_, name, ok| {
            e4.borrow_mut().push(Event::LoadComplete(name.to_string(), ok))
        })
        .on_inference_start(move |_| e5.borrow_mut().push(Event::Start))
        .on_inference_token(move |_, token| e6.borrow_mut().push(Event::Token(token.to_string())))
        .on_inference_done(move |_, response| {
            e7.borrow_mut().push(Event::Done(response.to_string()))
        });

    (callbacks, events)
}

/// Valid configuration listing `names`, in order
pub fn config_for(names: &[&str]) -> InferoConfig {
    InferoConfig {
        model_path: PathBuf::from("/models"),
        models: names
            .iter()
            .map(|name| ModelConfig {
                name: name.to_string(),
                filename: format!("{}.gguf", name),
                max_context: 4096,
                template: DEFAULT_TEMPLATE.to_string(),
                template_end: DEFAULT_TEMPLATE_END.to_string(),
            })
            .collect(),
        default_max_tokens: 1024,
        append_response: false,
    }
}
