//! Session configuration
//!
//! Reads a `config.json` (or `.yaml`/`.yml`) describing which models exist and
//! where their weights live. The session only needs, per model name, enough
//! to ask the engine for a loaded model and to render a prompt for it.

use crate::error::InferoError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TEMPLATE: &str = "<|{role}|>\n{content}<|end|>\n";
pub const DEFAULT_TEMPLATE_END: &str = "<|assistant|>\n";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferoConfig {
    /// Directory holding the model files
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Models available to the session, addressed by name
    pub models: Vec<ModelConfig>,

    /// Output token ceiling used when the caller has no preference
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Append each successful reply to the history as an `assistant` message
    #[serde(default)]
    pub append_response: bool,
}

/// One model entry in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,

    /// File name relative to `model_path`, or an absolute path
    pub filename: String,

    #[serde(default = "default_max_context")]
    pub max_context: u32,

    /// Per-message template; `{role}` and `{content}` are substituted
    #[serde(default = "default_template")]
    pub template: String,

    /// Appended after the last message to cue the assistant's turn
    #[serde(default = "default_template_end")]
    pub template_end: String,
}

/// A model entry with its weights path resolved
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub path: PathBuf,
    pub max_context: u32,
    pub template: String,
    pub template_end: String,
}

fn default_model_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_context() -> u32 {
    4096
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_template_end() -> String {
    DEFAULT_TEMPLATE_END.to_string()
}

impl InferoConfig {
    /// Load and validate a configuration file.
    ///
    /// The format is chosen by extension: `.yaml`/`.yml` are parsed as YAML,
    /// everything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InferoError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            InferoError::config(format!("cannot read '{}': {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );

        let config: InferoConfig = if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| InferoError::config(format!("invalid YAML in '{}': {}", path.display(), e)))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| InferoError::config(format!("invalid JSON in '{}': {}", path.display(), e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the session relies on
    pub fn validate(&self) -> Result<(), InferoError> {
        if self.models.is_empty() {
            return Err(InferoError::config("no models configured"));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(InferoError::config("model with empty name"));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(InferoError::config(format!(
                    "duplicate model name '{}'",
                    model.name
                )));
            }
            if model.filename.trim().is_empty() {
                return Err(InferoError::config(format!(
                    "model '{}' has no filename",
                    model.name
                )));
            }
            if model.max_context == 0 {
                return Err(InferoError::config(format!(
                    "model '{}' has max_context 0",
                    model.name
                )));
            }
            if !model.template.contains("{content}") {
                return Err(InferoError::config(format!(
                    "template of model '{}' has no {{content}} placeholder",
                    model.name
                )));
            }
        }

        Ok(())
    }

    /// Resolve every model entry against `model_path`
    pub fn model_specs(&self) -> Vec<ModelSpec> {
        self.models
            .iter()
            .map(|model| ModelSpec {
                name: model.name.clone(),
                path: self.model_path.join(&model.filename),
                max_context: model.max_context,
                template: model.template.clone(),
                template_end: model.template_end.clone(),
            })
            .collect()
    }
}
