//! # infero-core
//!
//! Session and orchestration layer for conversational LLM inference, with no
//! dependency on a specific inference engine.
//!
//! This crate provides:
//! - A session lifecycle (`init` / `quit`) driven by a configuration file
//! - Role-tagged message history
//! - Single in-flight inference with streaming token callbacks
//! - Usage accounting for the last completed call
//!
//! Model loading and token generation are delegated to an [`Engine`]
//! implementation supplied by the host.

#![forbid(unsafe_code)]

pub mod callbacks;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod prompt;
pub mod session;
pub mod simple;
pub mod usage;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use callbacks::{Callbacks, Sender};
pub use config::{InferoConfig, ModelConfig, ModelSpec};
pub use engine::{Engine, EngineError, GenerationStats, LoadedModel};
pub use error::{ErrorKind, InferoError};
pub use message::{Message, MessageHistory, Role, ROLE_ASSISTANT, ROLE_SYSTEM, ROLE_TOOL, ROLE_USER};
pub use session::{InferenceOutput, ReplyPolicy, Session, SessionState};
pub use simple::simple_inference;
pub use usage::UsageStats;
