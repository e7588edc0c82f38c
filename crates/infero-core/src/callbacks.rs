//! Callback dispatcher
//!
//! Hosts observe a session through optional handler slots. Every handler is
//! called synchronously on the thread that drives the session, at the point
//! the event happens, with the caller's [`Sender`] passed through unchanged.
//! A slot left empty is simply skipped.
//!
//! Handlers must not call back into the session that invoked them. They are
//! `'static` closures, so they cannot hold a `&mut Session`, and the compiler
//! rejects attempts to do so.

use std::fmt;
use tracing::Level;

/// Opaque, caller-owned identifier handed back to every handler.
///
/// The session never interprets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Sender(usize);

impl Sender {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> usize {
        self.0
    }
}

type ErrorHandler = Box<dyn FnMut(Sender, &str)>;
type InfoHandler = Box<dyn FnMut(Sender, Level, &str)>;
type LoadProgressHandler = Box<dyn FnMut(Sender, &str, f32) -> bool>;
type LoadCompleteHandler = Box<dyn FnMut(Sender, &str, bool)>;
type StartHandler = Box<dyn FnMut(Sender)>;
type DoneHandler = Box<dyn FnMut(Sender, &str)>;
type TokenHandler = Box<dyn FnMut(Sender, &str)>;

/// Set of optional event handlers installed at `init`
#[derive(Default)]
pub struct Callbacks {
    sender: Sender,
    error: Option<ErrorHandler>,
    info: Option<InfoHandler>,
    load_model_progress: Option<LoadProgressHandler>,
    load_model_complete: Option<LoadCompleteHandler>,
    inference_start: Option<StartHandler>,
    inference_done: Option<DoneHandler>,
    inference_token: Option<TokenHandler>,
}

impl Callbacks {
    /// Create an empty callback set (every event is a no-op)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = sender;
        self
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    /// Called with the message of every recorded failure
    pub fn on_error(mut self, handler: impl FnMut(Sender, &str) + 'static) -> Self {
        self.error = Some(Box::new(handler));
        self
    }

    /// Called with informational messages about session activity
    pub fn on_info(mut self, handler: impl FnMut(Sender, Level, &str) + 'static) -> Self {
        self.info = Some(Box::new(handler));
        self
    }

    /// Called while a model loads; return `false` to abort the load
    pub fn on_load_model_progress(
        mut self,
        handler: impl FnMut(Sender, &str, f32) -> bool + 'static,
    ) -> Self {
        self.load_model_progress = Some(Box::new(handler));
        self
    }

    /// Called once per model when its load finishes or fails
    pub fn on_load_model_complete(
        mut self,
        handler: impl FnMut(Sender, &str, bool) + 'static,
    ) -> Self {
        self.load_model_complete = Some(Box::new(handler));
        self
    }

    pub fn on_inference_start(mut self, handler: impl FnMut(Sender) + 'static) -> Self {
        self.inference_start = Some(Box::new(handler));
        self
    }

    /// Called with the full response after a successful inference
    pub fn on_inference_done(mut self, handler: impl FnMut(Sender, &str) + 'static) -> Self {
        self.inference_done = Some(Box::new(handler));
        self
    }

    /// Called once per generated token, while generation is in progress
    pub fn on_inference_token(mut self, handler: impl FnMut(Sender, &str) + 'static) -> Self {
        self.inference_token = Some(Box::new(handler));
        self
    }

    pub(crate) fn error(&mut self, message: &str) {
        if let Some(handler) = self.error.as_mut() {
            handler(self.sender, message);
        }
    }

    /// Dispatch an info event and mirror it to the log
    pub(crate) fn info(&mut self, level: Level, text: &str) {
        match level {
            Level::ERROR => tracing::error!("{}", text),
            Level::WARN => tracing::warn!("{}", text),
            Level::INFO => tracing::info!("{}", text),
            Level::DEBUG => tracing::debug!("{}", text),
            _ => tracing::trace!("{}", text),
        }
        if let Some(handler) = self.info.as_mut() {
            handler(self.sender, level, text);
        }
    }

    /// Returns whether the load should continue
    pub(crate) fn load_model_progress(&mut self, model: &str, progress: f32) -> bool {
        match self.load_model_progress.as_mut() {
            Some(handler) => handler(self.sender, model, progress.clamp(0.0, 1.0)),
            None => true,
        }
    }

    pub(crate) fn load_model_complete(&mut self, model: &str, success: bool) {
        if let Some(handler) = self.load_model_complete.as_mut() {
            handler(self.sender, model, success);
        }
    }

    pub(crate) fn inference_start(&mut self) {
        if let Some(handler) = self.inference_start.as_mut() {
            handler(self.sender);
        }
    }

    pub(crate) fn inference_done(&mut self, response: &str) {
        if let Some(handler) = self.inference_done.as_mut() {
            handler(self.sender, response);
        }
    }

    pub(crate) fn inference_token(&mut self, token: &str) {
        if let Some(handler) = self.inference_token.as_mut() {
            handler(self.sender, token);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("sender", &self.sender)
            .field("error", &self.error.is_some())
            .field("info", &self.info.is_some())
            .field("load_model_progress", &self.load_model_progress.is_some())
            .field("load_model_complete", &self.load_model_complete.is_some())
            .field("inference_start", &self.inference_start.is_some())
            .field("inference_done", &self.inference_done.is_some())
            .field("inference_token", &self.inference_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_empty_callbacks_are_noops() {
        let mut callbacks = Callbacks::new();
        callbacks.error("boom");
        callbacks.info(Level::INFO, "hello");
        callbacks.load_model_complete("phi3", true);
        callbacks.inference_start();
        callbacks.inference_token("tok");
        callbacks.inference_done("done");

        // Missing progress handler means keep loading
        assert!(callbacks.load_model_progress("phi3", 0.5));
    }

    #[test]
    fn test_sender_passed_through_unchanged() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let mut callbacks = Callbacks::new()
            .with_sender(Sender::new(0xdead_beef))
            .on_inference_token(move |sender, token| {
                log.borrow_mut().push((sender, token.to_string()));
            });

        callbacks.inference_token("Hello");
        callbacks.inference_token(" world");

        assert_eq!(
            *seen.borrow(),
            vec![
                (Sender::new(0xdead_beef), "Hello".to_string()),
                (Sender::new(0xdead_beef), " world".to_string()),
            ]
        );
    }

    #[test]
    fn test_progress_handler_controls_continuation() {
        let mut callbacks =
            Callbacks::new().on_load_model_progress(|_, _, progress| progress < 0.5);

        assert!(callbacks.load_model_progress("phi3", 0.0));
        assert!(!callbacks.load_model_progress("phi3", 0.9));
    }

    #[test]
    fn test_progress_is_clamped() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let mut callbacks = Callbacks::new().on_load_model_progress(move |_, _, progress| {
            log.borrow_mut().push(progress);
            true
        });

        callbacks.load_model_progress("phi3", -1.0);
        callbacks.load_model_progress("phi3", 3.0);
        assert_eq!(*seen.borrow(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_debug_lists_registered_slots() {
        let callbacks = Callbacks::new().on_error(|_, _| {});
        let debug = format!("{:?}", callbacks);
        assert!(debug.contains("error: true"));
        assert!(debug.contains("inference_token: false"));
    }
}
