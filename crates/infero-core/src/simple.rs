use crate::callbacks::Callbacks;
use crate::engine::Engine;
use crate::error::InferoError;
use crate::message::Role;
use crate::session::Session;
use std::path::Path;

/// Answer a single question with a throwaway session.
///
/// Loads `config_path`, asks `question` as the only `user` message, and tears
/// the session down again. No callbacks are installed and nothing survives
/// between calls.
pub fn simple_inference(
    engine: Box<dyn Engine>,
    config_path: impl AsRef<Path>,
    model_name: &str,
    question: &str,
    max_tokens: u32,
) -> Result<String, InferoError> {
    let mut session = Session::new(engine);
    session.init(config_path, Callbacks::new())?;
    session.add_message(Role::User, question)?;

    let result = session.inference(model_name, max_tokens);
    session.quit();

    result.map(|output| output.response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;
    use std::io::Write;

    fn config_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"models": [{"name": "phi3", "filename": "phi3.gguf"}]}"#)
            .unwrap();
        file
    }

    #[test]
    fn test_simple_inference_answers() {
        let engine = ScriptedEngine::with_tokens(&["4", "."]);
        let file = config_file();

        let answer =
            simple_inference(Box::new(engine.clone()), file.path(), "phi3", "What is 2+2?", 64)
                .unwrap();
        assert_eq!(answer, "4.");
        assert!(engine.last_prompt().unwrap().contains("<|user|>\nWhat is 2+2?"));
        assert_eq!(engine.live_models(), 0);
    }

    #[test]
    fn test_simple_inference_is_isolated() {
        let engine = ScriptedEngine::with_tokens(&["ok"]);
        let file = config_file();

        simple_inference(Box::new(engine.clone()), file.path(), "phi3", "first", 8).unwrap();
        simple_inference(Box::new(engine.clone()), file.path(), "phi3", "second", 8).unwrap();

        let prompt = engine.last_prompt().unwrap();
        assert!(prompt.contains("second"));
        assert!(!prompt.contains("first"));
    }

    #[test]
    fn test_simple_inference_reports_errors() {
        let file = config_file();

        let err = simple_inference(Box::new(ScriptedEngine::new()), file.path(), "llama3", "hi", 8)
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown model 'llama3'");

        let err = simple_inference(
            Box::new(ScriptedEngine::new()),
            "/missing/config.json",
            "phi3",
            "hi",
            8,
        )
        .unwrap_err();
        assert!(matches!(err, InferoError::Config { .. }));
    }
}
