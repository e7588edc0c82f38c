use crate::config::ModelSpec;
use crate::message::Message;

/// Render the conversation history into a single prompt for `model`.
///
/// Each message goes through the model's template in history order, then the
/// template end is appended so the model continues as the assistant.
pub fn render_prompt(model: &ModelSpec, history: &[Message]) -> String {
    let mut prompt = String::new();

    for msg in history {
        prompt.push_str(
            &model
                .template
                .replace("{role}", msg.role.as_str())
                .replace("{content}", &msg.content),
        );
    }

    prompt.push_str(&model.template_end);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use std::path::PathBuf;

    fn spec(template: &str, template_end: &str) -> ModelSpec {
        ModelSpec {
            name: "phi3".into(),
            path: PathBuf::from("phi3.gguf"),
            max_context: 4096,
            template: template.into(),
            template_end: template_end.into(),
        }
    }

    #[test]
    fn test_render_in_history_order() {
        let history = vec![
            Message::new(Role::System, "You are a helpful AI assistant."),
            Message::new(Role::User, "What is AI?"),
        ];

        let prompt = render_prompt(&spec("<|{role}|>{content}<|end|>", "<|assistant|>"), &history);
        assert_eq!(
            prompt,
            "<|system|>You are a helpful AI assistant.<|end|><|user|>What is AI?<|end|><|assistant|>"
        );
    }

    #[test]
    fn test_template_without_role_placeholder() {
        let history = vec![Message::new(Role::Tool, "ok")];
        let prompt = render_prompt(&spec("{content}\n", "> "), &history);
        assert_eq!(prompt, "ok\n> ");
    }
}
