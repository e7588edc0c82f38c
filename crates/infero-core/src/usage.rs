use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token counts and throughput of the most recent completed inference call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Prompt tokens per second
    pub token_input_speed: f64,

    /// Generated tokens per second
    pub token_output_speed: f64,

    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl UsageStats {
    /// Build usage from the counts and wall-clock time of each phase.
    ///
    /// A phase that took no measurable time reports a speed of `0.0`.
    pub fn measure(
        input_tokens: u32,
        output_tokens: u32,
        prompt_elapsed: Duration,
        generation_elapsed: Duration,
    ) -> Self {
        Self {
            token_input_speed: tokens_per_second(input_tokens, prompt_elapsed),
            token_output_speed: tokens_per_second(output_tokens, generation_elapsed),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

fn tokens_per_second(tokens: u32, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        f64::from(tokens) / secs
    } else {
        0.0
    }
}
