//! Raw generations in the harmony channel format.

/// Tail of a rendered prompt, as it appears before the generated text.
pub const PROMPT_TAIL: &str = "<|start|>user<|message|>What are the symptoms of flu?";

/// Output with both an analysis and a final section.
pub fn with_reasoning(reasoning: &str, answer: &str) -> String {
    format!(
        "{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>analysis<|message|>{reasoning}<|end|>\
         <|start|>assistant<|channel|>final<|message|>{answer}<|return|>"
    )
}

/// Output with only a final section.
pub fn final_only(answer: &str) -> String {
    format!("{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>final<|message|>{answer}<|return|>")
}

/// Output with an analysis section and no final section.
pub fn reasoning_only(reasoning: &str) -> String {
    format!("{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>analysis<|message|>{reasoning}<|end|>")
}

/// Output from a model that ignores the channel format.
pub fn untagged(text: &str) -> String {
    format!("{PROMPT_TAIL}<|end|>{text}")
}
