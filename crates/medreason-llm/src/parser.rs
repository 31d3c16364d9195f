//! Channel parsing for harmony-formatted generations.
//!
//! The fine-tuned model writes its reasoning to the `analysis` channel and
//! the answer to the `final` channel:
//!
//! ```text
//! ...<|end|><|start|>assistant<|channel|>analysis<|message|>REASONING<|end|>
//! <|start|>assistant<|channel|>final<|message|>ANSWER<|return|>
//! ```
//!
//! Each section is located independently: the first opening marker wins and
//! the section runs to the nearest closing marker after it. A section whose
//! closing marker never appears counts as absent.

use medreason_core::ParsedAnswer;

/// Returned when the output carries no final section.
pub const NOT_FINETUNED_MESSAGE: &str =
    "Model output is not in the expected format. The fine-tuned adapter may not be active.";

/// An opening/closing marker pair delimiting one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSection {
    pub open: &'static str,
    pub close: &'static str,
}

/// Reasoning section. Opens with the end of the prompt's last turn.
pub const REASONING_SECTION: ChannelSection = ChannelSection {
    open: "<|end|><|start|>assistant<|channel|>analysis<|message|>",
    close: "<|end|>",
};

/// Final-answer section.
pub const FINAL_SECTION: ChannelSection = ChannelSection {
    open: "<|start|>assistant<|channel|>final<|message|>",
    close: "<|return|>",
};

impl ChannelSection {
    /// Text between the first opening marker and the nearest closing marker
    /// after it, trimmed. Spans line breaks.
    pub fn extract<'a>(&self, raw: &'a str) -> Option<&'a str> {
        let start = raw.find(self.open)? + self.open.len();
        let len = raw[start..].find(self.close)?;
        Some(raw[start..start + len].trim())
    }

    /// Whether the opening marker appears at all.
    pub fn is_opened(&self, raw: &str) -> bool {
        raw.contains(self.open)
    }
}

/// Split raw output into reasoning and final sections.
pub fn parse(raw: &str) -> ParsedAnswer {
    ParsedAnswer {
        reasoning: REASONING_SECTION.extract(raw).map(str::to_string),
        final_answer: FINAL_SECTION.extract(raw).map(str::to_string),
    }
}

/// Caller-facing text for raw output.
///
/// Reasoning without a final section is discarded and the fixed
/// [`NOT_FINETUNED_MESSAGE`] is returned instead.
pub fn render(raw: &str) -> String {
    parse(raw)
        .render()
        .unwrap_or_else(|| NOT_FINETUNED_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROMPT_TAIL: &str = "<|start|>user<|message|>What causes fever?";

    fn harmony(reasoning: &str, answer: &str) -> String {
        format!(
            "{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>analysis<|message|>{reasoning}<|end|>\
             <|start|>assistant<|channel|>final<|message|>{answer}<|return|>"
        )
    }

    #[test]
    fn test_both_sections_trimmed() {
        let raw = harmony("  infection raises the set point \n", "\nPyrogens. ");
        assert_eq!(
            render(&raw),
            "Thinking:\ninfection raises the set point\n\nFinal:\nPyrogens."
        );
    }

    #[test]
    fn test_final_only() {
        let raw = format!(
            "{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>final<|message|> Rest and fluids <|return|>"
        );
        let parsed = parse(&raw);
        assert_eq!(parsed.reasoning, None);
        assert_eq!(render(&raw), "Final:\nRest and fluids");
    }

    #[test]
    fn test_no_markers_returns_fallback() {
        assert_eq!(render("plain text from an untuned model"), NOT_FINETUNED_MESSAGE);
        assert_eq!(render(""), NOT_FINETUNED_MESSAGE);
    }

    #[test]
    fn test_reasoning_without_final_is_discarded() {
        let raw = format!(
            "{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>analysis<|message|>thinking<|end|>"
        );
        let parsed = parse(&raw);
        assert_eq!(parsed.reasoning.as_deref(), Some("thinking"));
        assert_eq!(render(&raw), NOT_FINETUNED_MESSAGE);
    }

    #[test]
    fn test_unterminated_final_is_absent() {
        let raw = format!(
            "{PROMPT_TAIL}<|end|><|start|>assistant<|channel|>final<|message|>cut off mid sentence"
        );
        assert!(FINAL_SECTION.is_opened(&raw));
        assert_eq!(FINAL_SECTION.extract(&raw), None);
        assert_eq!(render(&raw), NOT_FINETUNED_MESSAGE);
    }

    #[test]
    fn test_multiline_sections() {
        let raw = harmony("step one\nstep two", "line a\nline b");
        let parsed = parse(&raw);
        assert_eq!(parsed.reasoning.as_deref(), Some("step one\nstep two"));
        assert_eq!(parsed.final_answer.as_deref(), Some("line a\nline b"));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let raw = format!(
            "{}<|start|>assistant<|channel|>final<|message|>second<|return|>",
            harmony("first thoughts", "first")
        );
        let parsed = parse(&raw);
        assert_eq!(parsed.final_answer.as_deref(), Some("first"));
        assert_eq!(parsed.reasoning.as_deref(), Some("first thoughts"));
    }

    #[test]
    fn test_final_close_is_nearest_after_open() {
        let raw = "<|start|>assistant<|channel|>final<|message|>a<|return|>b<|return|>";
        assert_eq!(FINAL_SECTION.extract(raw), Some("a"));
    }

    #[test]
    fn test_empty_final_section_still_structured() {
        let raw = "<|start|>assistant<|channel|>final<|message|>   <|return|>";
        let parsed = parse(raw);
        assert!(parsed.is_structured());
        assert_eq!(render(raw), "Final:\n");
    }
}
