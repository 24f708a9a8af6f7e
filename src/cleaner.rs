//! Normalizes raw worker output into a canonical answer string.
//!
//! Cleaning never fails. Each step runs at most once, in a fixed order, on
//! the result of the previous step.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::prompts::PromptVersion;

static FINAL_ANSWER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)Final Answer:\s*(.*)").expect("Invalid final answer regex"));

/// Boilerplate lead-ins, checked in order. Only the first match is removed.
const ANSWER_PREFIXES: &[&str] = &[
    "Answer is:",
    "Answer:",
    "The answer is:",
    "The final answer is ",
    "Expert Answer:",
    "答案是：",
    "答案：",
    "答案是",
    "答案",
    "好的，答案是：",
    "好的，答案是",
    "了解，答案是：",
    "了解，答案是",
];

/// Result of cleaning one worker answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedAnswer {
    pub text: String,
    /// False only when a COT answer lacks the `Final Answer:` marker.
    pub correctly_formatted: bool,
}

/// Clean `raw` according to the prompt version it was produced under.
pub fn clean(raw: &str, version: PromptVersion) -> CleanedAnswer {
    let mut answer = raw.trim();
    let mut correctly_formatted = true;

    if version == PromptVersion::Cot {
        match FINAL_ANSWER.captures(answer).and_then(|c| c.get(1)) {
            Some(m) => answer = m.as_str().trim(),
            None => {
                correctly_formatted = false;
                tracing::debug!(
                    preview = %raw.chars().take(100).collect::<String>(),
                    "COT answer lacks 'Final Answer:' marker; cleaning full output"
                );
            }
        }
    }

    if let Some(rest) = ANSWER_PREFIXES
        .iter()
        .find_map(|prefix| strip_prefix_ignore_case(answer, prefix))
    {
        answer = rest.trim();
    }

    for bullet in ["- ", "* "] {
        if let Some(rest) = answer.strip_prefix(bullet) {
            answer = rest.trim();
        }
    }

    if answer.chars().count() > 1 {
        for quote in ['"', '\''] {
            if answer.starts_with(quote) && answer.ends_with(quote) {
                answer = &answer[1..answer.len() - 1];
                break;
            }
        }
    }

    if answer.chars().count() > 1 {
        if let Some(rest) = answer
            .strip_suffix('.')
            .or_else(|| answer.strip_suffix('。'))
        {
            answer = rest.trim();
        }
    }

    if let Some(rest) = answer.strip_prefix("> ").or_else(|| answer.strip_prefix('>')) {
        answer = rest.trim();
    }

    CleanedAnswer {
        text: answer.trim().to_string(),
        correctly_formatted,
    }
}

/// Case-insensitive `strip_prefix`, comparing the prefix's char count worth
/// of `text` so multi-byte prefixes line up on char boundaries.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix_chars = prefix.chars().count();
    let split = match text.char_indices().nth(prefix_chars) {
        Some((idx, _)) => idx,
        None if text.chars().count() == prefix_chars => text.len(),
        None => return None,
    };
    let (head, rest) = text.split_at(split);
    (head.to_lowercase() == prefix.to_lowercase()).then_some(rest)
}
