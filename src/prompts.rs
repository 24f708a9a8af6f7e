//! Prompt templates for the worker and both judges.
//!
//! Domain logic for selecting and rendering prompts. Provider-agnostic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::gateway::Message;

// =============================================================================
// Prompt version
// =============================================================================

/// How the worker is asked to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PromptVersion {
    /// Bare answer, no explanation.
    Direct,
    /// Reasoning first, then a `Final Answer:` line.
    Cot,
    /// Domain-expert persona, bare answer.
    Expert,
}

impl PromptVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Cot => "COT",
            Self::Expert => "EXPERT",
        }
    }

    /// Output-token ceiling for the worker call.
    pub fn worker_max_tokens(&self) -> u32 {
        match self {
            Self::Cot => 8000,
            Self::Direct | Self::Expert => 3000,
        }
    }

    pub fn worker_template(&self) -> PromptTemplate {
        match self {
            Self::Direct => WORKER_DIRECT,
            Self::Cot => WORKER_COT,
            Self::Expert => WORKER_EXPERT,
        }
    }
}

impl fmt::Display for PromptVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown prompt version '{0}' (expected DIRECT, COT or EXPERT)")]
pub struct UnknownPromptVersion(pub String);

impl FromStr for PromptVersion {
    type Err = UnknownPromptVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DIRECT" => Ok(Self::Direct),
            "COT" => Ok(Self::Cot),
            "EXPERT" => Ok(Self::Expert),
            _ => Err(UnknownPromptVersion(s.to_string())),
        }
    }
}

// =============================================================================
// Dataset tier
// =============================================================================

/// Strictness tier of the accuracy judge, derived from the dataset name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetTier {
    /// Plausible inference is enough.
    L1,
    /// Core information must be directly present.
    L2,
    /// High-fidelity factual match.
    L3,
    Default,
}

impl DatasetTier {
    /// First of `l1`/`l2`/`l3` contained in the lower-cased name wins.
    pub fn from_dataset_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("l1") {
            Self::L1
        } else if lower.contains("l2") {
            Self::L2
        } else if lower.contains("l3") {
            Self::L3
        } else {
            Self::Default
        }
    }

    pub fn accuracy_template(&self) -> PromptTemplate {
        match self {
            Self::L1 => ACCURACY_JUDGE_L1,
            Self::L2 => ACCURACY_JUDGE_L2,
            Self::L3 => ACCURACY_JUDGE_L3,
            Self::Default => ACCURACY_JUDGE_DEFAULT,
        }
    }
}

// =============================================================================
// Prompt templates
// =============================================================================

/// Rendered prompt ready for the model.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// A prompt template with `{name}` placeholders in the user part.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Fill placeholders in a single pass, so substituted values are never
    /// themselves scanned for placeholders. Unknown placeholders are kept.
    pub fn render(&self, vars: &[(&str, &str)]) -> PromptInstance {
        PromptInstance {
            system: self.system.to_string(),
            user: fill_placeholders(self.user, vars),
        }
    }
}

fn fill_placeholders(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (close, *v))
        });
        match replaced {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// Worker prompts
// =============================================================================

const WORKER_SYSTEM: &str = "You are a highly intelligent AI assistant. Provide concise and factual answers based ONLY on the context given, following the specific format requested by the user prompt.";

pub const WORKER_DIRECT: PromptTemplate = PromptTemplate {
    slug: "worker_direct",
    system: WORKER_SYSTEM,
    user: "Based on the 'Background Information (Instruction)' and 'Specific Question (Question)' below, provide the most direct and concise answer. \
The answer must be strictly derived from the provided information ONLY. \
It should be a single word, a short phrase, a specific name, a numerical value, a code snippet, or a status description that directly addresses the core of the question. \
Do NOT include any explanations, justifications, prefixes (e.g., 'The answer is:'), suffixes, conversational filler, or any information not explicitly stated in the 'Background Information'. \
Output only the precise answer itself.

Background Information (Instruction):
{instruction}

Specific Question (Question):
{question}

Answer:",
};

pub const WORKER_COT: PromptTemplate = PromptTemplate {
    slug: "worker_cot",
    system: WORKER_SYSTEM,
    user: "Your task is to answer the 'Specific Question (Question)' based on the 'Background Information (Instruction)'.
Follow these steps:
1. First, carefully analyze the Instruction and the Question.
2. Provide a step-by-step reasoning process that shows how you arrive at the answer. Start this section with 'Reasoning:'.
3. After your reasoning, on a new line, provide the final, direct, and concise answer. This final answer MUST be prefixed with 'Final Answer: ' (note the space after the colon).
The final answer part should be a single word, a short phrase, a specific name, a numerical value, a code snippet, or a status description, derived ONLY from the 'Background Information'.
Do not add any other explanations or text after the 'Final Answer: ' prefix and the answer itself.

Background Information (Instruction):
{instruction}

Specific Question (Question):
{question}
",
};

pub const WORKER_EXPERT: PromptTemplate = PromptTemplate {
    slug: "worker_expert",
    system: WORKER_SYSTEM,
    user: "Leveraging your expertise in lunar exploration engineering, analyze the 'Background Information (Instruction)' and 'Specific Question (Question)' below. \
Provide the most direct, concise, and factually accurate answer based SOLELY on the information presented. \
Your response should be a single word, a short phrase, a specific name, a numerical value, a code snippet, or a status description that precisely answers the question. \
Do NOT include any explanations, justifications, prefixes (e.g., 'The answer is:'), suffixes, conversational filler, or any information not explicitly stated in the 'Background Information'. \
Output only the precise answer itself.

Background Information (Instruction):
{instruction}

Specific Question (Question):
{question}

Answer:",
};

// =============================================================================
// Judge prompts
// =============================================================================

const ACCURACY_JUDGE_SYSTEM: &str = "You are an expert AI evaluator for accuracy. Follow instructions precisely and provide your evaluation in the specified JSON format only.";

const INTEGRITY_JUDGE_SYSTEM: &str = "You are an expert AI evaluator for process integrity. Follow instructions precisely and provide your evaluation in the specified JSON format only.";

// Shared tail of every accuracy judge prompt: the four inputs and the
// required verdict shape.
macro_rules! accuracy_judge_user {
    ($head:literal) => {
        concat!(
            $head,
            "

Here is the information you need to evaluate:
1. Instruction (Original Context):
```
{instruction}
```

2. Question (Original Question):
```
{question}
```

3. Reference Answer (The ground truth):
```
{reference_answer}
```

4. Candidate Answer:
```
{candidate_answer}
```

**Output Format:**
Respond ONLY with a JSON object with two keys, in this order:
1. `\"is_judged_correct\"`: A boolean value.
2. `\"reasoning\"`: A brief explanation for your decision.

Now, provide your evaluation:"
        )
    };
}

pub const ACCURACY_JUDGE_L1: PromptTemplate = PromptTemplate {
    slug: "accuracy_judge_l1",
    system: ACCURACY_JUDGE_SYSTEM,
    user: accuracy_judge_user!(
        "Your task is to determine if the core information from the 'Reference Answer' can be reasonably inferred from the 'Candidate Answer'.

**Evaluation Focus: Plausible Inference**
Mark it correct (`is_judged_correct`: true) if:
1. The Candidate Answer, through a reasonable line of thought, implies the Reference Answer.
2. The core meaning is approximately correct, even if details are missing or slightly off.
Do not be strict about phrasing.

Mark it incorrect (`is_judged_correct`: false) if the answer is fundamentally wrong, irrelevant, or requires unreasonable leaps of logic to connect to the Reference Answer."
    ),
};

pub const ACCURACY_JUDGE_L2: PromptTemplate = PromptTemplate {
    slug: "accuracy_judge_l2",
    system: ACCURACY_JUDGE_SYSTEM,
    user: accuracy_judge_user!(
        "Your task is to determine if the core information from the 'Reference Answer' is sensibly and directly present within the 'Candidate Answer'.

**Evaluation Focus: Direct Presence of Core Information**
Mark it correct (`is_judged_correct`: true) if:
1. The Candidate Answer directly addresses the core question and its essential information aligns with the Reference Answer.
2. It is not just vaguely related but contains the key facts, names, or values from the Reference Answer.

Mark it incorrect (`is_judged_correct`: false) if the core claim is wrong, the answer is irrelevant, or it fails to meaningfully contain the information from the Reference Answer."
    ),
};

pub const ACCURACY_JUDGE_L3: PromptTemplate = PromptTemplate {
    slug: "accuracy_judge_l3",
    system: ACCURACY_JUDGE_SYSTEM,
    user: accuracy_judge_user!(
        "You are a strict evaluator. Determine if the information in the 'Reference Answer' is substantially and factually present in the 'Candidate Answer', allowing only minor formatting differences.

**Evaluation Focus: High-Fidelity Information Match**
Mark it correct (`is_judged_correct`: true) ONLY if:
1. The primary facts, figures, and entities from the Reference Answer are explicitly stated in the Candidate Answer.
2. There are no significant factual discrepancies.

Mark it incorrect (`is_judged_correct`: false) if key facts are wrong, omitted, or misrepresented."
    ),
};

pub const ACCURACY_JUDGE_DEFAULT: PromptTemplate = PromptTemplate {
    slug: "accuracy_judge_default",
    system: ACCURACY_JUDGE_SYSTEM,
    user: accuracy_judge_user!(
        "Your task is to decide whether the 'Candidate Answer' is semantically equivalent to the 'Reference Answer' for the given Question, using the Instruction as context.

**Evaluation Focus: Semantic Equivalence**
Mark it correct (`is_judged_correct`: true) if the Candidate Answer states the same fact, value, or conclusion as the Reference Answer, even if worded differently.

Mark it incorrect (`is_judged_correct`: false) if it contradicts the Reference Answer, omits its essential content, or answers a different question."
    ),
};

pub const INTEGRITY_JUDGE: PromptTemplate = PromptTemplate {
    slug: "integrity_judge",
    system: INTEGRITY_JUDGE_SYSTEM,
    user: "You are a meticulous AI Process Analyzer. Your task is to assess the **completeness and logical integrity** of an AI assistant's thought process (if visible) and its final output, based on the provided 'Instruction' and 'Question'.

**Evaluation Focus: Process Integrity & Completeness of Thought**
1.  **Condition Coverage:** Did the AI's output address all critical conditions and constraints?
2.  **Question Comprehension:** Does the output demonstrate a full understanding of all parts of the Question?
3.  **Information Utilization:** Was all relevant information from the 'Instruction' appropriately used?
4.  **Logical Flow:** If reasoning steps are visible, are they logical, coherent, and without significant gaps?

**Do NOT focus on whether the final answer is correct. Focus on the *process and completeness of consideration*.**

Here is the information you need to analyze:
1. Instruction (Original Context):
```
{instruction}
```

2. Question (Original Question):
```
{question}
```

3. Candidate Output (Raw - this may include reasoning steps):
```
{candidate_output_raw}
```

4. Candidate Answer (Cleaned - the final answer extracted from the raw output):
```
{candidate_answer_cleaned}
```

**Output Format:**
Respond ONLY with a JSON object containing two keys, in this order:
1. `\"integrity_score\"`: An integer score from 0 to 100, reflecting the completeness of the thought process.
2. `\"integrity_reasoning\"`: A brief explanation for the assigned score.

Now, provide your analysis:",
};

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_version_parses_case_insensitively() {
        assert_eq!("cot".parse::<PromptVersion>(), Ok(PromptVersion::Cot));
        assert_eq!(" EXPERT ".parse::<PromptVersion>(), Ok(PromptVersion::Expert));
        assert!("FEWSHOT".parse::<PromptVersion>().is_err());
    }

    #[test]
    fn prompt_version_serializes_uppercase() {
        let json = serde_json::to_string(&PromptVersion::Cot).unwrap();
        assert_eq!(json, "\"COT\"");
        assert_eq!(PromptVersion::Direct.to_string(), "DIRECT");
    }

    #[test]
    fn worker_token_ceiling_depends_on_version() {
        assert_eq!(PromptVersion::Cot.worker_max_tokens(), 8000);
        assert_eq!(PromptVersion::Direct.worker_max_tokens(), 3000);
        assert_eq!(PromptVersion::Expert.worker_max_tokens(), 3000);
    }

    #[test]
    fn tier_uses_first_matching_substring() {
        assert_eq!(DatasetTier::from_dataset_name("lunar_L1_core"), DatasetTier::L1);
        assert_eq!(DatasetTier::from_dataset_name("ops-l2"), DatasetTier::L2);
        assert_eq!(DatasetTier::from_dataset_name("l3"), DatasetTier::L3);
        // l1 is checked before l3
        assert_eq!(DatasetTier::from_dataset_name("l3_l1"), DatasetTier::L1);
        assert_eq!(DatasetTier::from_dataset_name("general"), DatasetTier::Default);
    }

    #[test]
    fn tier_selects_template() {
        assert_eq!(DatasetTier::L2.accuracy_template().slug, "accuracy_judge_l2");
        assert_eq!(
            DatasetTier::Default.accuracy_template().slug,
            "accuracy_judge_default"
        );
    }

    #[test]
    fn render_fills_placeholders() {
        let p = WORKER_DIRECT.render(&[("instruction", "Ctx"), ("question", "Q?")]);
        assert!(p.user.contains("Ctx"));
        assert!(p.user.contains("Q?"));
        assert!(!p.user.contains("{instruction}"));
        assert_eq!(p.to_messages().len(), 2);
    }

    #[test]
    fn render_does_not_expand_placeholders_inside_values() {
        let p = WORKER_COT.render(&[("instruction", "literal {question}"), ("question", "real")]);
        assert!(p.user.contains("literal {question}"));
    }

    #[test]
    fn render_keeps_unknown_braces() {
        assert_eq!(fill_placeholders("a {x} {y", &[("x", "1")]), "a 1 {y");
        assert_eq!(fill_placeholders("{\"k\": 1}", &[]), "{\"k\": 1}");
    }

    #[test]
    fn judge_templates_carry_all_inputs() {
        for tier in [
            DatasetTier::L1,
            DatasetTier::L2,
            DatasetTier::L3,
            DatasetTier::Default,
        ] {
            let t = tier.accuracy_template();
            for key in [
                "{instruction}",
                "{question}",
                "{reference_answer}",
                "{candidate_answer}",
            ] {
                assert!(t.user.contains(key), "{} lacks {}", t.slug, key);
            }
        }
        assert!(INTEGRITY_JUDGE.user.contains("{candidate_output_raw}"));
        assert!(INTEGRITY_JUDGE.user.contains("{candidate_answer_cleaned}"));
    }
}
