//! Intent classification
//!
//! Maps a free-text query to a coarse intent label via an ordered rule
//! table. Rules are checked first to last; the first match wins. Callers
//! with an `LlmBased` routing strategy may re-classify low-confidence
//! results through a fast model and feed the label back through
//! [`Intent::parse_label`].

use crate::registry::Capability;
use lazy_static::lazy_static;
use regex::RegexSet;
use serde::{Deserialize, Serialize};

/// Coarse classification of a user query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Short factual question
    SimpleQuestion,
    /// Deep analysis or argumentation
    ComplexReasoning,
    /// Mathematical computation or proof
    MathProblem,
    /// Programming, debugging or code explanation
    CodeTask,
    /// Question about an image
    VisionTask,
    /// Essay, story or other creative text
    CreativeWriting,
    /// Translation between languages
    Translation,
    /// Condensing a text
    Summarization,
    /// Multi-expert collaboration request
    MultiAgentCollab,
    /// Source-finding and literature work
    Research,
    /// Multi-step goal needing a plan
    ComplexGoal,
    /// No clear pattern matched
    Unknown,
}

impl Intent {
    /// Returns the snake_case label used on the wire and in prompts
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleQuestion => "simple_question",
            Self::ComplexReasoning => "complex_reasoning",
            Self::MathProblem => "math_problem",
            Self::CodeTask => "code_task",
            Self::VisionTask => "vision_task",
            Self::CreativeWriting => "creative_writing",
            Self::Translation => "translation",
            Self::Summarization => "summarization",
            Self::MultiAgentCollab => "multi_agent_collab",
            Self::Research => "research",
            Self::ComplexGoal => "complex_goal",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a label produced by an LLM classifier. Unknown labels map to
    /// `None` so the caller can fall back to the rule result.
    #[must_use]
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "simple_question" => Some(Self::SimpleQuestion),
            "complex_reasoning" => Some(Self::ComplexReasoning),
            "math_problem" => Some(Self::MathProblem),
            "code_task" => Some(Self::CodeTask),
            "vision_task" => Some(Self::VisionTask),
            "creative_writing" => Some(Self::CreativeWriting),
            "translation" => Some(Self::Translation),
            "summarization" => Some(Self::Summarization),
            "multi_agent_collab" => Some(Self::MultiAgentCollab),
            "research" => Some(Self::Research),
            "complex_goal" => Some(Self::ComplexGoal),
            _ => None,
        }
    }

    /// Map an intent to the capability a model must advertise to serve it
    #[must_use]
    pub fn required_capability(&self) -> Capability {
        match self {
            Self::VisionTask => Capability::Vision,
            Self::CodeTask => Capability::Code,
            Self::MathProblem
            | Self::ComplexReasoning
            | Self::CreativeWriting
            | Self::Translation
            | Self::MultiAgentCollab
            | Self::Research
            | Self::ComplexGoal => Capability::Reasoning,
            Self::SimpleQuestion | Self::Summarization | Self::Unknown => Capability::Fast,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    /// The detected intent
    pub intent: Intent,
    /// Rule confidence, 0.0 - 1.0
    pub confidence: f64,
    /// Why the rule fired
    pub reasoning: &'static str,
}

struct Rule {
    intent: Intent,
    confidence: f64,
    reasoning: &'static str,
    patterns: RegexSet,
}

fn rule(intent: Intent, confidence: f64, reasoning: &'static str, patterns: &[&str]) -> Rule {
    Rule {
        intent,
        confidence,
        reasoning,
        // Patterns are static literals; a bad one is a programmer error.
        patterns: RegexSet::new(patterns).expect("invalid intent rule pattern"),
    }
}

lazy_static! {
    static ref RULES: Vec<Rule> = vec![
        rule(
            Intent::MathProblem,
            0.9,
            "detected math keywords or expressions",
            &[
                r"(?i)calculate|solve|compute",
                r"(?i)integral|integrate|derivative|differentiate",
                r"(?i)equation|polynomial",
                r"\d+\s*[+\-*/^]\s*\d+",
                r"(?i)\\frac|\\int|\\sum|\\lim",
                r"(?i)x\^2|sin\(|cos\(|tan\(|log\(",
            ],
        ),
        rule(
            Intent::CodeTask,
            0.85,
            "detected code keywords or syntax",
            &[
                r"(?i)write.*code|refactor|debug",
                r"(?i)\bfunction\b|\bdef \b|\bclass \b",
                r"(?i)python|javascript|typescript|rust|java\b",
                r"```|<code>|<script>",
                r"(?i)\bimport \b|\bconst \b|\blet \b",
            ],
        ),
        rule(
            Intent::VisionTask,
            0.8,
            "detected vision-related keywords",
            &[
                r"(?i)this image|this picture|this photo",
                r"(?i)what do you see",
                r"(?i)analyze.*image|describe.*image",
                r"(?i)screenshot|diagram",
            ],
        ),
        rule(
            Intent::Translation,
            0.9,
            "detected translation request",
            &[
                r"(?i)\btranslate\b",
                r"(?i)\bto english\b|\bto dutch\b|\bto french\b|\bto german\b|\bto spanish\b",
            ],
        ),
        rule(
            Intent::Summarization,
            0.85,
            "detected summarization request",
            &[
                r"(?i)summarize|summary",
                r"(?i)briefly describe",
                r"(?i)key points|main points",
                r"(?i)tl;?dr",
            ],
        ),
        rule(
            Intent::CreativeWriting,
            0.8,
            "detected creative writing request",
            &[
                r"(?i)write.*story|write.*essay",
                r"(?i)\bpoem\b|\bpoetry\b",
                r"(?i)\bimagine\b|\binvent\b",
            ],
        ),
        rule(
            Intent::MultiAgentCollab,
            0.95,
            "detected multi-agent collaboration request",
            &[
                r"(?i)expert.*(panel|debate)",
                r"(?i)multiple.*experts",
                r"(?i)combine.*perspectives",
            ],
        ),
        rule(
            Intent::Research,
            0.9,
            "detected research or academic source keywords",
            &[
                r"(?i)\bresearch\b|literature review",
                r"(?i)find.*(sources|papers)",
                r"(?i)scientific evidence",
                r"(?i)arxiv|pubmed|jstor|scholar",
            ],
        ),
        rule(
            Intent::ComplexReasoning,
            0.7,
            "detected reasoning or analysis keywords",
            &[
                r"(?i)\bwhy\b|explain.*reason",
                r"(?i)\bcompare\b|\bcontrast\b",
                r"(?i)\banalyze\b|\bevaluate\b",
                r"(?i)what if|hypothetical",
                r"(?i)\bprove\b|\bargument\b",
            ],
        ),
        rule(
            Intent::ComplexGoal,
            0.75,
            "query indicates a multi-step goal or project",
            &[
                r"(?i)make a plan|create a plan|roadmap",
                r"(?i)how (do|can) i achieve",
                r"(?i)step by step",
            ],
        ),
    ];
}

/// Threshold above which a rule result is trusted without LLM fallback
pub const RULE_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Prompt used for LLM-based re-classification of uncertain queries
pub const CLASSIFICATION_PROMPT: &str = "You are an intent classifier. Classify the user query \
into exactly one of: simple_question, complex_reasoning, math_problem, code_task, vision_task, \
creative_writing, translation, summarization, multi_agent_collab, research, complex_goal, \
unknown.\n\nUser query: \"{query}\"\n\nAnswer with ONLY the category name in lowercase.";

/// Rule-based intent classifier
#[derive(Debug, Default)]
pub struct IntentClassifier;

impl IntentClassifier {
    /// Create a classifier
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Classify a query through the ordered rule table
    #[must_use]
    pub fn classify(&self, query: &str) -> Classification {
        let normalized = query.trim().to_lowercase();

        for r in RULES.iter() {
            if r.patterns.is_match(&normalized) {
                return Classification {
                    intent: r.intent,
                    confidence: r.confidence,
                    reasoning: r.reasoning,
                };
            }
        }

        // Long prompts with no other signal are treated as project-sized goals.
        if normalized.len() > 200 {
            return Classification {
                intent: Intent::ComplexGoal,
                confidence: 0.75,
                reasoning: "long query without a specific pattern",
            };
        }

        if normalized.len() < 50 && starts_with_question_word(&normalized) {
            return Classification {
                intent: Intent::SimpleQuestion,
                confidence: 0.6,
                reasoning: "short query starting with a question word",
            };
        }

        Classification {
            intent: Intent::Unknown,
            confidence: 0.3,
            reasoning: "no clear pattern matched",
        }
    }
}

fn starts_with_question_word(query: &str) -> bool {
    ["what", "who", "where", "when", "how", "which"]
        .iter()
        .any(|w| query.starts_with(w))
}
