use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// AccuracyResult
// ---------------------------------------------------------------------------

/// Per-turn analysis of a learner message. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccuracyResult {
    pub overall: u8,
    pub grammar: u8,
    pub vocabulary: u8,
    pub spelling: u8,
    pub fluency: u8,
    pub feedback: Vec<String>,
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
}

impl AccuracyResult {
    /// The result for empty or whitespace-only input.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn sub_scores(&self) -> SubScores {
        SubScores {
            grammar: self.grammar,
            vocabulary: self.vocabulary,
            spelling: self.spelling,
            fluency: self.fluency,
        }
    }
}

// ---------------------------------------------------------------------------
// SubScores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub grammar: u8,
    pub vocabulary: u8,
    pub spelling: u8,
    pub fluency: u8,
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// A concrete issue spotted while scoring. Findings drive the `errors` and
/// `suggestions` lists of the final result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// Long sentence with fewer than three words.
    Fragment { sentence: String },
    /// Standalone lowercase `i`.
    LowercasePronoun,
    /// `dont`, `cant`, `wont` written without the apostrophe.
    MissingApostrophe { word: &'static str, correct: &'static str },
    /// Sentence opens with `I` followed by a verb other than `am`.
    FirstPersonAgreement { sentence: String },
    Misspelling { word: &'static str, correct: &'static str },
    ExcessiveCapitals { ratio_percent: u8 },
    SymbolNoise,
    Filler { phrase: &'static str, count: usize },
    RunOnSentences { count: usize },
    RepeatedWord { word: String, count: usize },
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fragment { sentence } => write!(f, "Sentence fragment: \"{sentence}\""),
            Self::LowercasePronoun => write!(f, "Lowercase \"i\" used as a pronoun"),
            Self::MissingApostrophe { word, .. } => {
                write!(f, "Missing apostrophe in \"{word}\"")
            }
            Self::FirstPersonAgreement { sentence } => {
                write!(f, "Check verb agreement after \"I\": \"{sentence}\"")
            }
            Self::Misspelling { word, .. } => write!(f, "Possible misspelling: \"{word}\""),
            Self::ExcessiveCapitals { ratio_percent } => {
                write!(f, "Too many capital letters ({ratio_percent}% of letters)")
            }
            Self::SymbolNoise => write!(f, "Message contains a lot of symbols"),
            Self::Filler { phrase, count } => {
                write!(f, "Filler \"{phrase}\" used {count} time(s)")
            }
            Self::RunOnSentences { count } => {
                write!(f, "{count} run-on sentence(s) with many commas")
            }
            Self::RepeatedWord { word, count } => {
                write!(f, "\"{word}\" repeated {count} times")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AnalysisRequest
// ---------------------------------------------------------------------------

/// JSON input of the analyze endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_response: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_is_all_zero() {
        let r = AccuracyResult::empty();
        assert_eq!(r.overall, 0);
        assert_eq!(r.sub_scores(), SubScores::default());
        assert!(r.feedback.is_empty() && r.errors.is_empty() && r.suggestions.is_empty());
    }

    #[test]
    fn test_request_uses_camel_case() {
        let req: AnalysisRequest =
            serde_json::from_str(r#"{"userMessage":"hello","aiResponse":"hi"}"#).unwrap();
        assert_eq!(req.user_message, "hello");
        assert_eq!(req.ai_response.as_deref(), Some("hi"));

        let req: AnalysisRequest = serde_json::from_str(r#"{"userMessage":"x"}"#).unwrap();
        assert!(req.ai_response.is_none());
    }

    #[test]
    fn test_finding_display() {
        let f = Finding::Misspelling {
            word: "teh",
            correct: "the",
        };
        assert_eq!(f.to_string(), "Possible misspelling: \"teh\"");
    }
}
