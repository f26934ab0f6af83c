//! Weighted overall score and the deterministic feedback pass.

use crate::accuracy::{AccuracyResult, Finding, SubScores};
use crate::analyzer::Analysis;

pub const GRAMMAR_WEIGHT: f64 = 0.30;
pub const VOCABULARY_WEIGHT: f64 = 0.30;
pub const SPELLING_WEIGHT: f64 = 0.20;
pub const FLUENCY_WEIGHT: f64 = 0.20;

/// Sub-scores below these thresholds get an advisory line.
pub const GRAMMAR_THRESHOLD: u8 = 70;
pub const VOCABULARY_THRESHOLD: u8 = 70;
pub const SPELLING_THRESHOLD: u8 = 80;
pub const FLUENCY_THRESHOLD: u8 = 70;

const PRAISE: &str = "Excellent work! Your English is clear and accurate.";
const ENCOURAGEMENT: &str = "Good job! A few small fixes will make your English even better.";
const KEEP_PRACTICING: &str = "Keep practicing! Every message you write helps you improve.";

/// Weighted combination of the four sub-scores, rounded into `0..=100`.
pub fn aggregate(grammar: u8, vocabulary: u8, spelling: u8, fluency: u8) -> u8 {
    let overall = GRAMMAR_WEIGHT * f64::from(grammar)
        + VOCABULARY_WEIGHT * f64::from(vocabulary)
        + SPELLING_WEIGHT * f64::from(spelling)
        + FLUENCY_WEIGHT * f64::from(fluency);
    overall.round().clamp(0.0, 100.0) as u8
}

pub fn aggregate_scores(scores: SubScores) -> u8 {
    aggregate(
        scores.grammar,
        scores.vocabulary,
        scores.spelling,
        scores.fluency,
    )
}

/// Closing remark for an overall score. Exactly one per result.
pub fn closing_remark(overall: u8) -> &'static str {
    if overall > 85 {
        PRAISE
    } else if overall > 70 {
        ENCOURAGEMENT
    } else {
        KEEP_PRACTICING
    }
}

/// Build the final result from a scored message: overall score, advisory
/// feedback, and the errors/suggestions derived from findings.
pub fn compose(analysis: &Analysis) -> AccuracyResult {
    let scores = analysis.scores;
    let overall = aggregate_scores(scores);

    let mut feedback = Vec::new();
    let mut suggestions = Vec::new();

    if scores.grammar < GRAMMAR_THRESHOLD {
        feedback.push("Focus on sentence structure and grammar rules.".to_string());
        suggestions.push(grammar_tip(&analysis.findings).to_string());
    }
    if scores.vocabulary < VOCABULARY_THRESHOLD {
        feedback.push("Try using a wider variety of words.".to_string());
    }
    if scores.spelling < SPELLING_THRESHOLD {
        feedback.push("Double-check your spelling and capitalization.".to_string());
    }
    if scores.fluency < FLUENCY_THRESHOLD {
        feedback.push(
            "Work on the flow of your writing: vary sentence length and avoid filler words."
                .to_string(),
        );
    }
    feedback.push(closing_remark(overall).to_string());

    let mut errors = Vec::new();
    for finding in &analysis.findings {
        push_unique(&mut errors, finding.to_string());
        if let Some(tip) = suggestion_for(finding) {
            push_unique(&mut suggestions, tip);
        }
    }

    AccuracyResult {
        overall,
        grammar: scores.grammar,
        vocabulary: scores.vocabulary,
        spelling: scores.spelling,
        fluency: scores.fluency,
        feedback,
        errors,
        suggestions,
    }
}

/// The most actionable grammar correction for the findings at hand.
fn grammar_tip(findings: &[Finding]) -> &'static str {
    if findings.iter().any(|f| matches!(f, Finding::LowercasePronoun)) {
        "Always write \"I\" as a capital letter when you talk about yourself."
    } else if findings
        .iter()
        .any(|f| matches!(f, Finding::MissingApostrophe { .. }))
    {
        "Contractions need an apostrophe: \"don't\", \"can't\", \"won't\"."
    } else if findings
        .iter()
        .any(|f| matches!(f, Finding::Fragment { .. }))
    {
        "Make sure every sentence has a subject and a verb."
    } else {
        "Check that each verb agrees with its subject, e.g. \"I have\", \"she has\"."
    }
}

fn suggestion_for(finding: &Finding) -> Option<String> {
    match finding {
        Finding::Misspelling { word, correct } | Finding::MissingApostrophe { word, correct } => {
            Some(format!("Write \"{correct}\" instead of \"{word}\"."))
        }
        Finding::Filler { phrase, .. } => {
            Some(format!("Try leaving out \"{phrase}\" in written messages."))
        }
        Finding::RunOnSentences { .. } => {
            Some("Split long comma-heavy sentences into shorter ones.".to_string())
        }
        Finding::RepeatedWord { word, .. } => {
            Some(format!("Look for synonyms instead of repeating \"{word}\"."))
        }
        Finding::ExcessiveCapitals { .. } => {
            Some("Use capital letters only at the start of sentences and for names.".to_string())
        }
        Finding::Fragment { .. }
        | Finding::LowercasePronoun
        | Finding::FirstPersonAgreement { .. }
        | Finding::SymbolNoise => None,
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}
