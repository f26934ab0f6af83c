//! Lexical and structural scoring of a learner message.
//!
//! Four independent heuristics, each starting from a perfect score and
//! subtracting penalties:
//! - grammar: fragments, lowercase `i`, contractions without apostrophes,
//!   first-person agreement
//! - vocabulary: lexical diversity bonus, over-repeated words
//! - spelling: known misspellings, shouting, symbol noise
//! - fluency: sentence length balance, filler phrases, run-on sentences
//!
//! Penalties accumulate as `f64`; only the final sub-score is rounded and
//! clamped into `0..=100`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::accuracy::{AccuracyResult, AnalysisRequest, Finding, SubScores};
use crate::aggregator;

/// Raw scoring output before the feedback pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub scores: SubScores,
    pub findings: Vec<Finding>,
}

// ---------------------------------------------------------------------------
// Word tables
// ---------------------------------------------------------------------------

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "of", "to", "in", "on", "at", "by", "for",
    "with", "from", "i", "me", "my", "you", "your", "he", "him", "his", "she", "her", "it",
    "its", "we", "our", "they", "them", "their", "is", "am", "are", "was", "were", "be",
    "been", "have", "has", "had", "do", "does", "did", "will", "would", "can", "could",
    "what", "when", "where", "who", "why", "how", "this", "that", "not",
];

struct Misspelling {
    wrong: &'static str,
    right: &'static str,
    /// Contraction forms must match a whole word; the rest match anywhere.
    whole_word: bool,
}

const MISSPELLINGS: &[Misspelling] = &[
    Misspelling { wrong: "teh", right: "the", whole_word: false },
    Misspelling { wrong: "recieve", right: "receive", whole_word: false },
    Misspelling { wrong: "seperate", right: "separate", whole_word: false },
    Misspelling { wrong: "occured", right: "occurred", whole_word: false },
    Misspelling { wrong: "definately", right: "definitely", whole_word: false },
    Misspelling { wrong: "neccessary", right: "necessary", whole_word: false },
    Misspelling { wrong: "begining", right: "beginning", whole_word: false },
    Misspelling { wrong: "acheive", right: "achieve", whole_word: false },
    Misspelling { wrong: "buisness", right: "business", whole_word: false },
    Misspelling { wrong: "thier", right: "their", whole_word: false },
    Misspelling { wrong: "dont", right: "don't", whole_word: true },
    Misspelling { wrong: "cant", right: "can't", whole_word: true },
    Misspelling { wrong: "wont", right: "won't", whole_word: true },
    Misspelling { wrong: "didnt", right: "didn't", whole_word: true },
    Misspelling { wrong: "im", right: "I'm", whole_word: true },
];

const CONTRACTIONS: &[(&str, &str)] = &[("dont", "don't"), ("cant", "can't"), ("wont", "won't")];

const FILLERS: &[&str] = &[
    "um", "uh", "like", "you know", "so", "actually", "kind of", "sort of",
];

static FILLER_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FILLERS
        .iter()
        .filter_map(|phrase| {
            let body = phrase.split_whitespace().collect::<Vec<_>>().join(r"\s+");
            Regex::new(&format!(r"(?i)\b{body}\b"))
                .ok()
                .map(|re| (*phrase, re))
        })
        .collect()
});

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Score a message and attach feedback. Empty or whitespace-only input
/// yields the all-zero result.
pub fn analyze(message: &str) -> AccuracyResult {
    let text = message.trim();
    if text.is_empty() {
        return AccuracyResult::empty();
    }
    let analysis = score_message(text);
    let result = aggregator::compose(&analysis);
    debug!(
        overall = result.overall,
        grammar = result.grammar,
        vocabulary = result.vocabulary,
        spelling = result.spelling,
        fluency = result.fluency,
        "analyzed message"
    );
    result
}

/// Analyze the user message of a request. The preceding AI turn is context
/// only and does not affect the scores.
pub fn analyze_request(req: &AnalysisRequest) -> AccuracyResult {
    if let Some(ai) = &req.ai_response {
        debug!(ai_response_len = ai.len(), "analysis request carries AI context");
    }
    analyze(&req.user_message)
}

/// Compute the four sub-scores and the findings behind them, without the
/// feedback pass. Returns zeros for blank input.
pub fn score_message(message: &str) -> Analysis {
    let text = message.trim();
    let mut findings = Vec::new();
    if text.is_empty() {
        return Analysis {
            scores: SubScores::default(),
            findings,
        };
    }

    let sentences = split_sentences(text);
    let words: Vec<&str> = text.split_whitespace().collect();

    let grammar = score_grammar(&sentences, &mut findings);
    let vocabulary = score_vocabulary(&words, &mut findings);
    let spelling = score_spelling(text, &words, &mut findings);
    let fluency = score_fluency(text, &sentences, words.len(), &mut findings);

    Analysis {
        scores: SubScores {
            grammar: to_score(grammar),
            vocabulary: to_score(vocabulary),
            spelling: to_score(spelling),
            fluency: to_score(fluency),
        },
        findings,
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

fn score_grammar(sentences: &[&str], findings: &mut Vec<Finding>) -> f64 {
    if sentences.is_empty() {
        return 0.0;
    }
    let mut score = 100.0;

    for sentence in sentences {
        let words: Vec<&str> = sentence.split_whitespace().collect();

        if sentence.chars().count() >= 10 && words.len() < 3 {
            score -= 15.0;
            findings.push(Finding::Fragment {
                sentence: (*sentence).to_string(),
            });
        }

        // Sentence-initial `i` is left to the agreement check below.
        if words.iter().skip(1).any(|w| strip_punct(w) == "i") {
            score -= 10.0;
            findings.push(Finding::LowercasePronoun);
        }

        for &(wrong, right) in CONTRACTIONS {
            if words.iter().any(|w| strip_punct(w).eq_ignore_ascii_case(wrong)) {
                score -= 5.0;
                findings.push(Finding::MissingApostrophe {
                    word: wrong,
                    correct: right,
                });
            }
        }

        if let [first, second, ..] = words.as_slice() {
            if strip_punct(first).eq_ignore_ascii_case("i")
                && !second.to_lowercase().starts_with("am")
            {
                score -= 10.0;
                findings.push(Finding::FirstPersonAgreement {
                    sentence: (*sentence).to_string(),
                });
            }
        }
    }

    score
}

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

fn score_vocabulary(words: &[&str], findings: &mut Vec<Finding>) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let normalized: Vec<String> = words.iter().map(|w| normalize(w)).collect();

    let unique: HashSet<&str> = normalized
        .iter()
        .map(String::as_str)
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .collect();
    let mut score = 100.0 + (unique.len() as f64 / words.len() as f64) * 50.0;

    // Count in first-appearance order so findings are stable.
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for w in normalized.iter().filter(|w| w.len() > 2) {
        let entry = counts.entry(w.as_str()).or_insert(0);
        if *entry == 0 {
            order.push(w.as_str());
        }
        *entry += 1;
    }
    for word in order {
        let count = counts[word];
        if count > 3 {
            score -= 10.0;
            findings.push(Finding::RepeatedWord {
                word: word.to_string(),
                count,
            });
        }
    }

    score
}

// ---------------------------------------------------------------------------
// Spelling
// ---------------------------------------------------------------------------

fn score_spelling(text: &str, words: &[&str], findings: &mut Vec<Finding>) -> f64 {
    let mut score = 100.0;
    let lower = text.to_lowercase();
    let bare_words: Vec<String> = words.iter().map(|w| strip_punct(w).to_lowercase()).collect();

    for entry in MISSPELLINGS {
        let hit = if entry.whole_word {
            bare_words.iter().any(|w| w == entry.wrong)
        } else {
            lower.contains(entry.wrong)
        };
        if hit {
            score -= 20.0;
            findings.push(Finding::Misspelling {
                word: entry.wrong,
                correct: entry.right,
            });
        }
    }

    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    let capitals = text.chars().filter(|c| c.is_uppercase()).count();
    let capital_ratio = if letters == 0 {
        0.0
    } else {
        capitals as f64 / letters as f64
    };
    if capital_ratio > 0.3 {
        score -= (capital_ratio - 0.3) * 100.0;
        findings.push(Finding::ExcessiveCapitals {
            ratio_percent: to_score(capital_ratio * 100.0),
        });
    }

    let length = text.chars().count();
    let symbols = text
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if length > 0 && symbols as f64 / length as f64 > 0.1 {
        score -= 15.0;
        findings.push(Finding::SymbolNoise);
    }

    score.max(0.0)
}

// ---------------------------------------------------------------------------
// Fluency
// ---------------------------------------------------------------------------

fn score_fluency(
    text: &str,
    sentences: &[&str],
    total_words: usize,
    findings: &mut Vec<Finding>,
) -> f64 {
    if sentences.is_empty() {
        return 0.0;
    }
    let mut score = 100.0;
    let n = sentences.len() as f64;
    let lengths: Vec<usize> = sentences
        .iter()
        .map(|s| s.split_whitespace().count())
        .collect();

    let avg_len = total_words as f64 / n;
    if avg_len < 5.0 {
        score -= 20.0;
    } else if avg_len > 30.0 {
        score -= 15.0;
    }

    let short = lengths.iter().filter(|&&l| l < 5).count();
    if short as f64 > n / 2.0 {
        score -= 15.0;
    }
    let long = lengths.iter().filter(|&&l| l > 20).count();
    if long as f64 / n > 0.3 {
        score -= 10.0;
    }

    for (phrase, re) in FILLER_PATTERNS.iter() {
        let count = re.find_iter(text).count();
        if count > 0 {
            score -= 5.0 * count as f64;
            findings.push(Finding::Filler {
                phrase: *phrase,
                count,
            });
        }
    }

    let run_ons = sentences
        .iter()
        .filter(|s| s.matches(',').count() > 3)
        .count();
    if run_ons as f64 / n > 0.3 {
        score -= 10.0 * run_ons as f64;
        findings.push(Finding::RunOnSentences { count: run_ons });
    }

    score
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Split on sentence terminators, dropping empty fragments.
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lowercase and keep letters only.
fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Trim surrounding punctuation, keeping inner apostrophes.
fn strip_punct(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
}

fn to_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_finding(a: &Analysis, pred: impl Fn(&Finding) -> bool) -> bool {
        a.findings.iter().any(pred)
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        assert_eq!(analyze(""), AccuracyResult::empty());
        assert_eq!(analyze("   "), AccuracyResult::empty());
        assert_eq!(analyze(""), analyze(" \t\n "));
    }

    #[test]
    fn test_deterministic() {
        let msg = "I has went to teh store, um, and i dont know why!!";
        assert_eq!(analyze(msg), analyze(msg));
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("Hello there. How are you?! Fine"),
            vec!["Hello there", "How are you", "Fine"]
        );
        assert!(split_sentences("...!?").is_empty());
    }

    #[test]
    fn test_good_sentence_grammar_at_least_90() {
        let a = score_message("I went to the store yesterday because I needed milk.");
        assert!(a.scores.grammar >= 90, "grammar = {}", a.scores.grammar);
    }

    #[test]
    fn test_bad_sentence_grammar_reduced() {
        let bad = score_message("I has went to the store yesterday and i dont know why.");
        let good = score_message("I went to the store yesterday because I needed milk.");
        assert!(bad.scores.grammar < good.scores.grammar);
        // -10 lowercase i, -5 dont, -10 "I has"
        assert_eq!(bad.scores.grammar, 75);
        assert!(has_finding(&bad, |f| matches!(f, Finding::LowercasePronoun)));
        assert!(has_finding(&bad, |f| matches!(
            f,
            Finding::MissingApostrophe { word: "dont", .. }
        )));
    }

    #[test]
    fn test_grammar_i_am_not_penalized() {
        let a = score_message("I am happy to learn English today.");
        assert_eq!(a.scores.grammar, 100);
    }

    #[test]
    fn test_grammar_fragment() {
        let a = score_message("Absolutely wonderful.");
        assert_eq!(a.scores.grammar, 85);
        assert!(has_finding(&a, |f| matches!(f, Finding::Fragment { .. })));
    }

    #[test]
    fn test_grammar_zero_without_sentences() {
        let a = score_message("?!.");
        assert_eq!(a.scores.grammar, 0);
        assert_eq!(a.scores.fluency, 0);
    }

    #[test]
    fn test_vocabulary_repetition_penalty() {
        // no diversity bonus for stop words, one word repeated 4 times -> -10
        let a = score_message("the the the the");
        assert_eq!(a.scores.vocabulary, 90);
        assert!(has_finding(&a, |f| matches!(
            f,
            Finding::RepeatedWord { count: 4, .. }
        )));
    }

    #[test]
    fn test_vocabulary_three_repeats_allowed() {
        let a = score_message("the the the");
        assert_eq!(a.scores.vocabulary, 100);
        assert!(a.findings.iter().all(|f| !matches!(f, Finding::RepeatedWord { .. })));
    }

    #[test]
    fn test_spelling_misspellings_compound() {
        let a = score_message("I recieve thier letters every week from my friend");
        assert_eq!(a.scores.spelling, 60);
        let b = score_message("I receive their letters every week from my friend");
        assert_eq!(b.scores.spelling, 100);
    }

    #[test]
    fn test_spelling_contraction_whole_word_only() {
        let a = score_message("The cantaloupe is significant");
        assert!(!has_finding(&a, |f| matches!(f, Finding::Misspelling { .. })));
        let b = score_message("You cant do that");
        assert!(has_finding(&b, |f| matches!(
            f,
            Finding::Misspelling { word: "cant", .. }
        )));
    }

    #[test]
    fn test_spelling_capital_penalty() {
        // all caps: ratio 1.0 -> -70
        let a = score_message("HELLO MY FRIEND HOW ARE YOU TODAY");
        assert_eq!(a.scores.spelling, 30);
    }

    #[test]
    fn test_spelling_symbol_noise() {
        let a = score_message("hello #$%^&* world");
        assert!(has_finding(&a, |f| matches!(f, Finding::SymbolNoise)));
        assert_eq!(a.scores.spelling, 85);
    }

    #[test]
    fn test_fluency_fillers_counted() {
        let a = score_message(
            "Um I think that you know the weather today is really quite nice outside.",
        );
        // two fillers: um, you know
        assert!(has_finding(&a, |f| matches!(f, Finding::Filler { phrase: "um", count: 1 })));
        assert!(has_finding(&a, |f| matches!(
            f,
            Finding::Filler { phrase: "you know", count: 1 }
        )));
        assert_eq!(a.scores.fluency, 90);
    }

    #[test]
    fn test_fluency_filler_spacing_and_boundaries() {
        let a = score_message("We were kind   of lost but also ready for the long trip home.");
        assert!(has_finding(&a, |f| matches!(
            f,
            Finding::Filler { phrase: "kind of", count: 1 }
        )));
        // "also" must not count as "so"
        assert!(!has_finding(&a, |f| matches!(f, Finding::Filler { phrase: "so", .. })));
    }

    #[test]
    fn test_fluency_short_sentences() {
        // avg 2 words -> -20, all short -> -15
        let a = score_message("Yes. No. Maybe.");
        assert_eq!(a.scores.fluency, 65);
    }

    #[test]
    fn test_fluency_run_on() {
        let a = score_message(
            "We bought apples, pears, grapes, plums, and cherries at the market today.",
        );
        assert!(has_finding(&a, |f| matches!(f, Finding::RunOnSentences { count: 1 })));
        assert_eq!(a.scores.fluency, 90);
    }

    #[test]
    fn test_garbage_is_bounded() {
        for msg in ["\u{0}\u{1}\u{2}", "!!!!!!!!", "ÄÖÜ ßß", "日本語のテキスト", "a"] {
            let r = analyze(msg);
            for s in [r.overall, r.grammar, r.vocabulary, r.spelling, r.fluency] {
                assert!(s <= 100);
            }
        }
    }
}
