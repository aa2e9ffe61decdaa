//! Request classification.
//!
//! Maps raw input text to a [`Tier`] using two mutually exclusive rule sets:
//!
//! | Rule set | Where it matches | Tier |
//! |----------|------------------|------|
//! | Conversational openers (greetings, thanks, farewells, yes/no, identity) | start of the trimmed input | `Simple` |
//! | Task vocabulary (build, implement, debug, optimize, design, analyze, verify…) | anywhere | `Complex` |
//! | neither | n/a | `Medium` |
//!
//! The opener check runs first: `"hi, can you debug this?"` is `Simple` even
//! though it contains task vocabulary. First match wins.

use super::tier::Tier;

/// Conversational openers, matched against the start of the lowercased,
/// trimmed input and followed by a non-alphanumeric character or the end.
const SIMPLE_OPENERS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hola",
    "good morning",
    "good afternoon",
    "good evening",
    "thanks",
    "thank you",
    "thx",
    "bye",
    "goodbye",
    "see you",
    "yes",
    "no",
    "ok",
    "okay",
    "sure",
    "who are you",
    "what are you",
    "what is your name",
    "what's your name",
    "how are you",
];

/// Task-indicating word stems, matched against the start of any word.
const COMPLEX_STEMS: &[&str] = &[
    "build",
    "implement",
    "debug",
    "optimi",
    "design",
    "analy",
    "verif",
    "refactor",
    "architect",
    "algorithm",
    "develop",
    "integrat",
    "migrat",
    "deploy",
];

/// Outcome of classifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The assigned tier.
    pub tier: Tier,
    /// Human-readable rationale, for observability only.
    pub reason: String,
}

/// Stateless pattern classifier.
///
/// # Panics
///
/// This type and its methods never panic.
#[derive(Debug, Clone, Default)]
pub struct Classifier;

impl Classifier {
    /// Create a classifier with the built-in rule sets.
    pub fn new() -> Self {
        Self
    }

    /// Classify `text` into a tier.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tiered_prompt_orchestrator::routing::{Classifier, Tier};
    /// let classifier = Classifier::new();
    /// assert_eq!(classifier.classify("hello there").tier, Tier::Simple);
    /// assert_eq!(classifier.classify("implement a parser").tier, Tier::Complex);
    /// assert_eq!(classifier.classify("what is the capital of France?").tier, Tier::Medium);
    /// ```
    pub fn classify(&self, text: &str) -> Classification {
        let normalized = text.trim().to_lowercase();

        if let Some(opener) = Self::simple_opener(&normalized) {
            return Classification {
                tier: Tier::Simple,
                reason: format!("conversational opener '{opener}'"),
            };
        }

        if let Some(stem) = Self::complex_stem(&normalized) {
            return Classification {
                tier: Tier::Complex,
                reason: format!("task vocabulary '{stem}'"),
            };
        }

        Classification {
            tier: Tier::Medium,
            reason: "no conversational opener or task vocabulary".to_string(),
        }
    }

    // ── Rule sets ──────────────────────────────────────────────────────

    fn simple_opener(normalized: &str) -> Option<&'static str> {
        SIMPLE_OPENERS.iter().copied().find(|opener| {
            normalized.strip_prefix(opener).is_some_and(|rest| {
                rest.chars().next().map_or(true, |c| !c.is_alphanumeric())
            })
        })
    }

    fn complex_stem(normalized: &str) -> Option<&'static str> {
        normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .find_map(|word| {
                COMPLEX_STEMS
                    .iter()
                    .copied()
                    .find(|stem| word.starts_with(stem))
            })
    }
}
