//! Post-Synthesize quality check (§4.11).
//!
//! Advisory only: the result is attached to `report_metadata` and emitted as
//! an event, but never fails the session — mirrors how
//! [`crate::schedulers::recovery`] folds metrics into metadata rather than
//! aborting execution.

use std::collections::HashSet;

use crate::domain::{QualityReport, SubQuestion};

const REQUIRED_SECTIONS: &[&str] = &["Executive Summary", "Key Findings", "Sources"];
const MIN_SUBTOPIC_COVERAGE: f32 = 0.80;
/// A sub-question word counts as "present" in the report if it's longer than
/// this many characters — filters articles/prepositions out of the coverage
/// check without needing a stopword list.
const SIGNIFICANT_WORD_MIN_LEN: usize = 4;
const COVERAGE_WORD_FRACTION: f32 = 0.40;

fn citation_count(report: &str) -> usize {
    let mut seen = HashSet::new();
    let bytes = report.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close) = report[i..].find(']') {
                let inner = &report[i + 1..i + close];
                if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) {
                    seen.insert(inner.to_string());
                }
                i += close;
            }
        }
        i += 1;
    }
    seen.len()
}

fn significant_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= SIGNIFICANT_WORD_MIN_LEN)
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn subtopic_covered(report_words: &HashSet<String>, sub_question: &str) -> bool {
    let question_words: Vec<String> = significant_words(sub_question).into_iter().collect();
    if question_words.is_empty() {
        return true;
    }
    let covered = question_words
        .iter()
        .filter(|w| report_words.contains(*w))
        .count();
    (covered as f32 / question_words.len() as f32) >= COVERAGE_WORD_FRACTION
}

/// Run the quality check against a finished Markdown report.
pub fn check_quality(report: &str, sub_questions: &[SubQuestion]) -> QualityReport {
    let word_count = report.split_whitespace().count();
    let has_required_sections = REQUIRED_SECTIONS.iter().all(|s| report.contains(s));
    let citations = citation_count(report);

    let report_words = significant_words(report);
    let subtopic_coverage = if sub_questions.is_empty() {
        1.0
    } else {
        let covered = sub_questions
            .iter()
            .filter(|sq| subtopic_covered(&report_words, &sq.question))
            .count();
        covered as f32 / sub_questions.len() as f32
    };

    let passed = has_required_sections && subtopic_coverage >= MIN_SUBTOPIC_COVERAGE;

    QualityReport {
        word_count,
        has_required_sections,
        citation_count: citations,
        subtopic_coverage,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(id: u32, question: &str) -> SubQuestion {
        SubQuestion {
            id,
            question: question.to_string(),
            rationale: String::new(),
        }
    }

    #[test]
    fn missing_required_section_fails() {
        let report = "# Report\n\n## Key Findings\nSomething.\n\n## Sources\n[1] example.com";
        let result = check_quality(report, &[]);
        assert!(!result.has_required_sections);
        assert!(!result.passed);
    }

    #[test]
    fn full_report_with_covered_subtopics_passes() {
        let report = "## Executive Summary\nRust async runtimes compared. [1]\n\n\
             ## Key Findings\nTokio dominates production async runtimes. [1]\n\n\
             ## Sources\n[1] https://example.com";
        let subs = vec![sq(1, "What are the leading rust async runtimes?")];
        let result = check_quality(report, &subs);
        assert!(result.has_required_sections);
        assert_eq!(result.citation_count, 1);
        assert!(result.subtopic_coverage >= 0.80);
        assert!(result.passed);
    }

    #[test]
    fn uncovered_subtopic_drags_coverage_below_threshold() {
        let report = "## Executive Summary\nUnrelated content here. [1]\n\n## Key Findings\nMore unrelated text. [1]\n\n## Sources\n[1] https://example.com";
        let subs = vec![
            sq(1, "What are quantum computing error correction codes?"),
            sq(2, "How does photosynthesis regulate circadian rhythms?"),
        ];
        let result = check_quality(report, &subs);
        assert!(result.subtopic_coverage < MIN_SUBTOPIC_COVERAGE);
        assert!(!result.passed);
    }
}
