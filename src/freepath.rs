//! Free-path extraction for the NO_LLM tier.
//!
//! When the budget is exhausted or a segment is too sparse to justify a
//! paid call, candidates are harvested locally: capitalized phrases and
//! acronyms, typed with weighted keyword scoring. Deliberately low
//! confidence — the quality gate decides what survives.

use std::collections::HashMap;

use crate::gate::Candidate;
use crate::segment::Segment;

/// Base confidence for a harvested phrase; grows slightly with length.
const BASE_CONFIDENCE: f64 = 0.55;

/// Keyword evidence for a candidate's concept type.
const KIND_KEYWORDS: &[(&str, &str, u32)] = &[
    ("platform", "Product", 10),
    ("suite", "Product", 8),
    ("service", "Product", 5),
    ("server", "Product", 5),
    ("engine", "Product", 5),
    ("api", "Technology", 8),
    ("protocol", "Technology", 10),
    ("framework", "Technology", 10),
    ("language", "Technology", 8),
    ("database", "Technology", 8),
    ("cloud", "Technology", 5),
    ("process", "Process", 10),
    ("workflow", "Process", 8),
    ("pipeline", "Process", 8),
    ("method", "Process", 5),
    ("inc", "Organization", 10),
    ("corp", "Organization", 10),
    ("gmbh", "Organization", 10),
    ("team", "Organization", 5),
];

/// Harvests candidates from one segment without any reasoning-service call.
pub fn extract(segment: &Segment, segment_index: usize) -> Vec<Candidate> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut candidates = Vec::new();

    for phrase in harvest_phrases(&segment.text) {
        let key = phrase.to_lowercase();
        if let Some(&existing) = seen.get(&key) {
            // Repeat mention: bump confidence instead of duplicating.
            let candidate: &mut Candidate = &mut candidates[existing];
            candidate.confidence = (candidate.confidence + 0.05).min(0.75);
            continue;
        }

        let words = phrase.split_whitespace().count();
        let confidence = (BASE_CONFIDENCE + 0.04 * (words.min(3) as f64)).min(0.75);
        let kind = infer_kind(&segment.text, &phrase);

        seen.insert(key, candidates.len());
        candidates.push(Candidate::new(phrase, kind, confidence, segment_index));
    }

    candidates
}

/// Collects capitalized runs and standalone acronyms.
fn harvest_phrases(text: &str) -> Vec<String> {
    let mut phrases = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut first_in_sentence = true;

    for raw in text.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != '-');
        let ends_sentence = raw.ends_with(['.', '!', '?', ':', ';']);
        let ends_phrase = ends_sentence || raw.ends_with([',', ')']);

        let keep = !token.is_empty()
            && token.chars().next().is_some_and(char::is_uppercase)
            && token.len() > 1
            // A capitalized sentence opener alone is not entity evidence,
            // but it may still start a multi-word phrase.
            && !(first_in_sentence && current.is_empty() && !is_acronym(token));

        if keep {
            current.push(token);
        } else {
            flush(&mut current, &mut phrases);
        }
        if ends_phrase {
            flush(&mut current, &mut phrases);
        }
        first_in_sentence = ends_sentence;
    }
    flush(&mut current, &mut phrases);
    phrases
}

fn flush(current: &mut Vec<&str>, phrases: &mut Vec<String>) {
    if !current.is_empty() {
        phrases.push(current.join(" "));
        current.clear();
    }
}

fn is_acronym(token: &str) -> bool {
    token.len() >= 2
        && token.len() <= 6
        && token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Weighted keyword vote over the phrase and its surrounding text.
fn infer_kind(text: &str, phrase: &str) -> String {
    let lower_phrase = phrase.to_lowercase();
    let lower_text = text.to_lowercase();

    let mut scores: HashMap<&str, u32> = HashMap::new();
    for &(keyword, kind, weight) in KIND_KEYWORDS {
        if lower_phrase.contains(keyword) {
            *scores.entry(kind).or_insert(0) += weight * 2;
        } else if lower_text.contains(keyword) {
            *scores.entry(kind).or_insert(0) += weight;
        }
    }

    scores
        .into_iter()
        .max_by_key(|&(_, score)| score)
        .map(|(kind, _)| kind.to_string())
        .unwrap_or_else(|| "Concept".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str) -> Segment {
        Segment {
            text: text.to_string(),
            entity_count: 0,
            token_length: text.split_whitespace().count() as u32,
        }
    }

    #[test]
    fn harvests_capitalized_phrases() {
        let candidates = extract(
            &segment("The team migrated to Apache Kafka for event streaming."),
            0,
        );
        assert!(candidates.iter().any(|c| c.name == "Apache Kafka"));
    }

    #[test]
    fn harvests_acronyms_even_at_sentence_start() {
        let candidates = extract(&segment("SAP runs the procurement stack."), 2);
        assert!(candidates.iter().any(|c| c.name == "SAP"));
        assert_eq!(candidates[0].source_segment, 2);
    }

    #[test]
    fn commas_separate_adjacent_names() {
        let candidates = extract(
            &segment("We wired Beta Store, Gamma Queue, and Delta Cache together."),
            0,
        );
        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Beta Store"));
        assert!(names.contains(&"Gamma Queue"));
        assert!(names.contains(&"Delta Cache"));
    }

    #[test]
    fn skips_plain_sentence_openers() {
        let candidates = extract(&segment("However the rollout slipped a quarter."), 0);
        assert!(candidates.is_empty());
    }

    #[test]
    fn repeat_mentions_raise_confidence_without_duplicating() {
        let text = "We deployed Kubernetes today. We scaled Kubernetes twice.";
        let candidates = extract(&segment(text), 0);
        let k: Vec<_> = candidates.iter().filter(|c| c.name == "Kubernetes").collect();
        assert_eq!(k.len(), 1);
        assert!(k[0].confidence > BASE_CONFIDENCE + 0.04);
    }

    #[test]
    fn confidence_stays_in_the_low_band() {
        let text = "We use Kafka daily. We ship Kafka builds. We test Kafka nightly. \
                    We scale Kafka weekly. We love Kafka truly. We run Kafka anyway.";
        let candidates = extract(&segment(text), 0);
        assert!(candidates.iter().all(|c| c.confidence <= 0.75));
    }

    #[test]
    fn kind_inference_uses_keyword_evidence() {
        let candidates = extract(
            &segment("The checkout flows through the Stripe Platform every night."),
            0,
        );
        let stripe = candidates
            .iter()
            .find(|c| c.name.contains("Stripe"))
            .unwrap();
        assert_eq!(stripe.kind, "Product");
    }

    #[test]
    fn kind_defaults_to_concept_without_evidence() {
        let candidates = extract(&segment("We evaluated Graph Embeddings last week."), 0);
        let c = candidates
            .iter()
            .find(|c| c.name == "Graph Embeddings")
            .unwrap();
        assert_eq!(c.kind, "Concept");
    }
}
