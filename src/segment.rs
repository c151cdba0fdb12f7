//! Segment types at the boundary with the external segmentation collaborator.
//!
//! The core never segments documents itself; it consumes a lazy, finite,
//! non-restartable sequence of [`Segment`]s. [`ParagraphSegmenter`] is the
//! stand-in collaborator used by the CLI so the binary can run end to end.

use serde::{Deserialize, Serialize};

/// An opaque unit of document text with a precomputed entity-density hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    /// Entity mentions counted by the external NER pass.
    pub entity_count: u32,
    /// Approximate token length of the text.
    pub token_length: u32,
}

/// Lazy, finite, non-restartable source of segments for one document.
pub type SegmentSource = Box<dyn Iterator<Item = Segment> + Send>;

/// Paragraph-splitting segmenter used at the CLI edge.
///
/// The entity hint is a crude capitalized-token count standing in for the
/// external NER pass; token length is whitespace word count.
pub struct ParagraphSegmenter;

impl ParagraphSegmenter {
    /// Splits text into paragraph segments with entity/length hints.
    pub fn segment(text: &str) -> Vec<Segment> {
        text.split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| Segment {
                text: p.to_string(),
                entity_count: count_capitalized_tokens(p),
                token_length: p.split_whitespace().count() as u32,
            })
            .collect()
    }

    /// Wraps the split into the lazy source shape the core consumes.
    pub fn source(text: &str) -> SegmentSource {
        Box::new(Self::segment(text).into_iter())
    }
}

fn count_capitalized_tokens(text: &str) -> u32 {
    text.split_whitespace()
        .skip(1) // sentence-initial capitals are not entity evidence
        .filter(|w| {
            let mut chars = w.chars();
            chars.next().is_some_and(|c| c.is_uppercase()) && w.len() > 1
        })
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_blank_lines() {
        let segments =
            ParagraphSegmenter::segment("First paragraph here.\n\nSecond paragraph here.");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "First paragraph here.");
    }

    #[test]
    fn skips_empty_paragraphs() {
        let segments = ParagraphSegmenter::segment("One.\n\n\n\n   \n\nTwo.");
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn counts_capitalized_tokens_as_entities() {
        let segments =
            ParagraphSegmenter::segment("The platform integrates SAP Ariba with Microsoft Azure.");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].entity_count, 4);
    }

    #[test]
    fn token_length_is_word_count() {
        let segments = ParagraphSegmenter::segment("one two three four");
        assert_eq!(segments[0].token_length, 4);
    }

    #[test]
    fn source_is_consumed_once() {
        let mut source = ParagraphSegmenter::source("A.\n\nB.");
        assert!(source.next().is_some());
        assert!(source.next().is_some());
        assert!(source.next().is_none());
    }
}
