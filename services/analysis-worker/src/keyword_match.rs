use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

use sheetscan_models::{KeywordMatch, OcrPayload, OcrWord};

use crate::error::AnalysisError;

/// Keywords compiled once per page run.
pub struct KeywordMatcher {
    keywords: Vec<(String, String, Regex)>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Result<Self, AnalysisError> {
        let keywords = keywords
            .iter()
            .filter(|keyword| !keyword.trim().is_empty())
            .map(|keyword| {
                let pattern = format!(r"\b{}\b", regex::escape(keyword));
                let regex = RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AnalysisError::unexpected(format!("keyword {:?}: {}", keyword, e)))?;
                Ok((keyword.clone(), keyword.to_lowercase(), regex))
            })
            .collect::<Result<Vec<_>, AnalysisError>>()?;

        Ok(Self { keywords })
    }

    /// Every (keyword, word) hit on the page, grouped by keyword in the order
    /// the keywords were given, words in reading order within each group.
    pub fn find(&self, payload: &OcrPayload) -> Vec<KeywordMatch> {
        let words: Vec<(&OcrWord, String)> = payload
            .words()
            .map(|word| (word, word.text.to_lowercase()))
            .collect();

        let mut matches = Vec::new();
        for (keyword, lower, regex) in &self.keywords {
            for (word, lowered) in &words {
                if regex.is_match(&word.text) || lowered.contains(lower.as_str()) {
                    matches.push(KeywordMatch {
                        keyword: keyword.clone(),
                        word: word.text.clone(),
                        confidence: percent(word.confidence),
                        coordinates: word.flattened_polygon(),
                    });
                }
            }
        }
        matches
    }
}

/// Confidence as a percentage with two decimals.
fn percent(confidence: f64) -> f64 {
    (confidence * 100.0 * 100.0).round() / 100.0
}

pub fn matched_keywords(matches: &[KeywordMatch]) -> BTreeSet<String> {
    matches.iter().map(|m| m.keyword.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sheetscan_models::{OcrBlock, OcrLine, Point, ReadResult};

    fn word(text: &str, confidence: f64) -> OcrWord {
        OcrWord {
            text: text.to_string(),
            confidence,
            bounding_polygon: vec![Point { x: 1.0, y: 2.0 }, Point { x: 3.0, y: 4.0 }],
        }
    }

    fn payload(words: Vec<OcrWord>) -> OcrPayload {
        let text = words.iter().map(|w| w.text.clone()).collect::<Vec<_>>().join(" ");
        OcrPayload {
            read_result: ReadResult {
                blocks: vec![OcrBlock {
                    lines: vec![OcrLine { text, words }],
                }],
            },
        }
    }

    fn keywords(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_whole_word_and_substring_matches() {
        let matcher = KeywordMatcher::new(&keywords(&["PFAS", "fluoro"])).unwrap();
        let page = payload(vec![
            word("pfas", 0.98761),
            word("Perfluorooctanoic", 0.5),
            word("water", 0.9),
        ]);

        let matches = matcher.find(&page);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].keyword, "PFAS");
        assert_eq!(matches[0].word, "pfas");
        assert_eq!(matches[0].confidence, 98.76);
        assert_eq!(matches[0].coordinates, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(matches[1].keyword, "fluoro");

        let distinct = matched_keywords(&matches);
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let matcher = KeywordMatcher::new(&keywords(&["C8+", "(PFOA)"])).unwrap();
        let page = payload(vec![word("C8+", 0.9), word("C88", 0.9), word("(PFOA)", 0.9)]);

        let found: Vec<String> = matcher.find(&page).into_iter().map(|m| m.word).collect();
        assert_eq!(found, vec!["C8+", "(PFOA)"]);
    }

    #[test]
    fn test_matches_are_grouped_by_keyword_order() {
        let matcher = KeywordMatcher::new(&keywords(&["PTFE", "PFOA"])).unwrap();
        let page = payload(vec![
            word("PFOA", 0.9),
            word("PTFE", 0.9),
            word("pfoa-free", 0.9),
            word("ptfe", 0.9),
        ]);

        let found: Vec<(String, String)> = matcher
            .find(&page)
            .into_iter()
            .map(|m| (m.keyword, m.word))
            .collect();
        assert_eq!(
            found,
            vec![
                ("PTFE".to_string(), "PTFE".to_string()),
                ("PTFE".to_string(), "ptfe".to_string()),
                ("PFOA".to_string(), "PFOA".to_string()),
                ("PFOA".to_string(), "pfoa-free".to_string()),
            ]
        );
    }

    #[test]
    fn test_one_word_can_match_several_keywords() {
        let matcher = KeywordMatcher::new(&keywords(&["PTFE", "ptfe", "  "])).unwrap();
        let matches = matcher.find(&payload(vec![word("PTFE-coated", 0.7)]));
        assert_eq!(matches.len(), 2);
        assert_eq!(matched_keywords(&matches).len(), 2);
    }

    proptest! {
        #[test]
        fn prop_word_containing_keyword_always_matches(
            prefix in "[a-z]{0,6}",
            keyword in "[A-Za-z]{1,8}",
            suffix in "[a-z]{0,6}",
        ) {
            let text = format!("{}{}{}", prefix, keyword.to_uppercase(), suffix);
            let matcher = KeywordMatcher::new(&[keyword.clone()]).unwrap();
            let matches = matcher.find(&payload(vec![word(&text, 0.5)]));
            prop_assert_eq!(matches.len(), 1);
            prop_assert_eq!(&matches[0].keyword, &keyword);
        }

        #[test]
        fn prop_confidence_has_two_decimals(confidence in 0.0f64..=1.0) {
            let value = percent(confidence);
            prop_assert!((0.0..=100.0).contains(&value));
            prop_assert!(((value * 100.0).round() - value * 100.0).abs() < 1e-6);
        }
    }
}
