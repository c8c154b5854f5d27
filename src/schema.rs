//! Evidence-addressed record schema for extractor output.
//!
//! This is the wire contract between the language model and the parser:
//! the model must return a JSON object shaped like [`ExtractorOutput`].
//! Every claim carries a three-level [`Confidence`] and a list of
//! [`Evidence`] citations pointing back at chunk line ranges.
//!
//! Confidence vocabulary is folded *before* validation by
//! [`normalize_confidence`], driven by an explicit
//! [`ConfidenceVocabulary`] value. Values the vocabulary does not know
//! pass through the fold untouched; [`validate`] then rejects them, so
//! every accepted record holds only canonical tokens.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IngestError;

/// Version tag of the extractor output contract.
pub const SCHEMA_VERSION: &str = "extractor-output.v1";

/// Operator-facing trust tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Med,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Med => "med",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synonym table used to fold free-form confidence strings.
///
/// Lookups are case-insensitive and ignore surrounding whitespace.
#[derive(Debug, Clone)]
pub struct ConfidenceVocabulary {
    entries: HashMap<String, Confidence>,
}

impl ConfidenceVocabulary {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Confidence)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into().trim().to_lowercase(), v))
                .collect(),
        }
    }

    /// `high`, `med`, `medium`, `low`.
    pub fn standard() -> Self {
        Self::new([
            ("high", Confidence::High),
            ("med", Confidence::Med),
            ("medium", Confidence::Med),
            ("low", Confidence::Low),
        ])
    }

    pub fn fold(&self, raw: &str) -> Option<Confidence> {
        self.entries.get(&raw.trim().to_lowercase()).copied()
    }
}

impl Default for ConfidenceVocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

/// Walk a JSON tree and rewrite every string-valued `confidence` field
/// to its canonical token. Unknown strings and non-string values are
/// left exactly as they were.
pub fn normalize_confidence(value: Value, vocab: &ConfidenceVocabulary) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    let v = match v {
                        Value::String(s) if key == "confidence" => match vocab.fold(&s) {
                            Some(c) => Value::String(c.as_str().to_string()),
                            None => Value::String(s),
                        },
                        other => normalize_confidence(other, vocab),
                    };
                    (key, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| normalize_confidence(v, vocab))
                .collect(),
        ),
        other => other,
    }
}

/// A citation tying a claim to a source range.
///
/// `source` is expected to look like `file.txt:L10-L20` but is not
/// checked; models emit malformed citations and those are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedFact {
    pub claim: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenQuestion {
    pub question: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedCharacter {
    pub name: String,
    #[serde(default)]
    pub facts: Vec<ProposedFact>,
    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedWorld {
    #[serde(default)]
    pub facts: Vec<ProposedFact>,
    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTimelineEvent {
    /// Free text ("the next morning", "Year 3"), never parsed as a date.
    pub when: String,
    pub what: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTimeline {
    #[serde(default)]
    pub events: Vec<ProposedTimelineEvent>,
}

/// Root record returned by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorOutput {
    #[serde(default)]
    pub characters: Vec<ProposedCharacter>,
    #[serde(default)]
    pub world: ProposedWorld,
    #[serde(default)]
    pub timeline: ProposedTimeline,
}

impl ExtractorOutput {
    pub fn world_fact_count(&self) -> usize {
        self.world.facts.len()
    }

    pub fn timeline_event_count(&self) -> usize {
        self.timeline.events.len()
    }

    pub fn character_fact_count(&self) -> usize {
        self.characters.iter().map(|c| c.facts.len()).sum()
    }
}

/// Validate a normalized JSON tree against the [`ExtractorOutput`] shape.
///
/// # Errors
///
/// - [`IngestError::MalformedJson`] if the root is not an object.
/// - [`IngestError::Schema`] for any type mismatch, missing required
///   field, or non-canonical confidence token.
pub fn validate(value: Value) -> Result<ExtractorOutput> {
    if !value.is_object() {
        return Err(
            IngestError::MalformedJson("extractor JSON root must be an object".to_string()).into(),
        );
    }
    let output: ExtractorOutput =
        serde_json::from_value(value).map_err(|e| IngestError::Schema(e.to_string()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fold_synonyms() {
        let vocab = ConfidenceVocabulary::standard();
        let got: Vec<_> = ["High", "MED", "Medium", "low"]
            .iter()
            .map(|s| vocab.fold(s))
            .collect();
        assert_eq!(
            got,
            vec![
                Some(Confidence::High),
                Some(Confidence::Med),
                Some(Confidence::Med),
                Some(Confidence::Low)
            ]
        );
        assert_eq!(vocab.fold("  medium "), Some(Confidence::Med));
        assert_eq!(vocab.fold("certain"), None);
    }

    #[test]
    fn test_normalize_walks_nested_values() {
        let vocab = ConfidenceVocabulary::standard();
        let input = json!({
            "world": {"facts": [{"claim": "a", "confidence": "High"}]},
            "timeline": {"events": [{"when": "x", "what": "y", "confidence": "Medium"}]},
            "characters": [{"name": "Ann", "facts": [{"claim": "b", "confidence": "LOW"}]}]
        });
        let out = normalize_confidence(input, &vocab);
        assert_eq!(out["world"]["facts"][0]["confidence"], "high");
        assert_eq!(out["timeline"]["events"][0]["confidence"], "med");
        assert_eq!(out["characters"][0]["facts"][0]["confidence"], "low");
    }

    #[test]
    fn test_normalize_passes_unknown_through() {
        let vocab = ConfidenceVocabulary::standard();
        let out = normalize_confidence(
            json!({"confidence": "Certain", "other": {"confidence": 3}}),
            &vocab,
        );
        assert_eq!(out["confidence"], "Certain");
        assert_eq!(out["other"]["confidence"], 3);
    }

    #[test]
    fn test_custom_vocabulary() {
        let vocab = ConfidenceVocabulary::new([("sure", Confidence::High)]);
        let out = normalize_confidence(json!({"confidence": "SURE"}), &vocab);
        assert_eq!(out["confidence"], "high");
        // "medium" is not part of this table
        let out = normalize_confidence(json!({"confidence": "medium"}), &vocab);
        assert_eq!(out["confidence"], "medium");
    }

    #[test]
    fn test_validate_defaults() {
        let out = validate(json!({
            "world": {"facts": [{"claim": "The city has two moons"}]}
        }))
        .unwrap();
        assert!(out.characters.is_empty());
        assert_eq!(out.world.facts[0].confidence, Confidence::Med);
        assert!(out.world.facts[0].evidence.is_empty());
        assert!(out.timeline.events.is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_confidence() {
        let err = validate(json!({
            "world": {"facts": [{"claim": "x", "confidence": "certain"}]}
        }))
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Schema(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_object_root() {
        let err = validate(json!([1, 2])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_required() {
        let err = validate(json!({"timeline": {"events": [{"what": "no when"}]}})).unwrap_err();
        assert!(err.to_string().contains("missing field `when`"), "{}", err);
    }

    #[test]
    fn test_evidence_source_not_enforced() {
        let out = validate(json!({
            "characters": [{
                "name": "Pooh",
                "facts": [{"claim": "likes honey", "confidence": "high",
                           "evidence": [{"source": "somewhere vague"}]}]
            }]
        }))
        .unwrap();
        let ev = &out.characters[0].facts[0].evidence[0];
        assert_eq!(ev.source, "somewhere vague");
        assert_eq!(ev.note, "");
    }

    #[test]
    fn test_counts() {
        let out = validate(json!({
            "characters": [
                {"name": "A", "facts": [{"claim": "1"}, {"claim": "2"}]},
                {"name": "B", "facts": [{"claim": "3"}]}
            ],
            "world": {"facts": [{"claim": "w"}]},
            "timeline": {"events": []}
        }))
        .unwrap();
        assert_eq!(out.character_fact_count(), 3);
        assert_eq!(out.world_fact_count(), 1);
        assert_eq!(out.timeline_event_count(), 0);
    }
}
