//! Turning a raw model reply into a validated [`ExtractorOutput`].
//!
//! Both extraction and approval go through [`parse_extractor_output`],
//! so a run approves exactly what its extraction would have accepted.
//!
//! The payload locator is a heuristic: it takes everything from the first
//! `{` to the last `}`. That tolerates prose and code fences around the
//! object, but an unrelated brace pair after the real payload will break
//! the parse.

use anyhow::Result;
use serde_json::Value;

use crate::error::IngestError;
use crate::schema::{normalize_confidence, validate, ConfidenceVocabulary, ExtractorOutput};

/// Return the candidate JSON object substring of `text`.
pub fn extract_json_object(text: &str) -> Result<&str> {
    let start = text.find('{');
    let end = text.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(&text[s..=e]),
        _ => Err(IngestError::NoJsonObject.into()),
    }
}

/// Locate, decode, and normalize the payload without schema validation.
pub fn parse_normalized_json(raw: &str, vocab: &ConfidenceVocabulary) -> Result<Value> {
    let candidate = extract_json_object(raw)?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| IngestError::MalformedJson(e.to_string()))?;
    Ok(normalize_confidence(value, vocab))
}

/// Full pipeline: brace extraction, JSON decode, confidence fold, validation.
pub fn parse_extractor_output(raw: &str, vocab: &ConfidenceVocabulary) -> Result<ExtractorOutput> {
    let value = parse_normalized_json(raw, vocab)?;
    validate(value)
}
