//! Layered recovery of classifications from free-form model output
//!
//! Models are asked for a bare JSON array but often wrap it in prose, math
//! markup or code fences, or ignore the format entirely. Each strategy below
//! is a pure function over the response text; [`parse_response`] tries them
//! in order and stops at the first one that yields a classification for a
//! requested protocol.
//!
//! 1. [`parse_direct_json`]: the whole text, or its outermost `[...]` span
//! 2. [`parse_delimited`]: an array between `$begin:math:display$` /
//!    `$end:math:display$`, `\[` / `\]`, or a ```` ```json ```` fence
//! 3. [`parse_line_scan`]: per line, a protocol name plus a class token
//!
//! Class values outside the closed set are coerced to the default class and
//! protocols outside the requested batch are dropped.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::qos::{normalize_protocol, Classification, ClassificationSource, QosClass};

/// Confidence for JSON answers that carry none
pub const JSON_CONFIDENCE: f64 = 0.8;

/// Confidence for line-scan answers
pub const LINE_SCAN_CONFIDENCE: f64 = 0.7;

/// Start/end marker pairs that may surround an embedded array
const DELIMITERS: [(&str, &str); 3] = [
    ("$begin:math:display$", "$end:math:display$"),
    ("\\[", "\\]"),
    ("```json", "```"),
];

/// Class tokens checked by the line scan, in priority order
const LINE_SCAN_CLASSES: [QosClass; 3] = [QosClass::EF, QosClass::AF41, QosClass::AF21];

/// One element of the JSON answer array
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RawAnswer {
    /// Protocol name as the model wrote it
    pub protocol: String,
    /// Class token as the model wrote it
    #[serde(default)]
    pub class: String,
    /// Confidence, when the model gave one
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Which strategy produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Whole text or outermost bracket span decoded as JSON
    DirectJson,
    /// JSON found between delimiter markers
    Delimited,
    /// Line-by-line substring matching
    LineScan,
}

/// Result of [`parse_response`]
#[derive(Clone, Debug, Default)]
pub struct ParsedResponse {
    /// Classifications for requested protocols
    pub classifications: HashMap<String, Classification>,
    /// Strategy that produced them; `None` when every strategy came up empty
    pub strategy: Option<ParseStrategy>,
}

// ============================================================================
// Strategy 1: Direct JSON
// ============================================================================

/// Decode the text as a JSON array, or failing that the span from the first
/// `[` to the last `]`
#[must_use]
pub fn parse_direct_json(text: &str) -> Option<Vec<RawAnswer>> {
    if let Ok(answers) = serde_json::from_str(text.trim()) {
        return Some(answers);
    }
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ============================================================================
// Strategy 2: Delimited JSON
// ============================================================================

/// Decode a JSON array embedded between known delimiter markers
///
/// A bare list of objects between the markers is wrapped in `[...]`.
#[must_use]
pub fn parse_delimited(text: &str) -> Option<Vec<RawAnswer>> {
    DELIMITERS.iter().find_map(|(open, close)| {
        let body_start = text.find(open)? + open.len();
        let body_len = text[body_start..].find(close)?;
        decode_embedded(&text[body_start..body_start + body_len])
    })
}

fn decode_embedded(body: &str) -> Option<Vec<RawAnswer>> {
    let body = body.trim();
    if body.starts_with('[') {
        return serde_json::from_str(body).ok();
    }
    let wrapped = format!("[{}]", body.trim_end_matches(',').trim_end());
    serde_json::from_str(&wrapped).ok()
}

// ============================================================================
// Strategy 3: Line Scan
// ============================================================================

/// Whether `token` appears in `text` as a whole alphanumeric word,
/// ignoring case
fn contains_word(text: &str, token: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word.eq_ignore_ascii_case(token))
}

/// Scan each line for a protocol still expected and a class token
///
/// The longest expected protocol contained in a line is the one the line is
/// about. The class is the first of `EF`, `AF41`, `AF21` found as a whole
/// word in the rest of the line, else `default_class`. The first line that
/// mentions a protocol decides it.
#[must_use]
pub fn parse_line_scan(
    text: &str,
    expected: &[String],
    default_class: QosClass,
) -> HashMap<String, Classification> {
    let mut remaining: Vec<String> = expected.iter().map(|p| normalize_protocol(p)).collect();
    let mut results = HashMap::new();

    for line in text.lines() {
        if remaining.is_empty() {
            break;
        }
        let lower = line.to_lowercase();

        let Some(index) = remaining
            .iter()
            .enumerate()
            .filter(|(_, protocol)| !protocol.is_empty() && lower.contains(protocol.as_str()))
            .max_by_key(|(_, protocol)| protocol.len())
            .map(|(i, _)| i)
        else {
            continue;
        };
        let protocol = remaining.swap_remove(index);

        // The protocol name itself may contain a class token (`ef-app`).
        let rest = lower.replacen(protocol.as_str(), " ", 1);
        let class = LINE_SCAN_CLASSES
            .into_iter()
            .find(|class| contains_word(&rest, class.as_str()))
            .unwrap_or(default_class);

        results.insert(
            protocol.clone(),
            Classification::new(protocol, class, LINE_SCAN_CONFIDENCE, ClassificationSource::Ai),
        );
    }

    results
}

// ============================================================================
// Combined
// ============================================================================

/// Turn decoded answers into classifications for requested protocols only
fn resolve_answers(
    answers: Vec<RawAnswer>,
    expected: &HashSet<String>,
    default_class: QosClass,
) -> HashMap<String, Classification> {
    let mut results = HashMap::new();

    for answer in answers {
        let protocol = normalize_protocol(&answer.protocol);
        if !expected.contains(&protocol) {
            tracing::debug!(protocol = %protocol, "Dropping answer for protocol not in batch");
            continue;
        }

        let class = answer.class.parse::<QosClass>().unwrap_or_else(|_| {
            tracing::warn!(
                protocol = %protocol,
                class = %answer.class,
                default_class = %default_class,
                "Invalid class from AI provider, using default"
            );
            default_class
        });
        let confidence = answer.confidence.unwrap_or(JSON_CONFIDENCE);

        results.insert(
            protocol.clone(),
            Classification::new(protocol, class, confidence, ClassificationSource::Ai),
        );
    }

    results
}

/// Run every strategy in order against a model answer
#[must_use]
pub fn parse_response(text: &str, expected: &[String], default_class: QosClass) -> ParsedResponse {
    let expected_set: HashSet<String> = expected.iter().map(|p| normalize_protocol(p)).collect();

    let structured: [(ParseStrategy, fn(&str) -> Option<Vec<RawAnswer>>); 2] = [
        (ParseStrategy::DirectJson, parse_direct_json),
        (ParseStrategy::Delimited, parse_delimited),
    ];
    for (strategy, parse) in structured {
        if let Some(answers) = parse(text) {
            let classifications = resolve_answers(answers, &expected_set, default_class);
            if !classifications.is_empty() {
                return ParsedResponse {
                    classifications,
                    strategy: Some(strategy),
                };
            }
        }
        tracing::debug!(?strategy, "Parse strategy produced nothing, trying next");
    }

    let classifications = parse_line_scan(text, expected, default_class);
    let strategy = (!classifications.is_empty()).then_some(ParseStrategy::LineScan);
    ParsedResponse {
        classifications,
        strategy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    // ========================================================================
    // Direct JSON Tests
    // ========================================================================

    #[test]
    fn test_direct_json_whole_text() {
        let answers =
            parse_direct_json(r#"[{"protocol":"zoom","class":"EF"},{"protocol":"ssh","class":"AF21"}]"#)
                .unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[1].class, "AF21");
        assert_eq!(answers[0].confidence, None);
    }

    #[test]
    fn test_direct_json_embedded_in_prose() {
        let text = "Here you go:\n[{\"protocol\":\"zoom\",\"class\":\"EF\",\"confidence\":0.95}]\nHope this helps.";
        let answers = parse_direct_json(text).unwrap();
        assert_eq!(answers[0].confidence, Some(0.95));
    }

    #[test]
    fn test_direct_json_rejects_non_json() {
        assert!(parse_direct_json("zoom is EF").is_none());
        assert!(parse_direct_json("] backwards [").is_none());
    }

    // ========================================================================
    // Delimited Tests
    // ========================================================================

    #[test]
    fn test_delimited_math_display_bare_objects() {
        let text = r#"Result: $begin:math:display$ {"protocol":"zoom","class":"EF"}, {"protocol":"ssh","class":"AF21"}, $end:math:display$"#;
        let answers = parse_delimited(text).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].protocol, "zoom");
    }

    #[test]
    fn test_delimited_latex_brackets() {
        let text = r#"\[ {"protocol":"webex","class":"AF41"} \]"#;
        assert!(parse_direct_json(text).is_none());
        let answers = parse_delimited(text).unwrap();
        assert_eq!(answers[0].class, "AF41");
    }

    #[test]
    fn test_delimited_code_fence() {
        let text = "```json\n[{\"protocol\":\"ntp\",\"class\":\"CS1\"}]\n```";
        let answers = parse_delimited(text).unwrap();
        assert_eq!(answers[0].protocol, "ntp");
    }

    // ========================================================================
    // Line Scan Tests
    // ========================================================================

    #[test]
    fn test_line_scan_matches_protocol_and_class() {
        let text = "1. Zoom - EF (real-time video)\n2. ssh -> af21\n3. windows-update: background";
        let results = parse_line_scan(text, &names(&["zoom", "ssh", "windows-update"]), QosClass::CS1);

        assert_eq!(results["zoom"].class, QosClass::EF);
        assert_eq!(results["ssh"].class, QosClass::AF21);
        assert_eq!(results["windows-update"].class, QosClass::CS1);
        assert!((results["zoom"].confidence - LINE_SCAN_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(results["zoom"].source, ClassificationSource::Ai);
    }

    #[test]
    fn test_line_scan_prefers_longest_protocol() {
        let text = "https: AF21\nhttp: CS1";
        let results = parse_line_scan(text, &names(&["http", "https"]), QosClass::CS1);
        assert_eq!(results["https"].class, QosClass::AF21);
        assert_eq!(results["http"].class, QosClass::CS1);
    }

    #[test]
    fn test_line_scan_whole_word_tokens() {
        // "reference" contains "ef" but is not the EF token.
        let text = "telnet: reference only, AF21";
        let results = parse_line_scan(text, &names(&["telnet"]), QosClass::CS1);
        assert_eq!(results["telnet"].class, QosClass::AF21);
    }

    #[test]
    fn test_line_scan_ignores_token_inside_protocol_name() {
        let results = parse_line_scan("ef-app: AF41", &names(&["ef-app"]), QosClass::CS1);
        assert_eq!(results["ef-app"].class, QosClass::AF41);
    }

    #[test]
    fn test_line_scan_first_mention_wins() {
        let text = "zoom is EF\nzoom could also be AF21";
        let results = parse_line_scan(text, &names(&["zoom"]), QosClass::CS1);
        assert_eq!(results["zoom"].class, QosClass::EF);
    }

    // ========================================================================
    // Combined Tests
    // ========================================================================

    #[test]
    fn test_parse_response_direct() {
        let parsed = parse_response(
            r#"[{"protocol":"Zoom","class":"EF"}]"#,
            &names(&["zoom"]),
            QosClass::CS1,
        );
        assert_eq!(parsed.strategy, Some(ParseStrategy::DirectJson));
        let zoom = &parsed.classifications["zoom"];
        assert_eq!(zoom.class, QosClass::EF);
        assert!((zoom.confidence - JSON_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_class_coerced_to_default() {
        let parsed = parse_response(
            r#"[{"protocol":"zoom","class":"PLATINUM"}]"#,
            &names(&["zoom"]),
            QosClass::AF21,
        );
        assert_eq!(parsed.classifications["zoom"].class, QosClass::AF21);
    }

    #[test]
    fn test_unrequested_protocols_dropped() {
        let parsed = parse_response(
            r#"[{"protocol":"zoom","class":"EF"},{"protocol":"bonus","class":"EF"}]"#,
            &names(&["zoom"]),
            QosClass::CS1,
        );
        assert_eq!(parsed.classifications.len(), 1);
        assert!(!parsed.classifications.contains_key("bonus"));
    }

    #[test]
    fn test_falls_through_to_line_scan() {
        let parsed = parse_response(
            "I think zoom belongs in EF.",
            &names(&["zoom", "ssh"]),
            QosClass::CS1,
        );
        assert_eq!(parsed.strategy, Some(ParseStrategy::LineScan));
        assert_eq!(parsed.classifications.len(), 1);
    }

    #[test]
    fn test_nothing_recoverable() {
        let parsed = parse_response("I cannot help with that.", &names(&["zoom"]), QosClass::CS1);
        assert!(parsed.strategy.is_none());
        assert!(parsed.classifications.is_empty());
    }
}
