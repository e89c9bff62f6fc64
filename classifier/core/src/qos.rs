//! QoS classes and classification records
//!
//! Every answer the engine produces is a [`Classification`]: a protocol name,
//! one of the closed set of [`QosClass`] values, a confidence and the layer
//! that supplied it ([`ClassificationSource`]).
//!
//! ```text
//!   EF      Expedited Forwarding   (voice, video calls)       priority 1
//!   AF41    Assured Forwarding 41  (business-critical)        priority 2
//!   AF21    Assured Forwarding 21  (email, transfers)         priority 3
//!   CS1     Class Selector 1       (background)               priority 4
//!   OTHER   Unclassified                                      priority 5
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while validating QoS values
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QosError {
    /// The class token is not one of the supported QoS classes
    #[error("invalid QoS class: {0}")]
    InvalidClass(String),

    /// The protocol name is empty
    #[error("protocol name cannot be empty")]
    EmptyProtocol,

    /// The protocol name contains characters NBAR never emits
    #[error("invalid protocol name format: {0}")]
    InvalidProtocolName(String),
}

// ============================================================================
// QoS Class
// ============================================================================

/// A QoS class from the fixed marking scheme
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum QosClass {
    /// Expedited Forwarding, real-time traffic
    #[serde(rename = "EF")]
    EF,

    /// Assured Forwarding 41, business-critical applications
    #[serde(rename = "AF41")]
    AF41,

    /// Assured Forwarding 21, important data
    #[serde(rename = "AF21")]
    AF21,

    /// Class Selector 1, background traffic
    #[default]
    #[serde(rename = "CS1")]
    CS1,

    /// No specific marking
    #[serde(rename = "OTHER", alias = "UNCLASSIFIED")]
    Unclassified,
}

impl QosClass {
    /// All classes in priority order
    pub const ALL: [QosClass; 5] = [
        QosClass::EF,
        QosClass::AF41,
        QosClass::AF21,
        QosClass::CS1,
        QosClass::Unclassified,
    ];

    /// Canonical upper-case token
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EF => "EF",
            Self::AF41 => "AF41",
            Self::AF21 => "AF21",
            Self::CS1 => "CS1",
            Self::Unclassified => "OTHER",
        }
    }

    /// Scheduling priority (lower number = more urgent)
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::EF => 1,
            Self::AF41 => 2,
            Self::AF21 => 3,
            Self::CS1 => 4,
            Self::Unclassified => 5,
        }
    }

    /// DSCP marking keyword used in switch configuration
    #[must_use]
    pub fn dscp(&self) -> &'static str {
        match self {
            Self::EF => "ef",
            Self::AF41 => "af41",
            Self::AF21 => "af21",
            Self::CS1 => "cs1",
            Self::Unclassified => "cs0",
        }
    }

    /// Human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::EF => "Expedited Forwarding - Real-time traffic (Voice, Video calls)",
            Self::AF41 => "Assured Forwarding 41 - Business-critical applications",
            Self::AF21 => "Assured Forwarding 21 - Important data applications",
            Self::CS1 => "Class Selector 1 - Background traffic",
            Self::Unclassified => "Unclassified - No specific QoS treatment",
        }
    }
}

impl fmt::Display for QosClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QosClass {
    type Err = QosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EF" => Ok(Self::EF),
            "AF41" => Ok(Self::AF41),
            "AF21" => Ok(Self::AF21),
            "CS1" => Ok(Self::CS1),
            "OTHER" | "UNCLASSIFIED" => Ok(Self::Unclassified),
            _ => Err(QosError::InvalidClass(s.to_string())),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Which layer of the pipeline produced a classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Exact match in the predefined table
    Predefined,
    /// Matched a custom pattern rule
    CustomRule,
    /// Restored from a legacy cache file
    Cache,
    /// Answered by an AI provider
    Ai,
    /// Nothing matched; the configured default class
    Default,
}

impl ClassificationSource {
    /// Stable lower-case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Predefined => "predefined",
            Self::CustomRule => "custom_rule",
            Self::Cache => "cache",
            Self::Ai => "ai",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classification of a single protocol
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Lower-case protocol name
    pub protocol: String,

    /// Assigned QoS class
    pub class: QosClass,

    /// Confidence in the answer (0.0 - 1.0)
    pub confidence: f64,

    /// Provenance of the answer
    pub source: ClassificationSource,

    /// When the answer was produced
    #[serde(rename = "timestamp", with = "chrono::serde::ts_seconds")]
    pub observed_at: DateTime<Utc>,
}

impl Classification {
    /// Create a classification stamped with the current time
    pub fn new(
        protocol: impl Into<String>,
        class: QosClass,
        confidence: f64,
        source: ClassificationSource,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            class,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            observed_at: Utc::now(),
        }
    }

    /// Re-stamp with a new source and the current time
    #[must_use]
    pub fn restamped(mut self, source: ClassificationSource) -> Self {
        self.source = source;
        self.observed_at = Utc::now();
        self
    }
}

// ============================================================================
// Protocol Names
// ============================================================================

fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

fn is_edge_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

/// Validate a protocol name as NBAR reports it
///
/// Accepted names match `^[a-z0-9][a-z0-9_-]*[a-z0-9]$` or are a single
/// alphanumeric character. The name is compared in lower case, so `SIP` and
/// `sip` are both valid.
///
/// # Errors
///
/// Returns [`QosError::EmptyProtocol`] for an empty name and
/// [`QosError::InvalidProtocolName`] when it does not look like an NBAR name.
pub fn validate_protocol_name(name: &str) -> Result<(), QosError> {
    if name.is_empty() {
        return Err(QosError::EmptyProtocol);
    }
    let lowered = name.to_lowercase();
    let edges_ok = match (lowered.chars().next(), lowered.chars().next_back()) {
        (Some(first), Some(last)) => is_edge_char(first) && is_edge_char(last),
        _ => false,
    };
    let well_formed = edges_ok && lowered.chars().all(is_name_char);
    if well_formed {
        Ok(())
    } else {
        Err(QosError::InvalidProtocolName(name.to_string()))
    }
}

/// Normalize a protocol name for lookups
#[must_use]
pub fn normalize_protocol(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// Aggregation Helpers
// ============================================================================

/// Group protocol names by class, each list sorted
#[must_use]
pub fn group_by_class(
    classifications: &HashMap<String, Classification>,
) -> BTreeMap<QosClass, Vec<String>> {
    let mut grouped: BTreeMap<QosClass, Vec<String>> = BTreeMap::new();
    for (protocol, classification) in classifications {
        grouped
            .entry(classification.class)
            .or_default()
            .push(protocol.clone());
    }
    for protocols in grouped.values_mut() {
        protocols.sort();
    }
    grouped
}

/// Count classifications per class
#[must_use]
pub fn class_statistics(
    classifications: &HashMap<String, Classification>,
) -> BTreeMap<QosClass, usize> {
    let mut stats = BTreeMap::new();
    for classification in classifications.values() {
        *stats.entry(classification.class).or_insert(0) += 1;
    }
    stats
}

/// Count classifications per source
#[must_use]
pub fn source_statistics(
    classifications: &HashMap<String, Classification>,
) -> BTreeMap<ClassificationSource, usize> {
    let mut stats = BTreeMap::new();
    for classification in classifications.values() {
        *stats.entry(classification.source).or_insert(0) += 1;
    }
    stats
}

/// Keep only classifications at or above a confidence level
#[must_use]
pub fn filter_by_confidence(
    classifications: &HashMap<String, Classification>,
    min_confidence: f64,
) -> HashMap<String, Classification> {
    classifications
        .iter()
        .filter(|(_, c)| c.confidence >= min_confidence)
        .map(|(k, c)| (k.clone(), c.clone()))
        .collect()
}

/// Keep only classifications from one source
#[must_use]
pub fn filter_by_source(
    classifications: &HashMap<String, Classification>,
    source: ClassificationSource,
) -> HashMap<String, Classification> {
    classifications
        .iter()
        .filter(|(_, c)| c.source == source)
        .map(|(k, c)| (k.clone(), c.clone()))
        .collect()
}
