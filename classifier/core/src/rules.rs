//! Rule Engine
//!
//! Resolves a protocol name against static knowledge before anything more
//! expensive is tried:
//!
//! ```text
//!  protocol ──► predefined table ──► custom rules (by priority) ──► default
//!                 exact, 1.0            first match, 0.9             0.5
//! ```
//!
//! The engine is built once from configuration and is read-only afterwards,
//! so a shared reference can be used from any number of tasks.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

use crate::config::QosSettings;
use crate::qos::{normalize_protocol, Classification, ClassificationSource, QosClass};

/// Confidence for an exact predefined match
pub const PREDEFINED_CONFIDENCE: f64 = 1.0;

/// Confidence for a custom rule match
pub const CUSTOM_RULE_CONFIDENCE: f64 = 0.9;

/// Confidence for the default fallback
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

// ============================================================================
// Errors
// ============================================================================

/// Reasons a rule is rejected
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule name is empty
    #[error("rule name cannot be empty")]
    EmptyName,

    /// Rule pattern is empty
    #[error("rule pattern cannot be empty")]
    EmptyPattern,

    /// Class token is not a QoS class
    #[error("invalid QoS class '{class}' in rule {rule}")]
    InvalidClass {
        /// Rule name
        rule: String,
        /// Offending class token
        class: String,
    },

    /// Priority below 1
    #[error("rule {rule} has priority {priority}, must be at least 1")]
    InvalidPriority {
        /// Rule name
        rule: String,
        /// Offending priority
        priority: u32,
    },

    /// Pattern failed to compile
    #[error("invalid pattern in rule {rule}: {source}")]
    InvalidPattern {
        /// Rule name
        rule: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },
}

// ============================================================================
// Rule
// ============================================================================

/// A compiled pattern rule
#[derive(Clone, Debug)]
pub struct Rule {
    name: String,
    pattern: Regex,
    class: QosClass,
    priority: u32,
    enabled: bool,
    description: String,
}

impl Rule {
    /// Compile a new enabled rule
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] for an empty name or pattern, a priority of zero,
    /// or a pattern that does not compile.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        class: QosClass,
        priority: u32,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RuleError::EmptyName);
        }
        if pattern.trim().is_empty() {
            return Err(RuleError::EmptyPattern);
        }
        if priority < 1 {
            return Err(RuleError::InvalidPriority {
                rule: name,
                priority,
            });
        }
        let pattern = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            rule: name.clone(),
            source,
        })?;

        Ok(Self {
            name,
            pattern,
            class,
            priority,
            enabled: true,
            description: String::new(),
        })
    }

    /// Compile a rule whose class is still a raw token
    ///
    /// # Errors
    ///
    /// Same as [`Rule::new`], plus [`RuleError::InvalidClass`].
    pub fn parse(
        name: impl Into<String>,
        pattern: &str,
        class: &str,
        priority: u32,
    ) -> Result<Self, RuleError> {
        let name = name.into();
        let class = class.parse().map_err(|_| RuleError::InvalidClass {
            rule: name.clone(),
            class: class.to_string(),
        })?;
        Self::new(name, pattern, class, priority)
    }

    /// Set whether the rule is enabled
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Attach a description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Rule name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source text of the pattern
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Class assigned on match
    #[must_use]
    pub fn class(&self) -> QosClass {
        self.class
    }

    /// Evaluation order (lower first)
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Whether the rule can match at all
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Free-form description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether this rule matches the protocol (already lower-cased)
    #[must_use]
    pub fn matches(&self, protocol: &str) -> bool {
        self.enabled && self.pattern.is_match(protocol)
    }
}

// ============================================================================
// Rule Engine
// ============================================================================

/// Predefined table plus ordered custom rules
#[derive(Clone, Debug)]
pub struct RuleEngine {
    predefined: HashMap<String, QosClass>,
    rules: Vec<Rule>,
    default_class: QosClass,
    confidence_threshold: f64,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(QosClass::CS1, 0.8)
    }
}

impl RuleEngine {
    /// Create an empty engine
    #[must_use]
    pub fn new(default_class: QosClass, confidence_threshold: f64) -> Self {
        Self {
            predefined: HashMap::new(),
            rules: Vec::new(),
            default_class,
            confidence_threshold,
        }
    }

    /// Build an engine from the `[qos]` settings
    ///
    /// Unknown class names and rules that fail validation are logged and
    /// skipped; rules disabled in configuration are not loaded.
    #[must_use]
    pub fn from_settings(settings: &QosSettings) -> Self {
        let mut engine = Self::new(settings.default_class, settings.confidence_threshold);

        for (class_name, class_settings) in &settings.classes {
            let Ok(class) = class_name.parse::<QosClass>() else {
                tracing::warn!(class = %class_name, "Invalid QoS class in configuration");
                continue;
            };
            for protocol in &class_settings.protocols {
                engine.add_predefined(protocol, class);
            }
        }

        for rule_settings in &settings.custom_rules {
            if !rule_settings.enabled {
                continue;
            }
            let rule = Rule::parse(
                rule_settings.name.clone(),
                &rule_settings.pattern,
                &rule_settings.class,
                rule_settings.priority,
            )
            .map(|r| r.with_description(rule_settings.description.clone()));

            match rule {
                Ok(rule) => engine.add_rule(rule),
                Err(e) => {
                    tracing::warn!(rule = %rule_settings.name, error = %e, "Skipping custom rule");
                }
            }
        }

        tracing::info!(
            predefined = engine.predefined.len(),
            rules = engine.rules.len(),
            default_class = %engine.default_class,
            "Rule engine ready"
        );

        engine
    }

    /// Add an exact-match entry (case-insensitive)
    pub fn add_predefined(&mut self, protocol: &str, class: QosClass) {
        self.predefined.insert(normalize_protocol(protocol), class);
    }

    /// Insert a rule, keeping ascending priority order
    ///
    /// Rules with equal priority keep insertion order.
    pub fn add_rule(&mut self, rule: Rule) {
        let position = self.rules.partition_point(|r| r.priority <= rule.priority);
        self.rules.insert(position, rule);
    }

    /// Classify a protocol name
    #[must_use]
    pub fn classify(&self, protocol: &str) -> Classification {
        let name = normalize_protocol(protocol);

        if let Some(class) = self.predefined.get(&name) {
            return Classification::new(
                name,
                *class,
                PREDEFINED_CONFIDENCE,
                ClassificationSource::Predefined,
            );
        }

        if let Some(rule) = self.rules.iter().find(|r| r.matches(&name)) {
            tracing::trace!(protocol = %name, rule = %rule.name, "Custom rule matched");
            return Classification::new(
                name,
                rule.class,
                CUSTOM_RULE_CONFIDENCE,
                ClassificationSource::CustomRule,
            );
        }

        self.default_for(name)
    }

    /// Default classification for a protocol
    #[must_use]
    pub fn default_for(&self, protocol: impl Into<String>) -> Classification {
        Classification::new(
            protocol,
            self.default_class,
            DEFAULT_CONFIDENCE,
            ClassificationSource::Default,
        )
    }

    /// Predefined table
    #[must_use]
    pub fn predefined(&self) -> &HashMap<String, QosClass> {
        &self.predefined
    }

    /// Custom rules in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Class returned when nothing matches
    #[must_use]
    pub fn default_class(&self) -> QosClass {
        self.default_class
    }

    /// Minimum confidence worth persisting
    #[must_use]
    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }
}
