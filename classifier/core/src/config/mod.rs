//! TOML Configuration File Support
//!
//! Loads the classifier configuration from
//! `~/.config/nbar-classifier/config.toml` (or an explicit path).
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments, through [`ConfigOverrides`]
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [app]
//! batch_size = 25
//!
//! [ai]
//! provider = "deepseek"
//! api_key = "sk-..."
//! model = "deepseek-reasoner"
//!
//! [ai.rate_limit]
//! requests_per_minute = 60
//! burst_size = 10
//! backoff_strategy = "exponential"
//!
//! [[ai.fallback]]
//! provider = "openai"
//! enabled = true
//!
//! [ai.providers.openai]
//! api_key = "sk-..."
//! model = "gpt-4o-mini"
//!
//! [qos]
//! default_class = "CS1"
//! confidence_threshold = 0.8
//!
//! [qos.classes.EF]
//! protocols = ["rtp", "sip", "webex-media"]
//!
//! [[qos.custom_rules]]
//! name = "voice"
//! pattern = "^(rtp|voip)-"
//! class = "EF"
//! priority = 1
//!
//! [cache]
//! ttl_secs = 86400
//! file_path = "protocol_classifications_cache.json"
//! compression = true
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheSettings;
use crate::qos::QosClass;
use crate::resilience::BackoffStrategy;

/// Environment variable names read by [`load_config`]
pub mod env {
    /// Primary provider name
    pub const AI_PROVIDER: &str = "NBAR_AI_PROVIDER";
    /// Primary provider API key
    pub const AI_API_KEY: &str = "NBAR_AI_API_KEY";
    /// Accepted when [`AI_API_KEY`] is unset
    pub const DEEPSEEK_API_KEY: &str = "DEEPSEEK_API_KEY";
    /// Primary provider model
    pub const AI_MODEL: &str = "NBAR_AI_MODEL";
    /// Protocols per AI request
    pub const BATCH_SIZE: &str = "NBAR_BATCH_SIZE";
    /// Cache file path
    pub const CACHE_FILE: &str = "NBAR_CACHE_FILE";
    /// Cache TTL in seconds
    pub const CACHE_TTL: &str = "NBAR_CACHE_TTL";
    /// Default QoS class
    pub const DEFAULT_CLASS: &str = "NBAR_DEFAULT_CLASS";
    /// Requests per minute
    pub const RATE_LIMIT_RPM: &str = "NBAR_RATE_LIMIT_RPM";
    /// Token bucket capacity
    pub const RATE_LIMIT_BURST: &str = "NBAR_RATE_LIMIT_BURST";

    /// Every variable above
    pub const ALL: &[&str] = &[
        AI_PROVIDER,
        AI_API_KEY,
        DEEPSEEK_API_KEY,
        AI_MODEL,
        BATCH_SIZE,
        CACHE_FILE,
        CACHE_TTL,
        DEFAULT_CLASS,
        RATE_LIMIT_RPM,
        RATE_LIMIT_BURST,
    ];
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// `[app]` settings
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Protocols per AI request
    pub batch_size: usize,
    /// Overall timeout for one run
    pub timeout: Duration,
    /// Attempts per provider call, including the first
    pub max_retries: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            timeout: Duration::from_secs(90),
            max_retries: 3,
        }
    }
}

/// `[ai.providers.<name>]` section; every value overrides the `[ai]` one
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// API key
    pub api_key: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Completion token limit
    pub max_tokens: Option<u32>,
    /// API base URL
    pub base_url: Option<String>,
}

/// One `[[ai.fallback]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackSettings {
    /// Provider name
    pub provider: String,
    /// Whether the fallback is tried
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// `[ai.rate_limit]` settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Steady-state rate
    pub requests_per_minute: u32,
    /// Token bucket capacity
    pub burst_size: u32,
    /// Retry delay growth
    pub backoff_strategy: BackoffStrategy,
    /// Cap on a single retry delay
    pub max_backoff: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
            backoff_strategy: BackoffStrategy::Exponential,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// `[ai.circuit_breaker]` settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    /// Whether providers are wrapped in a breaker
    pub enabled: bool,
    /// Consecutive failures before opening
    pub max_failures: u32,
    /// Open duration before a probe
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// `[ai]` settings
#[derive(Clone, Debug, PartialEq)]
pub struct AiSettings {
    /// Primary provider name
    pub provider: String,
    /// Primary API key
    pub api_key: String,
    /// Primary model
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Completion token limit
    pub max_tokens: u32,
    /// HTTP request timeout
    pub timeout: Duration,
    /// Rate limiting
    pub rate_limit: RateLimitSettings,
    /// Per-provider circuit breakers
    pub circuit_breaker: CircuitBreakerSettings,
    /// Ordered fallbacks
    pub fallback: Vec<FallbackSettings>,
    /// Provider-specific sections
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            api_key: String::new(),
            model: "deepseek-reasoner".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
            timeout: Duration::from_secs(90),
            rate_limit: RateLimitSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            fallback: Vec::new(),
            providers: BTreeMap::new(),
        }
    }
}

/// `[qos.classes.<CLASS>]` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosClassSettings {
    /// Protocols predefined to this class
    pub protocols: Vec<String>,
}

/// One `[[qos.custom_rules]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRuleSettings {
    /// Rule name
    pub name: String,
    /// Regular expression matched against the lower-case protocol name
    pub pattern: String,
    /// Class token
    pub class: String,
    /// Evaluation order, lower first
    pub priority: u32,
    /// Whether the rule is loaded
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// `[qos]` settings
#[derive(Clone, Debug, PartialEq)]
pub struct QosSettings {
    /// Class for anything no layer could classify
    pub default_class: QosClass,
    /// Minimum confidence for an AI answer to be cached
    pub confidence_threshold: f64,
    /// Predefined protocols, keyed by class token
    pub classes: BTreeMap<String, QosClassSettings>,
    /// Custom rules
    pub custom_rules: Vec<CustomRuleSettings>,
}

impl Default for QosSettings {
    fn default() -> Self {
        Self {
            default_class: QosClass::CS1,
            confidence_threshold: 0.8,
            classes: BTreeMap::new(),
            custom_rules: Vec::new(),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// App section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppToml {
    /// Protocols per AI request
    pub batch_size: Option<usize>,
    /// Run timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Attempts per provider call
    pub max_retries: Option<u32>,
}

/// Rate limit subsection of the AI section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitToml {
    /// Steady-state rate
    pub requests_per_minute: Option<u32>,
    /// Token bucket capacity
    pub burst_size: Option<u32>,
    /// `exponential` or `linear`
    pub backoff_strategy: Option<String>,
    /// Cap on a single retry delay in seconds
    pub max_backoff_secs: Option<u64>,
}

/// Circuit breaker subsection of the AI section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerToml {
    /// Whether breakers are used
    pub enabled: Option<bool>,
    /// Consecutive failures before opening
    pub max_failures: Option<u32>,
    /// Open duration in seconds
    pub reset_timeout_secs: Option<u64>,
}

/// AI section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiToml {
    /// Primary provider name
    pub provider: Option<String>,
    /// Primary API key
    pub api_key: Option<String>,
    /// Primary model
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Completion token limit
    pub max_tokens: Option<u32>,
    /// HTTP timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Rate limiting
    pub rate_limit: RateLimitToml,
    /// Circuit breakers
    pub circuit_breaker: CircuitBreakerToml,
    /// Ordered fallbacks
    pub fallback: Vec<FallbackSettings>,
    /// Provider-specific sections
    pub providers: BTreeMap<String, ProviderSettings>,
}

/// QoS section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QosToml {
    /// Default class token
    pub default_class: Option<String>,
    /// Cache write-back threshold
    pub confidence_threshold: Option<f64>,
    /// Predefined protocols per class
    pub classes: BTreeMap<String, QosClassSettings>,
    /// Custom rules
    pub custom_rules: Vec<CustomRuleSettings>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Whether the cache is used
    pub enabled: Option<bool>,
    /// Entry lifetime in seconds (0 = forever)
    pub ttl_secs: Option<u64>,
    /// Capacity (0 = unbounded)
    pub max_size: Option<usize>,
    /// Cache file
    pub file_path: Option<String>,
    /// Gzip on save
    pub compression: Option<bool>,
    /// Backup copy path
    pub backup_path: Option<String>,
    /// Background cleanup period in seconds
    pub cleanup_interval_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierToml {
    /// App section
    pub app: AppToml,
    /// AI section
    pub ai: AiToml,
    /// QoS section
    pub qos: QosToml,
    /// Cache section
    pub cache: CacheToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Fully defaulted classifier configuration
///
/// Use [`load_config`] to build one with proper priority handling.
#[derive(Clone, Debug)]
pub struct ClassifierConfig {
    /// `[app]`
    pub app: AppSettings,
    /// `[ai]`
    pub ai: AiSettings,
    /// `[qos]`
    pub qos: QosSettings,
    /// `[cache]`
    pub cache: CacheSettings,
    /// Path to the config file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            app: AppSettings::default(),
            ai: AiSettings::default(),
            qos: QosSettings::default(),
            cache: CacheSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClassifierConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first value
    /// that is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if !(1..=100).contains(&self.app.batch_size) {
            return invalid(format!(
                "batch_size must be between 1 and 100, got {}",
                self.app.batch_size
            ));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return invalid(format!(
                "temperature must be between 0 and 2, got {}",
                self.ai.temperature
            ));
        }
        if !(0.0..=1.0).contains(&self.qos.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be between 0 and 1, got {}",
                self.qos.confidence_threshold
            ));
        }
        if self.ai.rate_limit.requests_per_minute == 0 {
            return invalid("requests_per_minute must be positive".to_string());
        }
        if self.ai.rate_limit.burst_size == 0 {
            return invalid("burst_size must be positive".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/nbar-classifier/config.toml` or the platform
/// equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("nbar-classifier").join("config.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] afterwards.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if a
/// value is out of range. A missing config file is not an error.
pub fn load_config() -> Result<ClassifierConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the result fails [`ClassifierConfig::validate`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClassifierConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration reading environment values through `lookup`
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(
    path: Option<PathBuf>,
    lookup: F,
) -> Result<ClassifierConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClassifierConfig::default();

    if let Some(config_path) = path {
        match read_config_file(&config_path)? {
            Some(toml_content) => {
                let toml_config: ClassifierToml = toml::from_str(&toml_content)?;
                apply_toml_config(&mut config, toml_config)?;
                tracing::info!(
                    path = %config_path.display(),
                    "Loaded configuration from file"
                );
                config.config_file_path = Some(config_path);
                config.source = ConfigSource::File;
            }
            None => {
                tracing::debug!(
                    path = %config_path.display(),
                    "Config file not found, using defaults"
                );
            }
        }
    }

    apply_env_config(&mut config, lookup);
    config.validate()?;

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

fn parse_class(token: &str) -> Result<QosClass, ConfigError> {
    token
        .parse::<QosClass>()
        .map_err(|_| ConfigError::ValidationError(format!("unknown default_class: {token}")))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClassifierConfig, toml: ClassifierToml) -> Result<(), ConfigError> {
    // App settings
    if let Some(batch_size) = toml.app.batch_size {
        config.app.batch_size = batch_size;
    }
    if let Some(secs) = toml.app.timeout_secs {
        config.app.timeout = Duration::from_secs(secs);
    }
    if let Some(retries) = toml.app.max_retries {
        config.app.max_retries = retries;
    }

    // AI settings
    let ai = toml.ai;
    if let Some(provider) = ai.provider {
        config.ai.provider = provider.to_lowercase();
    }
    if let Some(key) = ai.api_key {
        config.ai.api_key = key;
    }
    if let Some(model) = ai.model {
        config.ai.model = model;
    }
    if let Some(temperature) = ai.temperature {
        config.ai.temperature = temperature;
    }
    if let Some(max_tokens) = ai.max_tokens {
        config.ai.max_tokens = max_tokens;
    }
    if let Some(secs) = ai.timeout_secs {
        config.ai.timeout = Duration::from_secs(secs);
    }
    if let Some(rpm) = ai.rate_limit.requests_per_minute {
        config.ai.rate_limit.requests_per_minute = rpm;
    }
    if let Some(burst) = ai.rate_limit.burst_size {
        config.ai.rate_limit.burst_size = burst;
    }
    if let Some(strategy) = ai.rate_limit.backoff_strategy {
        config.ai.rate_limit.backoff_strategy =
            strategy.parse().map_err(ConfigError::ValidationError)?;
    }
    if let Some(secs) = ai.rate_limit.max_backoff_secs {
        config.ai.rate_limit.max_backoff = Duration::from_secs(secs);
    }
    if let Some(enabled) = ai.circuit_breaker.enabled {
        config.ai.circuit_breaker.enabled = enabled;
    }
    if let Some(max) = ai.circuit_breaker.max_failures {
        config.ai.circuit_breaker.max_failures = max;
    }
    if let Some(secs) = ai.circuit_breaker.reset_timeout_secs {
        config.ai.circuit_breaker.reset_timeout = Duration::from_secs(secs);
    }
    config.ai.fallback = ai.fallback;
    config.ai.providers = ai
        .providers
        .into_iter()
        .map(|(name, settings)| (name.to_lowercase(), settings))
        .collect();

    // QoS settings
    if let Some(class) = toml.qos.default_class {
        config.qos.default_class = parse_class(&class)?;
    }
    if let Some(threshold) = toml.qos.confidence_threshold {
        config.qos.confidence_threshold = threshold;
    }
    config.qos.classes = toml.qos.classes;
    config.qos.custom_rules = toml.qos.custom_rules;

    // Cache settings
    let cache = toml.cache;
    if let Some(enabled) = cache.enabled {
        config.cache.enabled = enabled;
    }
    if let Some(secs) = cache.ttl_secs {
        config.cache.ttl = Duration::from_secs(secs);
    }
    if let Some(max_size) = cache.max_size {
        config.cache.max_size = max_size;
    }
    if let Some(path) = cache.file_path {
        config.cache.file_path = PathBuf::from(path);
    }
    if let Some(compression) = cache.compression {
        config.cache.compression = compression;
    }
    if let Some(path) = cache.backup_path {
        config.cache.backup_path = Some(PathBuf::from(path));
    }
    if let Some(secs) = cache.cleanup_interval_secs {
        config.cache.cleanup_interval = Duration::from_secs(secs);
    }

    Ok(())
}

/// Apply environment variable overrides to the config
///
/// Values that fail to parse are ignored with a warning.
fn apply_env_config<F>(config: &mut ClassifierConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let parsed = value.trim().parse().ok();
        if parsed.is_none() {
            tracing::warn!(var = key, value = %value, "Ignoring unparsable environment value");
        }
        parsed
    }

    if let Some(provider) = lookup(env::AI_PROVIDER) {
        config.ai.provider = provider.to_lowercase();
        config.source = ConfigSource::Env;
    }
    if let Some(key) = lookup(env::AI_API_KEY).or_else(|| lookup(env::DEEPSEEK_API_KEY)) {
        config.ai.api_key = key;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup(env::AI_MODEL) {
        config.ai.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = lookup(env::BATCH_SIZE) {
        if let Some(batch_size) = parsed(env::BATCH_SIZE, &value) {
            config.app.batch_size = batch_size;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(path) = lookup(env::CACHE_FILE) {
        config.cache.file_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
    if let Some(value) = lookup(env::CACHE_TTL) {
        if let Some(secs) = parsed(env::CACHE_TTL, &value) {
            config.cache.ttl = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = lookup(env::DEFAULT_CLASS) {
        if let Some(class) = parsed(env::DEFAULT_CLASS, &value) {
            config.qos.default_class = class;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = lookup(env::RATE_LIMIT_RPM) {
        if let Some(rpm) = parsed(env::RATE_LIMIT_RPM, &value) {
            config.ai.rate_limit.requests_per_minute = rpm;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(value) = lookup(env::RATE_LIMIT_BURST) {
        if let Some(burst) = parsed(env::RATE_LIMIT_BURST, &value) {
            config.ai.rate_limit.burst_size = burst;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Batch size override
    pub batch_size: Option<usize>,

    /// Cache enabled override
    pub cache_enabled: Option<bool>,

    /// Cache file override
    pub cache_file: Option<PathBuf>,

    /// Primary provider override
    pub provider: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set batch size override
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set cache enabled override
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Set cache file override
    #[must_use]
    pub fn with_cache_file(mut self, path: PathBuf) -> Self {
        self.cache_file = Some(path);
        self
    }

    /// Set primary provider override
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch_size.is_none()
            && self.cache_enabled.is_none()
            && self.cache_file.is_none()
            && self.provider.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is out of
    /// range.
    pub fn apply(&self, config: &mut ClassifierConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(batch_size) = self.batch_size {
            config.app.batch_size = batch_size;
        }
        if let Some(enabled) = self.cache_enabled {
            config.cache.enabled = enabled;
        }
        if let Some(ref path) = self.cache_file {
            config.cache.file_path = path.clone();
        }
        if let Some(ref provider) = self.provider {
            config.ai.provider = provider.to_lowercase();
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
