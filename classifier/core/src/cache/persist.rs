//! Cache file persistence
//!
//! The whole map is written as one pretty-printed JSON object keyed by
//! protocol, optionally gzip-framed:
//!
//! ```text
//! {
//!   "zoom": {
//!     "classification": { "protocol": "zoom", "class": "EF", ... },
//!     "timestamp": 1718000000000000000,    // created_at, Unix ns
//!     "ttl": 86400000000000,               // ns
//!     "access_count": 3,
//!     "last_accessed": 1718000300000000000 // Unix ns
//!   }
//! }
//! ```
//!
//! Older files are a flat `{ "protocol": "CLASS" }` map; they are still
//! accepted on load and rewritten in the structured form on the next save.
//! Each entry is decoded on its own, so one bad entry only costs itself.

use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CacheEntry, CacheStore};
use crate::qos::{Classification, ClassificationSource, QosClass, QosError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Confidence given to entries read from the legacy format
const LEGACY_CONFIDENCE: f64 = 0.8;

/// Cache persistence errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing the cache file failed
    #[error("cache I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file is neither the structured nor the legacy format
    #[error("failed to decode cache file: {0}")]
    Decode(String),

    /// Serializing the cache failed
    #[error("failed to encode cache: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk form of one entry
#[derive(Debug, Serialize)]
struct StoredEntry {
    classification: Classification,
    timestamp: i64,
    ttl: i64,
    access_count: u64,
    last_accessed: i64,
}

impl StoredEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            classification: entry.classification().clone(),
            timestamp: super::unix_nanos(entry.created_at()),
            ttl: i64::try_from(entry.ttl().as_nanos()).unwrap_or(i64::MAX),
            access_count: entry.access_count(),
            last_accessed: entry.last_accessed_nanos(),
        }
    }
}

/// One structured entry as read back
///
/// Only the class is required. Other writers omit confidence, source and
/// timestamps when they are zero.
#[derive(Debug, Deserialize)]
struct LoadedEntry {
    classification: LoadedClassification,
    timestamp: Option<i64>,
    ttl: Option<i64>,
    #[serde(default)]
    access_count: u64,
    last_accessed: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LoadedClassification {
    protocol: Option<String>,
    class: String,
    confidence: Option<f64>,
    source: Option<serde_json::Value>,
    /// Unix seconds
    timestamp: Option<i64>,
}

impl LoadedEntry {
    fn into_entry(self, key: &str, default_ttl: Duration) -> Result<CacheEntry, EntryError> {
        let loaded = self.classification;
        let class = loaded.class.parse::<QosClass>()?;
        let source = loaded
            .source
            .and_then(|v| serde_json::from_value::<ClassificationSource>(v).ok())
            .unwrap_or(ClassificationSource::Cache);
        let protocol = loaded
            .protocol
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| key.to_string());

        let mut classification = Classification::new(
            protocol,
            class,
            loaded.confidence.unwrap_or(LEGACY_CONFIDENCE),
            source,
        );
        if let Some(at) = loaded.timestamp.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
            classification.observed_at = at;
        }

        let created_at = self
            .timestamp
            .map_or_else(Utc::now, DateTime::from_timestamp_nanos);
        let ttl = self.ttl.map_or(default_ttl, |ns| {
            Duration::from_nanos(u64::try_from(ns).unwrap_or(0))
        });
        let last_accessed = self
            .last_accessed
            .map_or(created_at, DateTime::from_timestamp_nanos);

        Ok(CacheEntry::restore(
            classification,
            created_at,
            ttl,
            self.access_count,
            last_accessed,
        ))
    }
}

/// Why a single entry was skipped on load
#[derive(Debug, Error)]
enum EntryError {
    #[error("malformed entry: {0}")]
    Shape(#[from] serde_json::Error),

    #[error(transparent)]
    Class(#[from] QosError),

    #[error("expected an object or a class name")]
    Unsupported,
}

/// Decode one value of the top-level map
///
/// Structured entries are objects; legacy entries are a bare class name.
fn decode_entry(
    key: &str,
    value: serde_json::Value,
    default_ttl: Duration,
) -> Result<(CacheEntry, bool), EntryError> {
    match value {
        serde_json::Value::String(class_str) => {
            let class = class_str.parse::<QosClass>()?;
            let classification =
                Classification::new(key, class, LEGACY_CONFIDENCE, ClassificationSource::Cache);
            Ok((CacheEntry::new(classification, default_ttl), true))
        }
        value @ serde_json::Value::Object(_) => {
            let loaded: LoadedEntry = serde_json::from_value(value)?;
            Ok((loaded.into_entry(key, default_ttl)?, false))
        }
        _ => Err(EntryError::Unsupported),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Strip gzip framing if present, whatever the compression setting says
fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>, std::io::Error> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut decoded = Vec::new();
    GzDecoder::new(bytes.as_slice()).read_to_end(&mut decoded)?;
    Ok(decoded)
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn decode(bytes: &[u8]) -> Result<HashMap<String, serde_json::Value>, CacheError> {
    serde_json::from_slice(bytes).map_err(|e| CacheError::Decode(e.to_string()))
}

impl CacheStore {
    /// Load entries from the cache file, returning how many were loaded
    ///
    /// A missing file is an empty cache, not an error. Loaded entries are
    /// merged into whatever the store already holds.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file exists but cannot be read and
    /// [`CacheError::Decode`] if it is not a JSON object. Entries that fail
    /// to decode on their own are logged and skipped.
    pub async fn load(&self) -> Result<usize, CacheError> {
        let path = self.settings.file_path.clone();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No cache file, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(io_error(&path, e)),
        };

        let bytes = decompress(bytes).map_err(|e| io_error(&path, e))?;

        let mut loaded = 0;
        let mut legacy = 0;
        for (key, value) in decode(&bytes)? {
            match decode_entry(&key, value, self.settings.ttl) {
                Ok((entry, is_legacy)) => {
                    self.insert_entry(key, entry);
                    loaded += 1;
                    if is_legacy {
                        legacy += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(protocol = %key, error = %e, "Skipping unreadable cache entry");
                }
            }
        }
        if legacy > 0 {
            tracing::info!(
                path = %path.display(),
                entries = legacy,
                "Converted legacy cache entries"
            );
        }

        tracing::info!(path = %path.display(), entries = loaded, "Cache loaded");
        Ok(loaded)
    }

    /// Write every entry to the cache file, returning how many were written
    ///
    /// When a backup path is configured and the file already exists it is
    /// copied there first; a failed backup is logged and the save goes on.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Encode`] if serialization fails and
    /// [`CacheError::Io`] if the file cannot be written.
    pub async fn save(&self) -> Result<usize, CacheError> {
        let snapshot: BTreeMap<String, StoredEntry> = self.with_entries(|entries| {
            entries
                .iter()
                .map(|(key, entry)| (key.clone(), StoredEntry::from_entry(entry)))
                .collect()
        });
        let count = snapshot.len();

        let mut bytes = serde_json::to_vec_pretty(&snapshot)?;
        if self.settings.compression {
            bytes = compress(&bytes).map_err(|e| io_error(&self.settings.file_path, e))?;
        }

        let path = &self.settings.file_path;
        if let Some(backup) = &self.settings.backup_path {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                if let Err(e) = tokio::fs::copy(path, backup).await {
                    tracing::warn!(
                        backup = %backup.display(),
                        error = %e,
                        "Failed to back up cache file"
                    );
                }
            }
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| io_error(path, e))?;

        tracing::info!(
            path = %path.display(),
            entries = count,
            compressed = self.settings.compression,
            "Cache saved"
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn settings(dir: &TempDir, file: &str) -> CacheSettings {
        CacheSettings::default().with_file_path(dir.path().join(file))
    }

    fn seeded(settings: CacheSettings) -> CacheStore {
        let cache = CacheStore::new(settings);
        cache.set(
            "zoom",
            Classification::new("zoom", QosClass::EF, 0.95, ClassificationSource::Ai),
        );
        cache.set(
            "ssh",
            Classification::new("ssh", QosClass::AF21, 1.0, ClassificationSource::Predefined),
        );
        cache
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_cache() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(settings(&dir, "absent.json"));
        assert_eq!(cache.load().await.unwrap(), 0);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_save_and_load_plain() {
        let dir = TempDir::new().unwrap();
        let original = seeded(settings(&dir, "cache.json"));
        original.get("zoom");
        assert_eq!(original.save().await.unwrap(), 2);

        let raw = std::fs::read_to_string(dir.path().join("cache.json")).unwrap();
        assert!(raw.contains("\"access_count\": 1"));

        let restored = CacheStore::new(settings(&dir, "cache.json"));
        assert_eq!(restored.load().await.unwrap(), 2);
        let zoom = restored.get("zoom").unwrap();
        assert_eq!(zoom.class, QosClass::EF);
        assert_eq!(zoom.source, ClassificationSource::Ai);
        assert!((zoom.confidence - 0.95).abs() < f64::EPSILON);
        let ssh = restored.get("ssh").unwrap();
        assert_eq!(ssh.source, ClassificationSource::Predefined);
        assert!((ssh.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_save_and_load_gzip() {
        let dir = TempDir::new().unwrap();
        let original = seeded(settings(&dir, "cache.json.gz").with_compression(true));
        original.save().await.unwrap();

        let raw = std::fs::read(dir.path().join("cache.json.gz")).unwrap();
        assert_eq!(&raw[..2], &GZIP_MAGIC);

        // Detection is by content, not by the compression flag.
        let restored = CacheStore::new(settings(&dir, "cache.json.gz"));
        assert_eq!(restored.load().await.unwrap(), 2);
        let ssh = restored.get("ssh").unwrap();
        assert_eq!(ssh.class, QosClass::AF21);
        assert_eq!(ssh.source, ClassificationSource::Predefined);
        let zoom = restored.get("zoom").unwrap();
        assert_eq!(zoom.source, ClassificationSource::Ai);
        assert!((zoom.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_plain_file_loads_with_compression_enabled() {
        let dir = TempDir::new().unwrap();
        seeded(settings(&dir, "cache.json")).save().await.unwrap();

        let restored = CacheStore::new(settings(&dir, "cache.json").with_compression(true));
        assert_eq!(restored.load().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_legacy_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.json");
        std::fs::write(&path, r#"{"zoom": "EF", "webex": "af41", "weird": "PURPLE"}"#).unwrap();

        let cache = CacheStore::new(
            settings(&dir, "legacy.json").with_ttl(Duration::from_secs(3600)),
        );
        assert_eq!(cache.load().await.unwrap(), 2);

        let webex = cache.get("webex").unwrap();
        assert_eq!(webex.class, QosClass::AF41);
        assert_eq!(webex.source, ClassificationSource::Cache);
        assert!((webex.confidence - LEGACY_CONFIDENCE).abs() < f64::EPSILON);
        assert!(!cache.exists("weird"));

        let ttl = cache.with_entries(|entries| entries["zoom"].ttl());
        assert_eq!(ttl, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_load_entries_with_omitted_fields() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now().timestamp_nanos_opt().unwrap();
        let contents = format!(
            r#"{{
                "zoom": {{
                    "classification": {{"protocol": "zoom", "class": "EF", "confidence": 0.95, "source": "ai", "timestamp": 1718000000}},
                    "timestamp": {now}, "ttl": 3600000000000, "access_count": 2, "last_accessed": {now}
                }},
                "webex": {{
                    "classification": {{"protocol": "webex", "class": "AF41"}},
                    "timestamp": {now}, "ttl": 3600000000000, "access_count": 0, "last_accessed": {now}
                }},
                "git": {{"classification": {{"class": "AF21", "source": "mystery"}}}}
            }}"#
        );
        std::fs::write(dir.path().join("cache.json"), contents).unwrap();

        let cache = CacheStore::new(settings(&dir, "cache.json"));
        assert_eq!(cache.load().await.unwrap(), 3);

        let zoom = cache.get("zoom").unwrap();
        assert!((zoom.confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(zoom.observed_at.timestamp(), 1_718_000_000);

        let webex = cache.get("webex").unwrap();
        assert_eq!(webex.class, QosClass::AF41);
        assert_eq!(webex.source, ClassificationSource::Cache);
        assert!((webex.confidence - LEGACY_CONFIDENCE).abs() < f64::EPSILON);

        let git = cache.get("git").unwrap();
        assert_eq!(git.protocol, "git");
        assert_eq!(git.source, ClassificationSource::Cache);
        let ttl = cache.with_entries(|entries| entries["git"].ttl());
        assert_eq!(ttl, cache.settings().ttl);
    }

    #[tokio::test]
    async fn test_bad_entry_does_not_drop_the_rest() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now().timestamp_nanos_opt().unwrap();
        let contents = format!(
            r#"{{
                "zoom": {{
                    "classification": {{"protocol": "zoom", "class": "EF", "confidence": 0.9, "source": "ai"}},
                    "timestamp": {now}, "ttl": 0, "access_count": 0, "last_accessed": {now}
                }},
                "weird": {{
                    "classification": {{"protocol": "weird", "class": "PURPLE", "confidence": 0.9, "source": "ai"}},
                    "timestamp": {now}, "ttl": 0, "access_count": 0, "last_accessed": {now}
                }},
                "broken": {{"classification": 42}},
                "number": 7,
                "ssh": "AF21"
            }}"#
        );
        std::fs::write(dir.path().join("cache.json"), contents).unwrap();

        let cache = CacheStore::new(settings(&dir, "cache.json"));
        assert_eq!(cache.load().await.unwrap(), 2);
        assert_eq!(cache.get("zoom").unwrap().class, QosClass::EF);
        assert_eq!(cache.get("ssh").unwrap().class, QosClass::AF21);
        assert!(!cache.exists("weird"));
        assert!(!cache.exists("broken"));
        assert!(!cache.exists("number"));
    }

    #[tokio::test]
    async fn test_load_garbage_is_decode_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad.json"), "not json at all").unwrap();

        let cache = CacheStore::new(settings(&dir, "bad.json"));
        assert!(matches!(cache.load().await, Err(CacheError::Decode(_))));
    }

    #[tokio::test]
    async fn test_save_writes_backup() {
        let dir = TempDir::new().unwrap();
        let backup = dir.path().join("cache.bak");
        let cache = seeded(settings(&dir, "cache.json").with_backup_path(&backup));

        cache.save().await.unwrap();
        assert!(!backup.exists(), "nothing to back up on first save");

        cache.delete("ssh");
        cache.save().await.unwrap();

        let previous = std::fs::read_to_string(&backup).unwrap();
        assert!(previous.contains("\"ssh\""));
        let current = std::fs::read_to_string(dir.path().join("cache.json")).unwrap();
        assert!(!current.contains("\"ssh\""));
    }

    #[tokio::test]
    async fn test_expired_entries_stay_expired_after_reload() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(settings(&dir, "cache.json"));
        let created = Utc::now() - chrono::Duration::hours(2);
        cache.insert_entry(
            "old".into(),
            CacheEntry::restore(
                Classification::new("old", QosClass::CS1, 0.9, ClassificationSource::Ai),
                created,
                Duration::from_secs(3600),
                0,
                created,
            ),
        );
        cache.save().await.unwrap();

        let restored = CacheStore::new(settings(&dir, "cache.json"));
        restored.load().await.unwrap();
        assert_eq!(restored.expired_keys(), vec!["old".to_string()]);
    }
}
