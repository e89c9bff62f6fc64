//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async production code MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::io`, not `std::fs`, `std::net`.
//!
//! Blocking calls are acceptable in plain `fn`s that run before the runtime
//! does any work, such as reading the config file.

use architectural_enforcement::{code_part, enclosing_fn, production_sources, FnContext};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - `use std::fs` / `use std::net` imports in production code");
        eprintln!("  - std::fs::*, std::net::* inside async functions");
        eprintln!("  - std::io::stdin() / std::io::stdout() inside async functions");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::io::stdin() with AsyncReadExt");
        eprintln!("  - reqwest::Client::post().send().await");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            if let Some(kind) = blocking_io_kind(&file.lines, idx) {
                violations.push(format!(
                    "{}:{} - {kind}: {}",
                    file.path.display(),
                    idx + 1,
                    line.trim()
                ));
            }
        }
    }

    violations
}

/// Classify a line as a blocking I/O violation
fn blocking_io_kind(lines: &[String], idx: usize) -> Option<&'static str> {
    let code = code_part(&lines[idx]);
    let trimmed = code.trim_start();

    // Imports make every later call look harmless, so they are never allowed
    if trimmed.starts_with("use std::fs") || trimmed.starts_with("use std::net") {
        return Some("Blocking I/O import");
    }
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }

    if enclosing_fn(lines, idx) != FnContext::Async {
        return None;
    }
    if code.contains("std::fs::") {
        return Some("Blocking file I/O in async");
    }
    if code.contains("std::net::") {
        return Some("Blocking network I/O in async");
    }
    if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
        return Some("Blocking stdin/stdout in async");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_blocking_call_in_async_fn_detected() {
        let src = lines(&[
            "pub async fn load(&self) -> Result<usize, CacheError> {",
            "    let raw = std::fs::read(&self.settings.file_path)?;",
            "}",
        ]);
        assert_eq!(blocking_io_kind(&src, 1), Some("Blocking file I/O in async"));
    }

    #[test]
    fn test_blocking_call_in_sync_fn_allowed() {
        let src = lines(&[
            "fn read_config_file(path: &Path) -> Result<Option<String>, ConfigError> {",
            "    match std::fs::read_to_string(path) {",
        ]);
        assert_eq!(blocking_io_kind(&src, 1), None);
    }

    #[test]
    fn test_imports_rejected() {
        let src = lines(&["use std::fs;"]);
        assert_eq!(blocking_io_kind(&src, 0), Some("Blocking I/O import"));
    }

    #[test]
    fn test_async_io_allowed() {
        let src = lines(&[
            "async fn read_input(path: &Path) -> Result<String> {",
            "    tokio::fs::read_to_string(path).await",
        ]);
        assert_eq!(blocking_io_kind(&src, 1), None);
    }
}
