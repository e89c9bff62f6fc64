//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the classifier's production sources:
//! - No sleep() calls outside cancellable retry backoff
//! - No blocking file or network I/O inside async functions
//!
//! The helpers here load every production `.rs` file once, with anything
//! from the first `#[cfg(test)]` line onwards cut off.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["classifier/core/src", "classifier/cli/src"];

/// A production source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path of the file
    pub path: PathBuf,
    /// Lines before the test module
    pub lines: Vec<String>,
}

/// Where a line sits relative to the nearest enclosing function signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnContext {
    /// Inside an `async fn`
    Async,
    /// Inside a plain `fn`
    Sync,
    /// Not inside any function found by the scan
    None,
}

/// Workspace root, two levels above this crate
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Load every production source file
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        {
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            files.push(SourceFile {
                path: entry.path().to_path_buf(),
                lines: production_lines(&content),
            });
        }
    }

    files
}

/// Lines up to, not including, the first `#[cfg(test)]`
#[must_use]
pub fn production_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(str::to_string)
        .collect()
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether `line` is a function signature, and if so whether it is async
#[must_use]
pub fn fn_signature(line: &str) -> Option<bool> {
    let mut is_async = false;
    for token in code_part(line).split_whitespace() {
        match token {
            "async" => is_async = true,
            "fn" => return Some(is_async),
            t if t.starts_with("pub") => {}
            "const" | "unsafe" | "extern" => {}
            _ => return None,
        }
    }
    None
}

/// Scan backwards from `idx` to the nearest function signature
#[must_use]
pub fn enclosing_fn(lines: &[String], idx: usize) -> FnContext {
    for line in lines[..=idx].iter().rev() {
        match fn_signature(line) {
            Some(true) => return FnContext::Async,
            Some(false) => return FnContext::Sync,
            None => {}
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("mod ") || trimmed.starts_with("impl") {
            return FnContext::None;
        }
    }
    FnContext::None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_signature_detection() {
        assert_eq!(fn_signature("pub async fn load(&self) {"), Some(true));
        assert_eq!(fn_signature("    pub(crate) fn insert_entry("), Some(false));
        assert_eq!(fn_signature("fn main() {"), Some(false));
        assert_eq!(fn_signature("let f = move |x| x + 1;"), None);
        assert_eq!(fn_signature("// fn commented() {}"), None);
    }

    #[test]
    fn test_enclosing_fn() {
        let src = lines(&[
            "impl Store {",
            "    pub async fn save(&self) {",
            "        let raw = std::fs::read(path);",
            "    }",
            "    fn sync_helper() {",
            "        let raw = std::fs::read(path);",
            "    }",
            "}",
        ]);
        assert_eq!(enclosing_fn(&src, 2), FnContext::Async);
        assert_eq!(enclosing_fn(&src, 5), FnContext::Sync);
        assert_eq!(enclosing_fn(&src, 0), FnContext::None);
    }

    #[test]
    fn test_test_module_cut_off() {
        let src = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        assert_eq!(production_lines(src), vec!["fn a() {}", ""]);
    }
}
