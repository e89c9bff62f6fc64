//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods.
//! **Exception**: retry backoff, where the sleep races a cancellation token
//! inside `tokio::select!` so shutdown is never delayed.
//!
//! Periodic work uses `tokio::time::interval()` instead.

use architectural_enforcement::{code_part, production_sources};

/// Lines around a sleep that are searched for the backoff markers
const CONTEXT_LINES: usize = 10;

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Retry backoff raced against `cancel.cancelled()` in tokio::select!");
        eprintln!("  - Test code (#[cfg(test)] modules and tests/ directories)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops (use tokio::time::interval)");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for file in production_sources() {
        for (idx, line) in file.lines.iter().enumerate() {
            let code = code_part(line);
            if !(code.contains("::sleep(") || code.contains(".sleep(")) {
                continue;
            }
            if is_cancellable_backoff(&file.lines, idx) {
                continue;
            }
            violations.push(format!(
                "{}:{} - Sleep call: {}",
                file.path.display(),
                idx + 1,
                line.trim()
            ));
        }
    }

    violations
}

/// A sleep is acceptable when the surrounding lines name backoff or retry
/// and race it against cancellation
fn is_cancellable_backoff(lines: &[String], idx: usize) -> bool {
    let start = idx.saturating_sub(CONTEXT_LINES);
    let end = (idx + CONTEXT_LINES + 1).min(lines.len());
    let window = lines[start..end].join("\n").to_lowercase();

    (window.contains("backoff") || window.contains("retry")) && window.contains("cancelled()")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_cancellable_backoff_allowed() {
        let src = lines(&[
            "tokio::select! {",
            "    () = cancel.cancelled() => return Err(RetryError::Cancelled),",
            "    () = tokio::time::sleep(backoff) => {}",
            "}",
        ]);
        assert!(is_cancellable_backoff(&src, 2));
    }

    #[test]
    fn test_plain_sleep_rejected() {
        let src = lines(&[
            "loop {",
            "    poll();",
            "    tokio::time::sleep(Duration::from_millis(100)).await;",
            "}",
        ]);
        assert!(!is_cancellable_backoff(&src, 2));
    }

    #[test]
    fn test_backoff_without_cancellation_rejected() {
        let src = lines(&["let backoff = policy.delay_for(n);", "tokio::time::sleep(backoff).await;"]);
        assert!(!is_cancellable_backoff(&src, 1));
    }
}
