//! Protocol list parsing

use classifier_core::qos::{normalize_protocol, validate_protocol_name};

/// Parse a protocol list: one name per line
///
/// Blank lines and `#` / `//` comments are skipped, invalid names are logged
/// and dropped, and the rest is lower-cased in file order.
pub fn parse_protocol_list(contents: &str) -> Vec<String> {
    let mut protocols = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let name = normalize_protocol(line);
        match validate_protocol_name(&name) {
            Ok(()) => protocols.push(name),
            Err(e) => {
                tracing::warn!(line = index + 1, protocol = %line, error = %e, "Skipping invalid protocol");
            }
        }
    }

    protocols
}
