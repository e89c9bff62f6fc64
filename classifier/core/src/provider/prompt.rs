//! Classification prompt
//!
//! The same instruction text is sent to every backend.

use std::fmt::Write;

/// System message sent before the classification prompt
pub const SYSTEM_PROMPT: &str = "You are an expert in network protocols and QoS classification.";

const CLASS_GUIDE: &str = "QoS Classes:
- EF: Real-time (voice/video calls)
- AF41: Business-critical (interactive apps)
- AF21: Important (email, transfers)
- CS1: Background (updates, browsing)

Respond ONLY with JSON array:
[{\"protocol\":\"name\",\"class\":\"CLASS\"}]";

/// Build the user prompt for one batch: a numbered protocol list followed by
/// the class descriptions and the expected answer format
#[must_use]
pub fn classification_prompt(protocols: &[String]) -> String {
    let mut prompt =
        String::from("Classify these network protocols into QoS classes for a Cisco 9300 switch:\n\n");
    for (i, protocol) in protocols.iter().enumerate() {
        // Writing to a String cannot fail.
        let _ = writeln!(prompt, "{}. {protocol}", i + 1);
    }
    prompt.push('\n');
    prompt.push_str(CLASS_GUIDE);
    prompt
}
