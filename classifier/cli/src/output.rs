//! Result rendering
//!
//! Two formats: a numbered text report per class, and Cisco IOS-XE
//! `class-map` / `policy-map` configuration for ingress marking.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write};

use chrono::NaiveDate;
use classifier_core::qos::group_by_class;
use classifier_core::{Classification, QosClass};

/// Protocols per class-map; IOS-XE rejects longer `match-any` lists
pub const MAX_PROTOCOLS_PER_CLASS_MAP: usize = 16;

/// Name of the generated ingress policy
pub const INGRESS_POLICY: &str = "PM_MARK_AVC_WIRED_INGRESS";

/// Classes that get their own class-maps; CS1 is marked through class-default
const MARKED_CLASSES: [QosClass; 3] = [QosClass::EF, QosClass::AF41, QosClass::AF21];

/// Numbered protocol lists per class
///
/// # Errors
///
/// Only fails if formatting itself fails.
pub fn render_text(
    classifications: &HashMap<String, Classification>,
    date: NaiveDate,
) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_text(&mut out, classifications, date)?;
    Ok(out)
}

/// Class-maps of at most [`MAX_PROTOCOLS_PER_CLASS_MAP`] protocols, then the
/// ingress marking policy
///
/// # Errors
///
/// Only fails if formatting itself fails.
pub fn render_cisco(classifications: &HashMap<String, Classification>) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_cisco(&mut out, classifications)?;
    Ok(out)
}

fn write_text<W: Write>(
    out: &mut W,
    classifications: &HashMap<String, Classification>,
    date: NaiveDate,
) -> fmt::Result {
    let grouped = group_by_class(classifications);

    writeln!(out, "# NBAR Protocols Classified by QoS")?;
    writeln!(out, "# Generated on {}", date.format("%Y-%m-%d"))?;
    writeln!(out, "# For use with Cisco 9300 Switch\n")?;

    for class in QosClass::ALL {
        let Some(protocols) = grouped.get(&class).filter(|p| !p.is_empty()) else {
            continue;
        };
        writeln!(out, "## {class} - {}", class.description())?;
        for (i, protocol) in protocols.iter().enumerate() {
            writeln!(out, "{}. {protocol}", i + 1)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn write_cisco<W: Write>(out: &mut W, classifications: &HashMap<String, Classification>) -> fmt::Result {
    let grouped = group_by_class(classifications);

    let mut marked: Vec<(QosClass, Vec<String>)> = Vec::new();
    for class in [QosClass::EF, QosClass::AF41, QosClass::AF21, QosClass::CS1] {
        let names = write_class_maps(out, class, &grouped)?;
        if MARKED_CLASSES.contains(&class) {
            marked.push((class, names));
        }
    }

    writeln!(out, "! Ingress marking policy-map")?;
    writeln!(out, "policy-map {INGRESS_POLICY}")?;
    writeln!(
        out,
        " description Marks incoming traffic based on App (AVC) or VLAN fallback. CS1 traffic handled by class-default."
    )?;
    for (class, names) in &marked {
        for name in names {
            writeln!(out, " class {name}\n  set dscp {}", class.dscp())?;
        }
    }
    writeln!(out, " class class-default\n  set dscp {}\n!", QosClass::CS1.dscp())
}

/// Write the class-maps of one class, returning their names
fn write_class_maps<W: Write>(
    out: &mut W,
    class: QosClass,
    grouped: &BTreeMap<QosClass, Vec<String>>,
) -> Result<Vec<String>, fmt::Error> {
    let Some(protocols) = grouped.get(&class).filter(|p| !p.is_empty()) else {
        return Ok(Vec::new());
    };

    let base = format!("QOS_{class}");
    let total = protocols.len().div_ceil(MAX_PROTOCOLS_PER_CLASS_MAP);
    let mut names = Vec::with_capacity(total);

    for (i, chunk) in protocols.chunks(MAX_PROTOCOLS_PER_CLASS_MAP).enumerate() {
        let name = if total > 1 {
            format!("{base}_{}", i + 1)
        } else {
            base.clone()
        };
        writeln!(out, "class-map match-any {name}")?;
        writeln!(out, " description {}", class.description())?;
        for protocol in chunk {
            writeln!(out, " match protocol {protocol}")?;
        }
        writeln!(out, "!")?;
        names.push(name);
    }

    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use classifier_core::ClassificationSource;
    use pretty_assertions::assert_eq;

    fn sample(entries: &[(&str, QosClass)]) -> HashMap<String, Classification> {
        entries
            .iter()
            .map(|(name, class)| {
                (
                    (*name).to_string(),
                    Classification::new(*name, *class, 1.0, ClassificationSource::Predefined),
                )
            })
            .collect()
    }

    #[test]
    fn test_text_lists_classes_in_priority_order() {
        let classifications = sample(&[
            ("windows-update", QosClass::CS1),
            ("zoom", QosClass::EF),
            ("webex", QosClass::EF),
        ]);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let text = render_text(&classifications, date).unwrap();

        assert!(text.starts_with("# NBAR Protocols Classified by QoS\n# Generated on 2024-05-01\n"));
        let ef = text.find("## EF - ").unwrap();
        let cs1 = text.find("## CS1 - ").unwrap();
        assert!(ef < cs1);
        assert!(text.contains("1. webex\n2. zoom\n"));
        assert!(!text.contains("## AF41"));
    }

    #[test]
    fn test_cisco_single_class_map() {
        let config = render_cisco(&sample(&[("zoom", QosClass::EF), ("ssh", QosClass::AF21)])).unwrap();

        assert!(config.contains("class-map match-any QOS_EF\n"));
        assert!(config.contains(" match protocol zoom\n"));
        assert!(config.contains(" class QOS_EF\n  set dscp ef\n"));
        assert!(config.contains(" class QOS_AF21\n  set dscp af21\n"));
        assert!(!config.contains("QOS_AF41"));
        assert!(config.ends_with(" class class-default\n  set dscp cs1\n!\n"));
    }

    #[test]
    fn test_cisco_splits_long_class_maps() {
        let names: Vec<String> = (0..20).map(|i| format!("app{i:02}")).collect();
        let entries: Vec<(&str, QosClass)> =
            names.iter().map(|n| (n.as_str(), QosClass::AF41)).collect();
        let config = render_cisco(&sample(&entries)).unwrap();

        assert!(config.contains("class-map match-any QOS_AF41_1\n"));
        assert!(config.contains("class-map match-any QOS_AF41_2\n"));
        assert_eq!(config.matches(" match protocol ").count(), 20);

        let second = config.find("class-map match-any QOS_AF41_2").unwrap();
        assert_eq!(config[second..].matches(" match protocol ").count(), 4);
        assert!(config.contains(" class QOS_AF41_2\n  set dscp af41\n"));
    }

    #[test]
    fn test_cisco_background_only_uses_class_default() {
        let config = render_cisco(&sample(&[("windows-update", QosClass::CS1)])).unwrap();
        assert!(config.contains("class-map match-any QOS_CS1\n"));
        assert!(!config.contains(" class QOS_CS1\n"));
    }

    /// Accepts `budget` bytes, then refuses every write
    struct Truncating {
        budget: usize,
    }

    impl Write for Truncating {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            if s.len() > self.budget {
                return Err(fmt::Error);
            }
            self.budget -= s.len();
            Ok(())
        }
    }

    #[test]
    fn test_write_errors_propagate() {
        let classifications = sample(&[("zoom", QosClass::EF), ("ssh", QosClass::AF21)]);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        assert!(write_text(&mut Truncating { budget: 0 }, &classifications, date).is_err());
        assert!(write_text(&mut Truncating { budget: 64 }, &classifications, date).is_err());
        assert!(write_cisco(&mut Truncating { budget: 0 }, &classifications).is_err());
        assert!(write_cisco(&mut Truncating { budget: 120 }, &classifications).is_err());
    }
}
