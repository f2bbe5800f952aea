//! Unknown-key guard.
//!
//! Engine sections are `#[serde(default)]`, so a misspelt key such as
//! `risk.daily_los_limit_bps` deserializes cleanly and leaves the stock 2%
//! limit in force. The guard walks the merged document next to a schema
//! document (the serialized defaults of the typed config) and reports every
//! key the schema has no slot for, together with the keys that section does
//! accept.
//!
//! An unknown section is reported once at its own pointer, not once per leaf
//! beneath it. A schema slot that is not an object (a scalar, a list, a null
//! optional) accepts whatever the user puts there; typing rejects it later if
//! the shape is wrong. An empty schema object is an open map.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownKey {
    /// JSON pointer of the key, e.g. `/risk/daily_los_limit_bps`.
    pub pointer: String,
    /// Keys the enclosing section reads, sorted.
    pub expected: Vec<String>,
}

impl std::fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (expected one of: {})", self.pointer, self.expected.join(", "))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Depth-first, keys sorted within each section.
    pub unknown: Vec<UnknownKey>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unknown.is_empty()
    }

    pub fn pointers(&self) -> Vec<&str> {
        self.unknown.iter().map(|k| k.pointer.as_str()).collect()
    }
}

/// Compare `config` against `schema` and apply `policy` to what is left over.
pub fn report_unused_keys(
    config: &Value,
    schema: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let mut report = UnusedKeyReport::default();
    walk(config, schema, "", &mut report.unknown);

    if let Some(first) = report.unknown.first() {
        match policy {
            UnusedKeyPolicy::Fail => bail!(
                "CONFIG_UNUSED_KEYS: engine config does not read {} key(s); first: {}",
                report.unknown.len(),
                first
            ),
            UnusedKeyPolicy::Warn => {
                for key in &report.unknown {
                    tracing::warn!(
                        pointer = %key.pointer,
                        expected = %key.expected.join(","),
                        "CONFIG_UNUSED_KEYS: key is ignored, default stays in force"
                    );
                }
            }
        }
    }
    Ok(report)
}

fn walk(doc: &Value, schema: &Value, at: &str, out: &mut Vec<UnknownKey>) {
    let (Value::Object(doc), Value::Object(known)) = (doc, schema) else {
        return;
    };
    if known.is_empty() {
        return;
    }
    for (key, value) in doc {
        let pointer = format!("{at}/{}", key.replace('~', "~0").replace('/', "~1"));
        match known.get(key) {
            Some(slot) => walk(value, slot, &pointer, out),
            None => out.push(UnknownKey {
                pointer,
                expected: known.keys().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "risk": {"daily_loss_limit_bps": 200, "position_size_bps": 1000},
            "paths": {"state_dir": "state"},
            "tags": {},
            "universe": ["AAA"],
        })
    }

    #[test]
    fn unknown_section_is_reported_once_at_its_root() {
        let doc = json!({"riskk": {"a": 1, "b": {"c": 2}}});
        let report = report_unused_keys(&doc, &schema(), UnusedKeyPolicy::Warn).unwrap();
        assert_eq!(report.pointers(), vec!["/riskk"]);
        assert_eq!(report.unknown[0].expected, vec!["paths", "risk", "tags", "universe"]);
    }

    #[test]
    fn open_maps_and_non_object_slots_accept_anything() {
        let doc = json!({"tags": {"desk": "eq"}, "universe": {"odd": true}});
        let report = report_unused_keys(&doc, &schema(), UnusedKeyPolicy::Fail).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        let doc = json!({"paths": {"a/b": 1, "c~d": 2}});
        let report = report_unused_keys(&doc, &schema(), UnusedKeyPolicy::Warn).unwrap();
        assert_eq!(report.pointers(), vec!["/paths/a~1b", "/paths/c~0d"]);
    }
}
