//! INI reader — parses `conaninfo.txt`-style documents: `[section]` headers
//! followed by `key=value` lines, with repeated keys preserved in order.
//!
//! Hand-rolled rather than built on the `ini` crate: that crate's
//! section→map model collapses repeated keys within a section, which
//! `conaninfo.txt`'s `[options]`/`[full_options]` sections rely on.

use crate::error::{CoreError, ErrorKind, Result};

/// One `key=value` occurrence within a section. Stored as a pair rather than
/// merged into a map so repeated keys and insertion order survive.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
}

/// One `[section]` block, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<Entry>,
}

/// A parsed INI-style document. Equality is structural: same sections in
/// the same order, same keys in the same order, same values — so a
/// parse-then-serialize round trip is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document. Fails with `InvalidIni` if a non-blank,
    /// non-comment line appears before any `[section]` header.
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = IniDocument::new();
        let mut current: Option<Section> = None;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                if let Some(section) = current.take() {
                    doc.sections.push(section);
                }
                current = Some(Section { name: name.trim().to_string(), entries: Vec::new() });
                continue;
            }

            let Some(section) = current.as_mut() else {
                return Err(CoreError::new(
                    ErrorKind::StoreFault,
                    format!("line outside any section: {raw_line:?}"),
                ));
            };

            let (key, value) = match line.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
                None => (line.to_string(), String::new()),
            };
            section.entries.push(Entry { key, value });
        }

        if let Some(section) = current.take() {
            doc.sections.push(section);
        }

        Ok(doc)
    }

    /// Serialize back to `[section]`/`key=value` text, preserving order.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for entry in &section.entries {
                if entry.value.is_empty() {
                    out.push_str(&entry.key);
                } else {
                    out.push_str(&entry.key);
                    out.push('=');
                    out.push_str(&entry.value);
                }
                out.push('\n');
            }
        }
        out
    }

    /// Section names, in source order.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|s| s.name.as_str())
    }

    fn find_section(&self, section: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == section)
    }

    /// Distinct key names within a section, in first-occurrence order.
    pub fn keys(&self, section: &str) -> Vec<&str> {
        let mut seen = Vec::new();
        if let Some(s) = self.find_section(section) {
            for entry in &s.entries {
                if !seen.contains(&entry.key.as_str()) {
                    seen.push(entry.key.as_str());
                }
            }
        }
        seen
    }

    /// The first value for `key` within `section`, if any.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.find_section(section)?.entries.iter().find(|e| e.key == key).map(|e| e.value.as_str())
    }

    /// Every value for `key` within `section`, in source order.
    pub fn all_values(&self, section: &str, key: &str) -> Vec<&str> {
        match self.find_section(section) {
            Some(s) => s.entries.iter().filter(|e| e.key == key).map(|e| e.value.as_str()).collect(),
            None => Vec::new(),
        }
    }

    pub fn as_string(&self, section: &str, key: &str, default: &str) -> String {
        self.get(section, key).unwrap_or(default).to_string()
    }

    pub fn as_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get(section, key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    pub fn as_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get(section, key) {
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// Render this document as a JSON object: one sub-object per section
    /// containing its key/value pairs (repeated keys keep the last value,
    /// matching how a JSON object necessarily collapses duplicates). Used
    /// by the binary-search handler to expose `conaninfo.txt`.
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut out = serde_json::Map::new();
        for section in &self.sections {
            let mut obj = serde_json::Map::new();
            for entry in &section.entries {
                obj.insert(entry.key.clone(), serde_json::Value::String(entry.value.clone()));
            }
            out.insert(section.name.clone(), serde_json::Value::Object(obj));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[settings]
    os=Linux
    arch=x86_64
[options]
    shared=False
    fPIC=True
[full_requires]
    zlib/1.2.11:6af9cc7cb931c5ad942174fd7838eb655717c709
[recipe_hash]
    7a6a3943e1ef65e3a9c6f0f0e7f3b1a2
";

    #[test]
    fn parses_sections_and_keys_in_order() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.sections().collect::<Vec<_>>(), vec!["settings", "options", "full_requires", "recipe_hash"]);
        assert_eq!(doc.get("settings", "os"), Some("Linux"));
        assert_eq!(doc.get("options", "fPIC"), Some("True"));
    }

    #[test]
    fn key_without_equals_has_empty_value() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.get("full_requires", "zlib/1.2.11:6af9cc7cb931c5ad942174fd7838eb655717c709"), Some(""));
    }

    #[test]
    fn repeated_keys_preserve_all_values_get_returns_first() {
        let text = "[options]\nshared=False\nshared=True\n";
        let doc = IniDocument::parse(text).unwrap();
        assert_eq!(doc.get("options", "shared"), Some("False"));
        assert_eq!(doc.all_values("options", "shared"), vec!["False", "True"]);
        assert_eq!(doc.keys("options"), vec!["shared"]);
    }

    #[test]
    fn typed_readers_use_defaults() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        assert_eq!(doc.as_bool("options", "fPIC", false), true);
        assert_eq!(doc.as_bool("options", "shared", true), false);
        assert_eq!(doc.as_int("settings", "missing", 42), 42);
        assert_eq!(doc.as_string("settings", "missing", "default"), "default");
    }

    #[test]
    fn round_trip_parse_serialize_parse_is_equal() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        let serialized = doc.serialize();
        let reparsed = IniDocument::parse(&serialized).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn rejects_line_outside_any_section() {
        let err = IniDocument::parse("stray=value\n[settings]\nos=Linux\n").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StoreFault);
    }

    #[test]
    fn blank_lines_and_comments_outside_sections_are_ok() {
        let doc = IniDocument::parse("\n; a comment\n# another\n[settings]\nos=Linux\n").unwrap();
        assert_eq!(doc.get("settings", "os"), Some("Linux"));
    }

    #[test]
    fn to_json_object_has_one_subobject_per_section() {
        let doc = IniDocument::parse(SAMPLE).unwrap();
        let obj = doc.to_json_object();
        assert!(obj.contains_key("settings"));
        assert!(obj.contains_key("options"));
        assert!(obj.get("settings").unwrap().get("os").is_some());
    }
}
