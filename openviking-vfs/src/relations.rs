//! Per-directory relation tables (`.relations.json`).
//!
//! A flat, denormalized list of `{id, uris, reason, created_at}` entries.
//! Read lazily, written back whole. A legacy nested form
//! `{namespace: {user: [entries]}}` is flattened on read. Consumers must
//! tolerate dangling URIs; they are filtered by access control on read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use openviking_core::{Result, VikingError};

/// File name of the relation table inside a directory.
pub const RELATIONS_FILE: &str = ".relations.json";

/// One relation entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEntry {
    pub id: String,
    pub uris: Vec<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub created_at: String,
}

/// Parse a relation table, accepting the flat and the legacy nested forms.
pub fn parse_relation_table(raw: &[u8]) -> Result<Vec<RelationEntry>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_slice(raw)?;
    match value {
        Value::Array(_) => Ok(serde_json::from_value(value)?),
        Value::Object(namespaces) => {
            let mut entries = Vec::new();
            for namespace in namespaces.values() {
                let Some(groups) = namespace.as_object() else {
                    continue;
                };
                for group in groups.values() {
                    if let Ok(mut parsed) =
                        serde_json::from_value::<Vec<RelationEntry>>(group.clone())
                    {
                        entries.append(&mut parsed);
                    }
                }
            }
            Ok(entries)
        }
        _ => Err(VikingError::schema("relation table must be a JSON array")),
    }
}

/// Serialize a relation table in the flat form.
pub fn serialize_relation_table(entries: &[RelationEntry]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(entries)?)
}

/// Allocate the next link id: `link_{N}` with the smallest positive free N.
pub fn next_link_id(entries: &[RelationEntry]) -> String {
    let used: std::collections::HashSet<u64> = entries
        .iter()
        .filter_map(|e| e.id.strip_prefix("link_")?.parse().ok())
        .collect();
    let mut n = 1;
    while used.contains(&n) {
        n += 1;
    }
    format!("link_{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, uris: &[&str]) -> RelationEntry {
        RelationEntry {
            id: id.to_string(),
            uris: uris.iter().map(|s| s.to_string()).collect(),
            reason: String::new(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_flat_round_trip() {
        let entries = vec![entry("link_1", &["viking://resources/a.md"])];
        let raw = serialize_relation_table(&entries).unwrap();
        assert_eq!(parse_relation_table(&raw).unwrap(), entries);
    }

    #[test]
    fn test_empty_and_missing() {
        assert!(parse_relation_table(b"").unwrap().is_empty());
        assert!(parse_relation_table(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_legacy_nested_form_flattened() {
        let raw = br#"{
            "resources": {
                "user": [
                    {"id": "link_1", "uris": ["viking://resources/a.md"], "reason": "r", "created_at": "2026-01-01T00:00:00Z"}
                ],
                "agent": [
                    {"id": "link_2", "uris": ["viking://resources/b.md"], "reason": "", "created_at": ""}
                ]
            }
        }"#;
        let entries = parse_relation_table(raw).unwrap();
        assert_eq!(entries.len(), 2);
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"link_1"));
        assert!(ids.contains(&"link_2"));
    }

    #[test]
    fn test_next_link_id_smallest_free() {
        assert_eq!(next_link_id(&[]), "link_1");
        assert_eq!(next_link_id(&[entry("link_1", &[])]), "link_2");
        // Gaps are reused.
        assert_eq!(
            next_link_id(&[entry("link_1", &[]), entry("link_3", &[])]),
            "link_2"
        );
        // Foreign ids are ignored.
        assert_eq!(next_link_id(&[entry("custom", &[])]), "link_1");
    }
}
