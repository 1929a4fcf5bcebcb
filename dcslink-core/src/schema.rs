//! Schema document loading for the export address space.
//!
//! The host ships one JSON document per module plus two metadata documents,
//! each shaped `{category: {control: {identifier, outputs: [...]}}}`, and an
//! alias document mapping aircraft name -> list of module documents to merge.
//! Loading is tolerant of unknown content: non-object categories/controls and
//! controls without an identifier are skipped. Missing or unparsable preload
//! documents are fatal — nothing can be decoded without them.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::registry::AddressRegistry;
use crate::types::{LinkError, Result};

/// Alias document: aircraft name -> module document names.
pub const ALIASES_FILE: &str = "AircraftAliases.json";

/// Documents merged at startup, before any aircraft is identified.
pub const PRELOAD_FILES: &[&str] = &["MetadataStart.json", "MetadataEnd.json"];

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

/// One named control from a schema document.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlDef {
    pub identifier: String,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
}

/// How one output of a control is encoded in the exported memory image.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputDef {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub address: u16,
    #[serde(default = "default_mask")]
    pub mask: u16,
    #[serde(default)]
    pub shift_by: u8,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Integer,
    String,
}

fn default_mask() -> u16 {
    0xFFFF
}

fn default_max_length() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Schema set
// ---------------------------------------------------------------------------

/// The merged set of schema documents loaded so far.
///
/// Starts from the preload documents; [`SchemaSet::load_aircraft`] appends
/// the per-aircraft modules once the host identifies the airframe. The
/// registry is always rebuilt wholesale from the full merged control list.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    dir: PathBuf,
    aliases: HashMap<String, Vec<String>>,
    controls: Vec<ControlDef>,
}

impl SchemaSet {
    /// Load the alias document and preload metadata from `dir`.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        let aliases = read_json(&dir.join(ALIASES_FILE))?;
        let aliases: HashMap<String, Vec<String>> = serde_json::from_value(aliases)
            .map_err(|e| LinkError::Schema(format!("{ALIASES_FILE}: {e}")))?;

        let mut controls = Vec::new();
        for name in PRELOAD_FILES {
            let doc = read_json(&dir.join(name))?;
            collect_controls(&doc, &mut controls);
        }

        Ok(SchemaSet {
            dir,
            aliases,
            controls,
        })
    }

    /// Merge the module documents for `aircraft` into the set.
    ///
    /// An unknown aircraft name falls back to the empty-string alias entry
    /// (the common modules shared by unlisted airframes).
    pub fn load_aircraft(&mut self, aircraft: &str) -> Result<()> {
        let key = if self.aliases.contains_key(aircraft) {
            aircraft
        } else {
            ""
        };
        let modules = self.aliases.get(key).cloned().unwrap_or_default();

        for name in &modules {
            let doc = read_json(&self.dir.join(format!("{name}.json")))?;
            collect_controls(&doc, &mut self.controls);
        }
        Ok(())
    }

    /// All controls merged so far, in load order.
    pub fn controls(&self) -> &[ControlDef] {
        &self.controls
    }

    /// Build a fresh address registry from the merged controls.
    pub fn registry(&self) -> AddressRegistry {
        AddressRegistry::from_controls(&self.controls)
    }

    /// Identifiers of every merged control.
    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.controls.iter().map(|c| c.identifier.as_str())
    }
}

/// Extract controls from one parsed document, skipping anything that is not
/// a well-formed control object.
fn collect_controls(doc: &serde_json::Value, out: &mut Vec<ControlDef>) {
    let Some(categories) = doc.as_object() else {
        return;
    };
    for category in categories.values() {
        let Some(controls) = category.as_object() else {
            continue;
        };
        for control in controls.values() {
            if control.get("identifier").map(|v| v.is_string()) != Some(true) {
                continue;
            }
            if let Ok(def) = serde_json::from_value::<ControlDef>(control.clone()) {
                out.push(def);
            }
        }
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path)
        .map_err(|e| LinkError::Schema(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| LinkError::Schema(format!("{}: {e}", path.display())))
}

/// Probe the host's known schema locations under Saved Games.
pub fn default_schema_dir() -> Option<PathBuf> {
    let home = std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)?;

    for folder in ["DCS", "DCS.openbeta"] {
        let dir = home
            .join("Saved Games")
            .join(folder)
            .join("Scripts")
            .join("DCS-BIOS")
            .join("doc")
            .join("json");
        if dir.is_dir() {
            return Some(dir);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_schema_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(ALIASES_FILE),
            r#"{"F-16C_50": ["F-16C_50"], "": ["CommonData"]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("MetadataStart.json"),
            r#"{
              "Metadata": {
                "_ACFT_NAME": {
                  "identifier": "_ACFT_NAME",
                  "outputs": [{"type": "string", "address": 0, "max_length": 24}]
                }
              }
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("MetadataEnd.json"),
            r#"{
              "Metadata": {
                "_UPDATE_COUNTER": {
                  "identifier": "_UPDATE_COUNTER",
                  "outputs": [{"type": "integer", "address": 65534, "mask": 255, "shift_by": 0}]
                }
              }
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("F-16C_50.json"),
            r#"{
              "Gear": {
                "GEAR_HANDLE": {
                  "identifier": "GEAR_HANDLE",
                  "outputs": [{"type": "integer", "address": 17000, "mask": 1, "shift_by": 0}]
                }
              },
              "notes": "not a category"
            }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("CommonData.json"),
            r#"{
              "Common Data": {
                "PILOTNAME": {
                  "identifier": "PILOTNAME",
                  "outputs": [{"type": "string", "address": 400, "max_length": 8}]
                }
              }
            }"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_load_preload_documents() {
        let dir = write_schema_dir();
        let schema = SchemaSet::load(dir.path()).unwrap();

        let ids: Vec<&str> = schema.field_ids().collect();
        assert_eq!(ids, vec!["_ACFT_NAME", "_UPDATE_COUNTER"]);
    }

    #[test]
    fn test_load_missing_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchemaSet::load(dir.path()).unwrap_err();
        assert!(matches!(err, LinkError::Schema(_)));
    }

    #[test]
    fn test_load_malformed_document_is_fatal() {
        let dir = write_schema_dir();
        fs::write(dir.path().join("MetadataStart.json"), "{not json").unwrap();
        let err = SchemaSet::load(dir.path()).unwrap_err();
        assert!(matches!(err, LinkError::Schema(_)));
    }

    #[test]
    fn test_load_aircraft_merges_modules() {
        let dir = write_schema_dir();
        let mut schema = SchemaSet::load(dir.path()).unwrap();
        schema.load_aircraft("F-16C_50").unwrap();

        assert!(schema.field_ids().any(|id| id == "GEAR_HANDLE"));
    }

    #[test]
    fn test_unknown_aircraft_falls_back_to_common() {
        let dir = write_schema_dir();
        let mut schema = SchemaSet::load(dir.path()).unwrap();
        schema.load_aircraft("Ka-50").unwrap();

        assert!(schema.field_ids().any(|id| id == "PILOTNAME"));
        assert!(!schema.field_ids().any(|id| id == "GEAR_HANDLE"));
    }

    #[test]
    fn test_output_defaults() {
        let dir = write_schema_dir();
        let schema = SchemaSet::load(dir.path()).unwrap();

        let name = &schema.controls()[0];
        assert_eq!(name.identifier, "_ACFT_NAME");
        assert_eq!(name.outputs[0].mask, 0xFFFF); // default
        assert_eq!(name.outputs[0].shift_by, 0); // default
        assert_eq!(name.outputs[0].max_length, 24);
    }

    #[test]
    fn test_non_control_content_skipped() {
        let dir = write_schema_dir();
        let mut schema = SchemaSet::load(dir.path()).unwrap();
        // F-16C_50.json carries a non-object category; it must not break
        // loading or leak into the control list.
        schema.load_aircraft("F-16C_50").unwrap();
        assert_eq!(
            schema.field_ids().filter(|id| *id == "GEAR_HANDLE").count(),
            1
        );
    }
}
