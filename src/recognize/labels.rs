use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Classification of a known face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaceKind {
    User,
    Enemy,
}

impl FaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceKind::User => "User",
            FaceKind::Enemy => "Enemy",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(FaceKind::User),
            "enemy" => Ok(FaceKind::Enemy),
            other => Err(anyhow!("unknown face kind '{}'", other)),
        }
    }
}

impl fmt::Display for FaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FaceKind,
}

/// Integer model label -> `{name, type}`.
///
/// Persisted as a JSON object keyed by the label's decimal string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap {
    entries: BTreeMap<u32, LabelEntry>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: u32, name: impl Into<String>, kind: FaceKind) {
        self.entries.insert(
            label,
            LabelEntry {
                name: name.into(),
                kind,
            },
        );
    }

    pub fn get(&self, label: u32) -> Option<&LabelEntry> {
        self.entries.get(&label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &LabelEntry)> {
        self.entries.iter().map(|(label, entry)| (*label, entry))
    }

    /// Change the kind of every entry named `name`. Returns true if any entry changed.
    pub fn set_kind(&mut self, name: &str, kind: FaceKind) -> bool {
        let mut changed = false;
        for entry in self.entries.values_mut().filter(|e| e.name == name) {
            if entry.kind != kind {
                entry.kind = kind;
                changed = true;
            }
        }
        changed
    }

    /// Load from disk. A missing file yields an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::warn!("label map {} not found; starting empty", path.display());
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read label map {}: {}", path.display(), e))?;
        let map = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid label map {}: {}", path.display(), e))?;
        log::info!("label map loaded from {}", path.display());
        Ok(map)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow!("failed to write label map {}: {}", path.display(), e))?;
        log::info!("label map saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_map_uses_string_keys_and_type_field() {
        let mut map = LabelMap::new();
        map.insert(0, "alice", FaceKind::User);
        map.insert(1, "mallory", FaceKind::Enemy);

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["0"]["name"], "alice");
        assert_eq!(json["1"]["type"], "Enemy");
    }

    #[test]
    fn set_kind_reclassifies_by_name() {
        let mut map = LabelMap::new();
        map.insert(0, "bob", FaceKind::User);
        assert!(map.set_kind("bob", FaceKind::Enemy));
        assert!(!map.set_kind("bob", FaceKind::Enemy));
        assert_eq!(map.get(0).unwrap().kind, FaceKind::Enemy);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let map = LabelMap::load(&dir.path().join("absent.json")).unwrap();
        assert!(map.is_empty());
    }
}
