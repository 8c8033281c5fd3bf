use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DATA_DIR: &str = "ranklist";
const ROSTER_FILE: &str = "roster.json";

/// One tracked person: field name (`name` or a platform) to handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RosterEntry {
    fields: BTreeMap<String, String>,
}

impl RosterEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: &str) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, field: &str, value: &str) {
        self.fields.insert(field.to_string(), value.to_string());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn normalized(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        Self { fields }
    }

    pub fn is_blank(&self) -> bool {
        self.fields.values().all(|v| v.trim().is_empty())
    }
}

pub trait RosterSource: Send + Sync {
    fn load_roster(&self) -> Result<Vec<RosterEntry>>;
}

#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
}

impl RosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_DATA_HOME/ranklist/roster.json`, falling back to `~/.local/share`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(base) = std::env::var("XDG_DATA_HOME")
            && !base.trim().is_empty()
        {
            return Some(PathBuf::from(base).join(DATA_DIR).join(ROSTER_FILE));
        }
        let home = std::env::var("HOME").ok()?;
        if home.trim().is_empty() {
            return None;
        }
        Some(
            PathBuf::from(home)
                .join(".local")
                .join("share")
                .join(DATA_DIR)
                .join(ROSTER_FILE),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<RosterEntry>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };
        parse_roster_json(&raw).with_context(|| format!("parse {}", self.path.display()))
    }

    pub fn save(&self, entries: &[RosterEntry]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let normalized: Vec<RosterEntry> = entries.iter().map(RosterEntry::normalized).collect();
        let json = serde_json::to_string_pretty(&normalized).context("serialize roster")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).context("write roster")?;
        fs::rename(&tmp, &self.path).context("swap roster")?;
        Ok(())
    }
}

impl RosterSource for RosterStore {
    fn load_roster(&self) -> Result<Vec<RosterEntry>> {
        self.load()
    }
}

pub fn parse_roster_json(raw: &str) -> Result<Vec<RosterEntry>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).context("invalid roster json")
}

/// Appends when `index` is `None` or past the end.
pub fn upsert(entries: &mut Vec<RosterEntry>, index: Option<usize>, entry: RosterEntry) -> usize {
    match index {
        Some(idx) if idx < entries.len() => {
            entries[idx] = entry;
            idx
        }
        _ => {
            entries.push(entry);
            entries.len() - 1
        }
    }
}

pub fn remove(entries: &mut Vec<RosterEntry>, index: usize) -> Option<RosterEntry> {
    (index < entries.len()).then(|| entries.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_reads_as_absent() {
        let entry = RosterEntry::new().with("name", "A").with("luogu", "");
        assert_eq!(entry.get("name"), Some("A"));
        assert_eq!(entry.get("luogu"), None);
        assert_eq!(entry.get("vjudge"), None);
    }

    #[test]
    fn normalized_trims_and_drops_empty() {
        let entry = RosterEntry::new()
            .with("name", "  Bob ")
            .with("atcoder", "   ");
        let norm = entry.normalized();
        assert_eq!(norm.fields().collect::<Vec<_>>(), vec![("name", "Bob")]);
    }

    #[test]
    fn parses_list_of_field_maps() {
        let raw = r#"[{"name": "A", "codeforces": "alice", "luogu": ""}, {"name": "B"}]"#;
        let roster = parse_roster_json(raw).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].get("codeforces"), Some("alice"));
        assert_eq!(roster[1].get("codeforces"), None);
    }

    #[test]
    fn upsert_out_of_range_appends() {
        let mut roster = vec![RosterEntry::new().with("name", "A")];
        let idx = upsert(&mut roster, Some(9), RosterEntry::new().with("name", "B"));
        assert_eq!(idx, 1);
        let idx = upsert(&mut roster, Some(0), RosterEntry::new().with("name", "C"));
        assert_eq!(idx, 0);
        assert_eq!(roster[0].get("name"), Some("C"));
        assert!(remove(&mut roster, 5).is_none());
        assert_eq!(remove(&mut roster, 0).and_then(|e| e.get("name").map(String::from)), Some("C".to_string()));
    }
}
