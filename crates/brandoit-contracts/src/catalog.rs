use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Visibility tier of a shared catalog asset, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Private,
    Team,
    Community,
    SystemDefault,
}

impl Scope {
    pub const PRECEDENCE: [Scope; 4] = [
        Scope::Private,
        Scope::Team,
        Scope::Community,
        Scope::SystemDefault,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub label: String,
    pub value: String,
    pub scope: Scope,
}

/// Merge per-scope query results into one working set: scopes in
/// precedence order, entries deduplicated by normalized value (first
/// occurrence wins), within-scope order preserved.
pub fn merge_scoped(rows: &[CatalogEntry]) -> Vec<CatalogEntry> {
    let mut merged: Vec<CatalogEntry> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for scope in Scope::PRECEDENCE {
        for entry in rows.iter().filter(|entry| entry.scope == scope) {
            let key = merge_key(&entry.value);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            merged.push(entry.clone());
        }
    }
    merged
}

fn merge_key(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Up => "up",
            Vote::Down => "down",
        }
    }
}

/// Append-only recorder for community-catalog votes (`votes.jsonl`).
#[derive(Debug, Clone)]
pub struct VoteWriter {
    path: PathBuf,
    session_id: String,
}

impl VoteWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            session_id: session_id.into(),
        }
    }

    pub fn record(
        &self,
        asset_id: &str,
        voter: &str,
        vote: Vote,
    ) -> anyhow::Result<Map<String, Value>> {
        let mut payload = Map::new();
        payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        payload.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        payload.insert("asset_id".to_string(), Value::String(asset_id.to_string()));
        payload.insert("voter".to_string(), Value::String(voter.to_string()));
        payload.insert("vote".to_string(), Value::String(vote.as_str().to_string()));

        append_jsonl(&self.path, &payload)?;
        Ok(payload)
    }
}

fn append_jsonl(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    use std::io::Write;
    file.write_all(serde_json::to_string(payload)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{merge_scoped, CatalogEntry, Scope, Vote, VoteWriter};

    fn entry(id: &str, value: &str, scope: Scope) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            label: value.to_string(),
            value: value.to_string(),
            scope,
        }
    }

    #[test]
    fn merge_prefers_higher_precedence_scopes() {
        let rows = vec![
            entry("sys-1", "Neon", Scope::SystemDefault),
            entry("mine-1", "neon", Scope::Private),
            entry("team-1", "NEON ", Scope::Team),
        ];
        let merged = merge_scoped(&rows);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "mine-1");
    }

    #[test]
    fn merge_keeps_within_scope_order() {
        let rows = vec![
            entry("sys-1", "sketch", Scope::SystemDefault),
            entry("team-2", "flat", Scope::Team),
            entry("team-1", "neon", Scope::Team),
            entry("community-1", "retro", Scope::Community),
        ];
        let merged = merge_scoped(&rows);
        let ids: Vec<&str> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["team-2", "team-1", "community-1", "sys-1"]);
    }

    #[test]
    fn vote_writer_appends_jsonl_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("votes.jsonl");
        let writer = VoteWriter::new(&path, "session-123");

        writer.record("asset-9", "user-a", Vote::Up)?;
        let payload = writer.record("asset-9", "user-b", Vote::Down)?;
        assert_eq!(payload["vote"], Value::String("down".to_string()));

        let raw = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0])?;
        assert_eq!(first["asset_id"], Value::String("asset-9".to_string()));
        assert_eq!(first["vote"], Value::String("up".to_string()));
        assert!(first.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }
}
