use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

use crate::marks::mark_label;

pub const SESSION_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkKind {
    Original,
    Refinement,
}

/// One generated or refined artifact set within a session. Entries are
/// append-only and never renumbered; artifacts attach after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkEntry {
    pub mark_id: String,
    pub number: u64,
    pub label: String,
    pub kind: MarkKind,
    pub prompt: String,
    pub instruction: Option<String>,
    pub prompt_diff: Option<Vec<String>>,
    pub aspect_ratio: String,
    pub provider: String,
    #[serde(default)]
    pub artifacts: Vec<Map<String, Value>>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionManifest {
    pub path: PathBuf,
    pub schema_version: u64,
    pub session_id: String,
    pub created_at: String,
    pub prompt_seed: String,
    pub marks: Vec<MarkEntry>,
}

impl SessionManifest {
    pub fn new(path: impl Into<PathBuf>, prompt_seed: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: Uuid::new_v4().to_string(),
            created_at: now_utc_iso(),
            prompt_seed: prompt_seed.into(),
            marks: Vec::new(),
        }
    }

    /// Tolerant load: missing or malformed fields keep their freshly
    /// initialized values, unreadable mark rows are skipped.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut manifest = Self::new(path.clone(), "");
        let payload = read_json(&path).unwrap_or(Value::Object(Map::new()));
        let Some(obj) = payload.as_object() else {
            return manifest;
        };

        manifest.schema_version = obj
            .get("schema_version")
            .and_then(Value::as_u64)
            .unwrap_or(manifest.schema_version);
        manifest.session_id = obj
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.session_id);
        manifest.created_at = obj
            .get("created_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(manifest.created_at);
        manifest.prompt_seed = obj
            .get("prompt_seed")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        if let Some(marks) = obj.get("marks").and_then(Value::as_array) {
            for item in marks {
                if let Ok(parsed) = serde_json::from_value::<MarkEntry>(item.clone()) {
                    manifest.marks.push(parsed);
                }
            }
        }
        manifest
    }

    pub fn add_original(
        &mut self,
        prompt: impl Into<String>,
        aspect_ratio: impl Into<String>,
        provider: impl Into<String>,
    ) -> MarkEntry {
        self.push_mark(MarkKind::Original, prompt.into(), None, aspect_ratio, provider)
    }

    pub fn add_refinement(
        &mut self,
        prompt: impl Into<String>,
        instruction: impl Into<String>,
        aspect_ratio: impl Into<String>,
        provider: impl Into<String>,
    ) -> MarkEntry {
        self.push_mark(
            MarkKind::Refinement,
            prompt.into(),
            Some(instruction.into()),
            aspect_ratio,
            provider,
        )
    }

    pub fn add_artifact(&mut self, mark_id: &str, artifact: Map<String, Value>) {
        if let Some(mark) = self
            .marks
            .iter_mut()
            .find(|entry| entry.mark_id == mark_id)
        {
            mark.artifacts.push(artifact);
        }
    }

    pub fn mark_by_number(&self, number: u64) -> Option<&MarkEntry> {
        self.marks.iter().find(|entry| entry.number == number)
    }

    pub fn latest_mark(&self) -> Option<&MarkEntry> {
        self.marks.last()
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let mut payload = Map::new();
        payload.insert(
            "schema_version".to_string(),
            Value::Number(self.schema_version.into()),
        );
        payload.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        payload.insert(
            "created_at".to_string(),
            Value::String(self.created_at.clone()),
        );
        payload.insert(
            "prompt_seed".to_string(),
            Value::String(self.prompt_seed.clone()),
        );
        payload.insert(
            "marks".to_string(),
            Value::Array(
                self.marks
                    .iter()
                    .map(|entry| serde_json::to_value(entry).unwrap_or(Value::Null))
                    .collect(),
            ),
        );

        write_json(&self.path, Value::Object(payload))
    }

    fn push_mark(
        &mut self,
        kind: MarkKind,
        prompt: String,
        instruction: Option<String>,
        aspect_ratio: impl Into<String>,
        provider: impl Into<String>,
    ) -> MarkEntry {
        let number = self.next_number();
        let prompt_diff = prompt_diff(
            self.marks.last().map(|entry| entry.prompt.as_str()),
            &prompt,
        );
        let mark = MarkEntry {
            mark_id: Uuid::new_v4().to_string(),
            number,
            label: mark_label(number as i64),
            kind,
            prompt,
            instruction,
            prompt_diff,
            aspect_ratio: aspect_ratio.into(),
            provider: provider.into(),
            artifacts: Vec::new(),
            created_at: now_utc_iso(),
        };
        self.marks.push(mark.clone());
        mark
    }

    fn next_number(&self) -> u64 {
        self.marks.last().map(|entry| entry.number + 1).unwrap_or(1)
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    let lines = rendered
        .lines()
        .map(str::to_string)
        .collect::<Vec<String>>();
    Some(lines)
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json(path: &Path, payload: Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}
