//! Transcript memory
//!
//! An append-only sequence of user/assistant turns, persisted as a whole
//! snapshot after every append and replayed as conversation history.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of recent turns replayed to the model
pub const DEFAULT_MAX_TURNS: usize = 100;

/// Transcript errors
#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("◆ TRANSCRIPT IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ TRANSCRIPT ENCODE ERROR: {0}")]
    Encode(#[from] serde_json::Error),

    /// Snapshot exists but cannot be parsed; recoverable as empty
    #[error("◆ TRANSCRIPT CORRUPT AT {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, TranscriptError>;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Fields written by newer versions, preserved on rewrite
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            extra: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn to_message(&self) -> datacrew_provider::Message {
        match self.role {
            Role::User => datacrew_provider::Message::user(&self.content),
            Role::Assistant => datacrew_provider::Message::assistant(&self.content),
        }
    }
}

/// Ordered turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub messages: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Local>>,
}

/// Accepted on-disk shapes: the object form, or a bare list of turns
#[derive(Deserialize)]
#[serde(untagged)]
enum Snapshot {
    Object(Transcript),
    List(Vec<Turn>),
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Turn::new(role, content));
        self.updated_at = Some(Local::now());
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last `max` turns
    pub fn recent(&self, max: usize) -> &[Turn] {
        &self.messages[self.messages.len().saturating_sub(max)..]
    }

    fn parse(content: &str) -> std::result::Result<Self, serde_json::Error> {
        match serde_json::from_str::<Snapshot>(content)? {
            Snapshot::Object(transcript) => Ok(transcript),
            Snapshot::List(messages) => Ok(Transcript {
                messages,
                updated_at: None,
            }),
        }
    }
}

/// A transcript bound to its snapshot file
#[derive(Debug)]
pub struct TranscriptStore {
    path: PathBuf,
    transcript: Transcript,
    max_turns: usize,
}

impl TranscriptStore {
    /// Empty store that will persist to `path`; nothing is read
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_max_turns(path, DEFAULT_MAX_TURNS)
    }

    pub fn with_max_turns(path: impl AsRef<Path>, max_turns: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            transcript: Transcript::new(),
            max_turns: max_turns.max(1),
        }
    }

    /// Load the snapshot at `path`. A missing or corrupt snapshot yields an
    /// empty transcript; corruption is logged, never raised.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        Self::load_with_max_turns(path, DEFAULT_MAX_TURNS).await
    }

    pub async fn load_with_max_turns(path: impl AsRef<Path>, max_turns: usize) -> Self {
        let mut store = Self::with_max_turns(path, max_turns);
        match Self::read_snapshot(&store.path).await {
            Ok(Some(transcript)) => {
                debug!(
                    "Loaded transcript {:?} ({} turns)",
                    store.path,
                    transcript.len()
                );
                store.transcript = transcript;
            }
            Ok(None) => debug!("No transcript at {:?}, starting empty", store.path),
            Err(e) => warn!("{}; starting with an empty transcript", e),
        }
        store
    }

    /// Read and parse a snapshot, distinguishing absence from corruption
    pub async fn read_snapshot(path: &Path) -> Result<Option<Transcript>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(path).await?;
        Transcript::parse(&content)
            .map(Some)
            .map_err(|e| TranscriptError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Append a turn and persist the full snapshot before returning.
    ///
    /// If persisting fails the turn stays in memory and the error is
    /// returned; the file keeps its previous snapshot.
    pub async fn append(&mut self, role: Role, content: impl Into<String>) -> Result<()> {
        self.transcript.push(role, content);
        self.persist().await
    }

    /// Write the whole transcript. The snapshot is written to a sibling
    /// temp file and renamed over the target, so readers observe either the
    /// old or the new snapshot.
    pub async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(&self.transcript)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved transcript {:?}", self.path);
        Ok(())
    }

    /// Drop every turn and persist the empty snapshot
    pub async fn reset(&mut self) -> Result<()> {
        self.transcript = Transcript::new();
        self.persist().await
    }

    pub fn turns(&self) -> &[Turn] {
        &self.transcript.messages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Turns replayed as conversation history; the snapshot keeps all of them
    pub fn history(&self) -> &[Turn] {
        self.transcript.recent(self.max_turns)
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "transcript.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        assert!(serde_json::from_str::<Role>("\"system\"").is_err());
    }

    #[test]
    fn test_parse_accepts_bare_list() {
        let transcript =
            Transcript::parse(r#"[{"role":"user","content":"hi"}]"#).unwrap();
        assert_eq!(transcript.messages, vec![Turn::user("hi")]);
    }

    #[test]
    fn test_parse_keeps_unknown_fields() {
        let transcript = Transcript::parse(
            r#"{"messages":[{"role":"assistant","content":"ok","model":"m1"}],"version":2}"#,
        )
        .unwrap();
        let turn = &transcript.messages[0];
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(turn.extra.get("model"), Some(&serde_json::json!("m1")));
    }

    #[test]
    fn test_recent_limits_to_last_turns() {
        let mut transcript = Transcript::new();
        for i in 0..5 {
            transcript.push(Role::User, format!("q{}", i));
        }
        let recent = transcript.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "q3");
        assert_eq!(transcript.recent(10).len(), 5);
        assert!(Transcript::new().recent(3).is_empty());
    }

    #[test]
    fn test_tmp_path_is_sibling() {
        let store = TranscriptStore::new("/tmp/mem/shared.json");
        assert_eq!(store.tmp_path(), PathBuf::from("/tmp/mem/shared.json.tmp"));
    }
}
