//! Pipeline artifact loading.
//!
//! The analysis pipeline drops a directory of JSON files (session manifest,
//! per-session transcripts, quotes, clusters, themes, people). This module
//! parses them into typed structs before any database write happens, so a
//! malformed file aborts the pass with the offending file named and the
//! store untouched. A *missing* file is not an error: that category is
//! simply skipped for the pass, by the upserts and the sweeper both.

use crate::db::GroupKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use thiserror::Error;

pub const SESSIONS_FILE: &str = "sessions.json";
pub const QUOTES_FILE: &str = "quotes.json";
pub const CLUSTERS_FILE: &str = "clusters.json";
pub const THEMES_FILE: &str = "themes.json";
pub const PEOPLE_FILE: &str = "people.json";
pub const TRANSCRIPTS_DIR: &str = "transcripts";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("malformed artifact {name}: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read artifact {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Session manifest entry. `id` is the pipeline's own session identifier,
/// stable across runs by construction; it is the session's stable key.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionArtifact {
    pub id: String,
    pub title: Option<String>,
    /// RFC 3339 timestamp of the recording.
    pub recorded_at: Option<String>,
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub source_files: Vec<SourceFileArtifact>,
    #[serde(default)]
    pub speakers: Vec<SpeakerArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFileArtifact {
    pub path: String,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerArtifact {
    /// Per-session speaker code used by the transcript ("P1", "MOD").
    pub code: String,
    pub person_id: String,
    pub role: Option<String>,
}

/// One session's transcript: ordered speech segments plus topic boundaries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptArtifact {
    pub session_id: String,
    #[serde(default)]
    pub segments: Vec<SegmentArtifact>,
    #[serde(default)]
    pub topics: Vec<TopicArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentArtifact {
    pub speaker: String,
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicArtifact {
    pub start_secs: f64,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteArtifact {
    pub session_id: String,
    pub participant_id: String,
    pub start_secs: f64,
    pub end_secs: Option<f64>,
    pub text: String,
    pub sentiment: Option<String>,
    pub intensity: Option<f64>,
    /// Whether the pipeline sorted this quote by screen cluster or theme.
    pub grouping: GroupKind,
}

/// Reference to a quote inside a cluster/theme membership list. Carries
/// the same fields the stable key is computed from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRef {
    pub session_id: String,
    pub participant_id: String,
    pub start_secs: f64,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupingArtifact {
    pub label: String,
    pub description: Option<String>,
    #[serde(default)]
    pub quotes: Vec<QuoteRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonArtifact {
    pub id: String,
    pub display_name: String,
    pub role: Option<String>,
}

/// Everything one pipeline run produced. `None` means the file was absent.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    pub sessions: Option<Vec<SessionArtifact>>,
    /// Keyed by the session's stable identifier.
    pub transcripts: HashMap<String, TranscriptArtifact>,
    pub quotes: Option<Vec<QuoteArtifact>>,
    pub clusters: Option<Vec<GroupingArtifact>>,
    pub themes: Option<Vec<GroupingArtifact>>,
    pub people: Option<Vec<PersonArtifact>>,
}

impl ArtifactSet {
    /// Load whichever artifact files exist under `dir`. Parsing is strict:
    /// any present-but-malformed file fails the whole load.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<ArtifactSet, ArtifactError> {
        let dir = dir.as_ref();
        let mut set = ArtifactSet {
            sessions: load_optional(dir.join(SESSIONS_FILE), SESSIONS_FILE)?,
            quotes: load_optional(dir.join(QUOTES_FILE), QUOTES_FILE)?,
            clusters: load_optional(dir.join(CLUSTERS_FILE), CLUSTERS_FILE)?,
            themes: load_optional(dir.join(THEMES_FILE), THEMES_FILE)?,
            people: load_optional(dir.join(PEOPLE_FILE), PEOPLE_FILE)?,
            transcripts: HashMap::new(),
        };

        let transcripts_dir = dir.join(TRANSCRIPTS_DIR);
        if transcripts_dir.is_dir() {
            let entries = std::fs::read_dir(&transcripts_dir).map_err(|e| ArtifactError::Io {
                name: TRANSCRIPTS_DIR.to_string(),
                source: e,
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| ArtifactError::Io {
                    name: TRANSCRIPTS_DIR.to_string(),
                    source: e,
                })?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let name = format!(
                    "{}/{}",
                    TRANSCRIPTS_DIR,
                    path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
                );
                let transcript: TranscriptArtifact = parse_file(&path, &name)?;
                set.transcripts.insert(transcript.session_id.clone(), transcript);
            }
        }

        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_none()
            && self.quotes.is_none()
            && self.clusters.is_none()
            && self.themes.is_none()
            && self.people.is_none()
            && self.transcripts.is_empty()
    }
}

fn load_optional<T: serde::de::DeserializeOwned>(
    path: std::path::PathBuf,
    name: &str,
) -> Result<Option<T>, ArtifactError> {
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let parsed = serde_json::from_str(&content).map_err(|e| ArtifactError::Malformed {
                name: name.to_string(),
                source: e,
            })?;
            Ok(Some(parsed))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ArtifactError::Io { name: name.to_string(), source: e }),
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path, name: &str) -> Result<T, ArtifactError> {
    let content = std::fs::read_to_string(path).map_err(|e| ArtifactError::Io {
        name: name.to_string(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| ArtifactError::Malformed {
        name: name.to_string(),
        source: e,
    })
}

/// Parse an RFC 3339 timestamp to Unix milliseconds.
pub fn parse_timestamp(ts: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.timestamp_millis())
        .ok()
}
