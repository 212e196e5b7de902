use serde::{Deserialize, Serialize};

/// Who a machine-writable row belongs to.
///
/// Rows with `Researcher` provenance are off-limits to the import engine:
/// they are never refreshed, reassigned, or swept.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Pipeline,
    Researcher,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Pipeline => "pipeline",
            Provenance::Researcher => "researcher",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pipeline" => Some(Provenance::Pipeline),
            "researcher" => Some(Provenance::Researcher),
            _ => None,
        }
    }
}

/// The two grouping axes a quote can be sorted into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    Cluster,
    Theme,
}

impl GroupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKind::Cluster => "cluster",
            GroupKind::Theme => "theme",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cluster" => Some(GroupKind::Cluster),
            "theme" => Some(GroupKind::Theme),
            _ => None,
        }
    }

    /// Grouping table for this kind.
    pub fn group_table(&self) -> &'static str {
        match self {
            GroupKind::Cluster => "screen_clusters",
            GroupKind::Theme => "theme_groups",
        }
    }

    /// Join table for this kind.
    pub fn join_table(&self) -> &'static str {
        match self {
            GroupKind::Cluster => "cluster_quotes",
            GroupKind::Theme => "theme_quotes",
        }
    }

    /// Foreign-key column of the join table that points at the grouping.
    pub fn join_group_column(&self) -> &'static str {
        match self {
            GroupKind::Cluster => "cluster_id",
            GroupKind::Theme => "theme_id",
        }
    }
}

// Instance-scoped entities: shared across projects, never swept.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub role: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebookGroup {
    pub id: String,
    pub name: String,
    #[serde(rename = "sortOrder")]
    pub sort_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagDefinition {
    pub id: String,
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub label: String,
    pub color: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

// Project-scoped entities, written by the import engine.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    /// Pipeline's own session identifier, stable across runs.
    #[serde(rename = "sourceKey")]
    pub source_key: String,
    pub title: Option<String>,
    #[serde(rename = "recordedAt")]
    pub recorded_at: Option<i64>,
    #[serde(rename = "durationSecs")]
    pub duration_secs: Option<f64>,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub path: String,
    pub kind: Option<String>,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpeaker {
    pub id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "personId")]
    pub person_id: String,
    /// Per-session code the transcript uses for this person ("P1", "MOD").
    #[serde(rename = "speakerCode")]
    pub speaker_code: String,
    pub role: Option<String>,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub seq: i32,
    #[serde(rename = "speakerCode")]
    pub speaker_code: String,
    #[serde(rename = "startSecs")]
    pub start_secs: f64,
    #[serde(rename = "endSecs")]
    pub end_secs: f64,
    pub text: String,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicBoundary {
    pub id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "startSecs")]
    pub start_secs: f64,
    pub label: String,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

/// An extracted quote. Core fields are pipeline-owned and refreshed on
/// every import; the researcher overlay (tags, states, edits, badges)
/// lives in separate tables keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "personId")]
    pub person_id: String,
    /// Deterministic identity across imports (see stable_key module).
    #[serde(rename = "stableKey")]
    pub stable_key: String,
    #[serde(rename = "startSecs")]
    pub start_secs: f64,
    #[serde(rename = "endSecs")]
    pub end_secs: Option<f64>,
    pub text: String,
    pub sentiment: Option<String>,
    pub intensity: Option<f64>,
    /// Which grouping axis the pipeline classified this quote under.
    pub grouping: GroupKind,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

/// A screen cluster or theme group row (both tables share this shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grouping {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    pub label: String,
    pub description: Option<String>,
    #[serde(rename = "createdBy")]
    pub created_by: Provenance,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

/// Join row placing a quote in a cluster or theme. At most one per
/// quote per axis (UNIQUE on quote_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAssignment {
    #[serde(rename = "groupId")]
    pub group_id: String,
    #[serde(rename = "quoteId")]
    pub quote_id: String,
    #[serde(rename = "assignedBy")]
    pub assigned_by: Provenance,
    #[serde(rename = "lastImportedAt")]
    pub last_imported_at: i64,
}

// Researcher overlay: written only through explicit analyst action,
// removed only when the quote itself is removed.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteTag {
    #[serde(rename = "quoteId")]
    pub quote_id: String,
    #[serde(rename = "tagId")]
    pub tag_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteState {
    #[serde(rename = "quoteId")]
    pub quote_id: String,
    pub hidden: bool,
    pub starred: bool,
    #[serde(rename = "hiddenAt")]
    pub hidden_at: Option<i64>,
    #[serde(rename = "starredAt")]
    pub starred_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteEdit {
    #[serde(rename = "quoteId")]
    pub quote_id: String,
    #[serde(rename = "correctedText")]
    pub corrected_text: String,
    #[serde(rename = "editedAt")]
    pub edited_at: i64,
}

/// Record of a researcher renaming a cluster/theme heading. The original
/// label is kept so later imports can recognize the pipeline's name for
/// the same grouping (rename lineage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadingEdit {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "targetKind")]
    pub target_kind: GroupKind,
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "originalLabel")]
    pub original_label: String,
    #[serde(rename = "newLabel")]
    pub new_label: String,
    #[serde(rename = "editedAt")]
    pub edited_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedBadge {
    #[serde(rename = "quoteId")]
    pub quote_id: String,
    /// Which machine-assigned badge was suppressed ("sentiment").
    pub badge: String,
    #[serde(rename = "deletedAt")]
    pub deleted_at: i64,
}

/// A collision the import engine declined to resolve. Append-only from
/// the engine; consumers flip `resolved` after a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConflict {
    pub id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "entityKind")]
    pub entity_kind: String,
    #[serde(rename = "entityIds")]
    pub entity_ids: Vec<String>,
    pub incoming: String,
    pub existing: String,
    pub description: String,
    pub resolved: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "resolvedAt")]
    pub resolved_at: Option<i64>,
}
