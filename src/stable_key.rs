//! Stable-key resolution: deterministic identity for incoming artifacts.
//!
//! Repeated imports must recognize "the same thing" without the pipeline
//! handing us durable ids. Sessions carry their own stable identifier;
//! quotes get a composite digest; clusters and themes match by normalized
//! label, with researcher renames followed through the heading-edit
//! lineage. When a label matches more than one stored row the resolver
//! refuses to pick a winner and reports the ambiguity instead.

use crate::db::{GroupKind, Provenance};
use rusqlite::{Transaction, params};
use sha2::{Digest, Sha256};

/// Quote text contributes only a bounded normalized prefix to the key, so
/// minor re-cleaning of the tail between pipeline runs keeps the identity.
const QUOTE_TEXT_PREFIX_CHARS: usize = 64;

/// Length of the truncated hex digest used as a quote stable key.
const QUOTE_KEY_LEN: usize = 24;

/// Case-fold and collapse whitespace runs. "Checkout " and "checkout"
/// normalize identically; "check out" does not.
pub fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic identity for a quote: digest over project, session,
/// participant, start time (millisecond precision) and a bounded prefix of
/// the normalized text. Start time alone collides for overlapping
/// speakers; text alone drifts when the pipeline re-cleans wording.
pub fn quote_stable_key(
    project_id: &str,
    session_key: &str,
    participant_id: &str,
    start_secs: f64,
    text: &str,
) -> String {
    let prefix: String = normalize_label(text)
        .chars()
        .take(QUOTE_TEXT_PREFIX_CHARS)
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(session_key.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(participant_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(format!("{:.3}", start_secs).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(prefix.as_bytes());

    let digest = hex::encode(hasher.finalize());
    digest[..QUOTE_KEY_LEN].to_string()
}

/// How an incoming grouping label matched a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVia {
    /// Normalized incoming label equals the row's current label.
    CurrentLabel,
    /// Normalized incoming label equals a label this row carried before a
    /// researcher renamed it (heading-edit lineage).
    RenamedFrom,
}

#[derive(Debug, Clone)]
pub enum GroupingMatch {
    None,
    One {
        id: String,
        created_by: Provenance,
        via: MatchVia,
    },
    /// More than one stored row claims this label; never guess a winner.
    Ambiguous(Vec<String>),
}

/// Resolve an incoming cluster/theme label against the stored rows of one
/// project. Consults current labels first, then the rename lineage in
/// heading_edits.
pub fn find_grouping(
    tx: &Transaction,
    project_id: &str,
    kind: GroupKind,
    incoming_label: &str,
) -> rusqlite::Result<GroupingMatch> {
    let key = normalize_label(incoming_label);

    let mut matches: Vec<(String, Provenance, MatchVia)> = Vec::new();

    let mut stmt = tx.prepare(&format!(
        "SELECT id, label, created_by FROM {} WHERE project_id = ?1",
        kind.group_table()
    ))?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (id, label, created_by) = row?;
        if normalize_label(&label) == key {
            matches.push((
                id,
                Provenance::from_str(&created_by).unwrap_or(Provenance::Researcher),
                MatchVia::CurrentLabel,
            ));
        }
    }

    // Rename lineage: a grouping the researcher renamed still answers to
    // every label it carried before.
    let mut stmt = tx.prepare(
        "SELECT target_id, original_label FROM heading_edits
         WHERE project_id = ?1 AND target_kind = ?2",
    )?;
    let rows = stmt.query_map(params![project_id, kind.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (target_id, original_label) = row?;
        if normalize_label(&original_label) != key {
            continue;
        }
        if matches.iter().any(|(id, _, _)| *id == target_id) {
            continue;
        }
        // The renamed row may itself have been swept or hand-deleted.
        let created_by: Option<String> = tx
            .query_row(
                &format!("SELECT created_by FROM {} WHERE id = ?1", kind.group_table()),
                params![target_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(created_by) = created_by {
            matches.push((
                target_id,
                Provenance::from_str(&created_by).unwrap_or(Provenance::Researcher),
                MatchVia::RenamedFrom,
            ));
        }
    }

    match matches.len() {
        0 => Ok(GroupingMatch::None),
        1 => {
            let (id, created_by, via) = matches.remove(0);
            Ok(GroupingMatch::One { id, created_by, via })
        }
        _ => Ok(GroupingMatch::Ambiguous(
            matches.into_iter().map(|(id, _, _)| id).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_label_case_and_whitespace() {
        assert_eq!(normalize_label("Checkout"), "checkout");
        assert_eq!(normalize_label("checkout "), "checkout");
        assert_eq!(normalize_label("  Landing   Page "), "landing page");
        assert_ne!(normalize_label("check out"), normalize_label("checkout"));
    }

    #[test]
    fn test_quote_key_deterministic() {
        let a = quote_stable_key("proj", "s1", "p1", 12.5, "It never loads");
        let b = quote_stable_key("proj", "s1", "p1", 12.5, "It never loads");
        assert_eq!(a, b);
        assert_eq!(a.len(), QUOTE_KEY_LEN);
    }

    #[test]
    fn test_quote_key_separates_overlapping_speakers() {
        // Same start time, different participants talking over each other.
        let a = quote_stable_key("proj", "s1", "p1", 12.5, "It never loads");
        let b = quote_stable_key("proj", "s1", "p2", 12.5, "Works fine for me");
        assert_ne!(a, b);
    }

    #[test]
    fn test_quote_key_tolerates_tail_recleaning() {
        let long = "a".repeat(200);
        let a = quote_stable_key("proj", "s1", "p1", 3.0, &format!("{} tail one", long));
        let b = quote_stable_key("proj", "s1", "p1", 3.0, &format!("{} tail two", long));
        assert_eq!(a, b);
    }

    #[test]
    fn test_quote_key_normalizes_text() {
        let a = quote_stable_key("proj", "s1", "p1", 3.0, "It  Never Loads");
        let b = quote_stable_key("proj", "s1", "p1", 3.0, "it never loads");
        assert_eq!(a, b);
    }

    #[test]
    fn test_quote_key_distinguishes_start_time() {
        let a = quote_stable_key("proj", "s1", "p1", 12.5, "It never loads");
        let b = quote_stable_key("proj", "s1", "p1", 12.501, "It never loads");
        assert_ne!(a, b);
    }
}
