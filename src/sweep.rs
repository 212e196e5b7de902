//! Staleness sweep: the post-pass removal of rows the pipeline no longer
//! produces.
//!
//! Runs once, after every entity type has been upserted. A row is stale
//! when its `last_imported_at` predates the pass timestamp, i.e. nothing
//! in this pass's artifacts touched it. Only the pipeline-writable subset
//! is ever considered: researcher-owned groupings and researcher-assigned
//! join rows are invisible to the sweep regardless of staleness.
//!
//! Deletes are explicit and ordered (overlay rows, then join rows, then
//! the owning row) rather than delegated to database cascade rules. The
//! one legitimate path that destroys researcher work, a quote truly gone
//! from the source of truth, lives in this file and nowhere else.

use crate::artifacts::ArtifactSet;
use crate::db::GroupKind;
use rusqlite::{Transaction, params};
use serde::Serialize;
use std::collections::HashSet;

/// Which artifact categories were present this pass. An absent artifact
/// means "no information", not "everything was deleted", so its table is
/// skipped by the sweep as well as by the upserts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepScope {
    pub sessions: bool,
    pub quotes: bool,
    pub clusters: bool,
    pub themes: bool,
}

impl SweepScope {
    pub fn from_artifacts(artifacts: &ArtifactSet) -> Self {
        SweepScope {
            sessions: artifacts.sessions.is_some(),
            quotes: artifacts.quotes.is_some(),
            clusters: artifacts.clusters.is_some(),
            themes: artifacts.themes.is_some(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepCounts {
    pub join_rows: usize,
    pub quotes: usize,
    pub clusters: usize,
    pub themes: usize,
    pub sessions: usize,
    pub people: usize,
}

/// Run the full sweep for one project inside the pass transaction.
pub fn sweep(
    tx: &Transaction,
    project_id: &str,
    scope: SweepScope,
    pass_ts: i64,
) -> rusqlite::Result<SweepCounts> {
    let mut counts = SweepCounts::default();

    if scope.clusters {
        counts.join_rows += sweep_stale_join_rows(tx, project_id, GroupKind::Cluster, pass_ts)?;
    }
    if scope.themes {
        counts.join_rows += sweep_stale_join_rows(tx, project_id, GroupKind::Theme, pass_ts)?;
    }

    if scope.quotes {
        counts.quotes = sweep_stale_quotes(tx, project_id, pass_ts)?;
    }

    if scope.clusters {
        counts.clusters = sweep_stale_groupings(tx, project_id, GroupKind::Cluster, pass_ts)?;
    }
    if scope.themes {
        counts.themes = sweep_stale_groupings(tx, project_id, GroupKind::Theme, pass_ts)?;
    }

    if scope.sessions {
        let (sessions, people) = sweep_stale_sessions(tx, project_id, pass_ts)?;
        counts.sessions = sessions;
        counts.people = people;
    }

    Ok(counts)
}

/// Pipeline-assigned join rows not refreshed this pass: the pipeline no
/// longer sorts that quote there. Researcher-assigned rows are untouched.
fn sweep_stale_join_rows(
    tx: &Transaction,
    project_id: &str,
    kind: GroupKind,
    pass_ts: i64,
) -> rusqlite::Result<usize> {
    tx.execute(
        &format!(
            "DELETE FROM {} WHERE assigned_by = 'pipeline' AND last_imported_at < ?2
             AND quote_id IN (SELECT id FROM quotes WHERE project_id = ?1)",
            kind.join_table()
        ),
        params![project_id, pass_ts],
    )
}

/// Quotes absent from the current pipeline output. Deleting the overlay
/// first is deliberate: this is the single place researcher-authored rows
/// are destroyed, justified because the quote they annotate no longer
/// exists.
fn sweep_stale_quotes(tx: &Transaction, project_id: &str, pass_ts: i64) -> rusqlite::Result<usize> {
    let stale: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM quotes WHERE project_id = ?1 AND last_imported_at < ?2",
        )?;
        let rows = stmt.query_map(params![project_id, pass_ts], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for quote_id in &stale {
        delete_quote_cascade(tx, quote_id)?;
    }

    Ok(stale.len())
}

/// Overlay rows, then join rows, then the quote itself.
fn delete_quote_cascade(tx: &Transaction, quote_id: &str) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM quote_tags WHERE quote_id = ?1", params![quote_id])?;
    tx.execute("DELETE FROM quote_states WHERE quote_id = ?1", params![quote_id])?;
    tx.execute("DELETE FROM quote_edits WHERE quote_id = ?1", params![quote_id])?;
    tx.execute("DELETE FROM deleted_badges WHERE quote_id = ?1", params![quote_id])?;
    tx.execute("DELETE FROM cluster_quotes WHERE quote_id = ?1", params![quote_id])?;
    tx.execute("DELETE FROM theme_quotes WHERE quote_id = ?1", params![quote_id])?;
    tx.execute("DELETE FROM quotes WHERE id = ?1", params![quote_id])?;
    Ok(())
}

/// Pipeline-created groupings not refreshed this pass. The query filters
/// on created_by, so researcher-owned rows never enter the candidate set.
fn sweep_stale_groupings(
    tx: &Transaction,
    project_id: &str,
    kind: GroupKind,
    pass_ts: i64,
) -> rusqlite::Result<usize> {
    let stale: Vec<String> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT id FROM {} WHERE project_id = ?1 AND created_by = 'pipeline' AND last_imported_at < ?2",
            kind.group_table()
        ))?;
        let rows = stmt.query_map(params![project_id, pass_ts], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for group_id in &stale {
        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", kind.join_table(), kind.join_group_column()),
            params![group_id],
        )?;
        tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.group_table()),
            params![group_id],
        )?;
    }

    Ok(stale.len())
}

/// Sessions absent from the manifest: remove child rows, any quotes still
/// hanging off the session (with their overlay), then the session itself.
/// People are instance-scoped and never auto-deleted, with one exception:
/// a person whose last reference anywhere in the store was held by a
/// session swept here.
fn sweep_stale_sessions(
    tx: &Transaction,
    project_id: &str,
    pass_ts: i64,
) -> rusqlite::Result<(usize, usize)> {
    let stale: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM sessions WHERE project_id = ?1 AND last_imported_at < ?2",
        )?;
        let rows = stmt.query_map(params![project_id, pass_ts], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    // Only persons referenced by rows this sweep deletes are candidates
    // for the orphan cleanup below. A person with no speaker or quote row
    // at all (people artifact only) is not orphaned by anything.
    let mut orphan_candidates: HashSet<String> = HashSet::new();

    for session_id in &stale {
        {
            let mut stmt =
                tx.prepare("SELECT person_id FROM session_speakers WHERE session_id = ?1")?;
            let rows = stmt.query_map(params![session_id], |row| row.get(0))?;
            for person_id in rows {
                orphan_candidates.insert(person_id?);
            }
        }

        tx.execute("DELETE FROM source_files WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM transcript_segments WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM topic_boundaries WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM session_speakers WHERE session_id = ?1", params![session_id])?;

        // Quotes of a removed session are stale by definition, but the
        // quotes sweep may have been skipped (quotes artifact absent), so
        // finish the cascade here before the FK would dangle.
        let orphans: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT id, person_id FROM quotes WHERE session_id = ?1")?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for (quote_id, person_id) in &orphans {
            delete_quote_cascade(tx, quote_id)?;
            orphan_candidates.insert(person_id.clone());
        }

        tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
    }

    let mut people = 0;
    for person_id in &orphan_candidates {
        people += tx.execute(
            "DELETE FROM people WHERE id = ?1
             AND id NOT IN (SELECT person_id FROM session_speakers)
             AND id NOT IN (SELECT person_id FROM quotes)",
            params![person_id],
        )?;
    }

    Ok((stale.len(), people))
}
