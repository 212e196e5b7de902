//! Per-entity merge logic for one reconciliation pass.
//!
//! Every function here runs inside the pass transaction and decides, per
//! incoming artifact, one of three things: insert (no match), refresh
//! (match owned by the pipeline), or defer-to-conflict (match owned by the
//! researcher and the incoming value would materially change it). Deferral
//! writes an import_conflicts row and nothing else; researcher-owned rows
//! are never modified from this module.
//!
//! Every inserted or refreshed pipeline-owned row gets `last_imported_at`
//! stamped with the pass timestamp; the sweeper later removes whatever was
//! not stamped this pass.

use crate::artifacts::{
    GroupingArtifact, PersonArtifact, QuoteArtifact, QuoteRef, SessionArtifact,
    TranscriptArtifact,
};
use crate::db::{GroupKind, Provenance};
use crate::stable_key::{self, GroupingMatch, MatchVia};
use rusqlite::{OptionalExtension, Transaction, params};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertCounts {
    pub inserted: usize,
    pub refreshed: usize,
    pub deferred: usize,
}

// =============================================================================
// People
// =============================================================================

/// People are instance-scoped and human-owned: the pipeline may introduce a
/// person it has not seen before, but an existing row is never overwritten.
pub fn upsert_people(
    tx: &Transaction,
    people: &[PersonArtifact],
    pass_ts: i64,
) -> rusqlite::Result<UpsertCounts> {
    let mut counts = UpsertCounts::default();

    for person in people {
        let exists: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM people WHERE id = ?1",
            params![person.id],
            |row| row.get(0),
        )?;
        if exists {
            counts.refreshed += 1;
            continue;
        }
        tx.execute(
            "INSERT INTO people (id, display_name, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![person.id, person.display_name, person.role, pass_ts, pass_ts],
        )?;
        counts.inserted += 1;
    }

    Ok(counts)
}

/// Insert a bare person row if the id is unknown. Used when a speaker or
/// quote references a person the people artifact did not (or could not)
/// describe; the researcher can fill in the display name later.
fn ensure_person(tx: &Transaction, person_id: &str, pass_ts: i64) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO people (id, display_name, created_at, updated_at)
         VALUES (?1, ?1, ?2, ?2)",
        params![person_id, pass_ts],
    )?;
    Ok(())
}

// =============================================================================
// Sessions and their children
// =============================================================================

/// Upsert sessions from the manifest, plus their wholly pipeline-owned
/// children (source files, speakers, transcript segments, topic
/// boundaries). Children get deterministic ids derived from the session
/// row id, so re-imports update in place instead of accreting rows.
pub fn upsert_sessions(
    tx: &Transaction,
    project_id: &str,
    sessions: &[SessionArtifact],
    transcripts: &HashMap<String, TranscriptArtifact>,
    pass_ts: i64,
) -> rusqlite::Result<UpsertCounts> {
    let mut counts = UpsertCounts::default();

    for artifact in sessions {
        let recorded_at = artifact
            .recorded_at
            .as_deref()
            .and_then(crate::artifacts::parse_timestamp);

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM sessions WHERE project_id = ?1 AND source_key = ?2",
                params![project_id, artifact.id],
                |row| row.get(0),
            )
            .optional()?;

        let session_id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE sessions SET title = ?2, recorded_at = ?3, duration_secs = ?4, last_imported_at = ?5
                     WHERE id = ?1",
                    params![id, artifact.title, recorded_at, artifact.duration_secs, pass_ts],
                )?;
                counts.refreshed += 1;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO sessions (id, project_id, source_key, title, recorded_at, duration_secs, last_imported_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![id, project_id, artifact.id, artifact.title, recorded_at, artifact.duration_secs, pass_ts],
                )?;
                counts.inserted += 1;
                id
            }
        };

        for (i, file) in artifact.source_files.iter().enumerate() {
            tx.execute(
                "INSERT INTO source_files (id, session_id, path, kind, last_imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET path = ?3, kind = ?4, last_imported_at = ?5",
                params![format!("{}-src-{}", session_id, i), session_id, file.path, file.kind, pass_ts],
            )?;
        }

        for speaker in &artifact.speakers {
            ensure_person(tx, &speaker.person_id, pass_ts)?;
            tx.execute(
                "INSERT INTO session_speakers (id, session_id, person_id, speaker_code, role, last_imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET person_id = ?3, role = ?5, last_imported_at = ?6",
                params![
                    format!("{}-spk-{}", session_id, speaker.code),
                    session_id,
                    speaker.person_id,
                    speaker.code,
                    speaker.role,
                    pass_ts,
                ],
            )?;
        }

        if let Some(transcript) = transcripts.get(&artifact.id) {
            for (seq, segment) in transcript.segments.iter().enumerate() {
                tx.execute(
                    "INSERT INTO transcript_segments (id, session_id, seq, speaker_code, start_secs, end_secs, text, last_imported_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(id) DO UPDATE SET speaker_code = ?4, start_secs = ?5, end_secs = ?6, text = ?7, last_imported_at = ?8",
                    params![
                        format!("{}-seg-{}", session_id, seq),
                        session_id,
                        seq as i64,
                        segment.speaker,
                        segment.start_secs,
                        segment.end_secs,
                        segment.text,
                        pass_ts,
                    ],
                )?;
            }
            for (i, topic) in transcript.topics.iter().enumerate() {
                tx.execute(
                    "INSERT INTO topic_boundaries (id, session_id, start_secs, label, last_imported_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET start_secs = ?3, label = ?4, last_imported_at = ?5",
                    params![format!("{}-top-{}", session_id, i), session_id, topic.start_secs, topic.label, pass_ts],
                )?;
            }
        }
    }

    Ok(counts)
}

// =============================================================================
// Quotes
// =============================================================================

/// Upsert quotes by stable key. Quote existence and core fields (times,
/// text, sentiment, intensity, grouping axis) are pipeline-owned and always
/// refresh; the researcher overlay hangs off the durable row id and is not
/// touched here at all.
pub fn upsert_quotes(
    tx: &Transaction,
    project_id: &str,
    quotes: &[QuoteArtifact],
    pass_ts: i64,
) -> rusqlite::Result<UpsertCounts> {
    let mut counts = UpsertCounts::default();

    for artifact in quotes {
        let session_id: Option<String> = tx
            .query_row(
                "SELECT id FROM sessions WHERE project_id = ?1 AND source_key = ?2",
                params![project_id, artifact.session_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(session_id) = session_id else {
            record_conflict(
                tx,
                project_id,
                "quote",
                &[artifact.session_id.clone()],
                &serde_json::json!({
                    "sessionId": artifact.session_id,
                    "participantId": artifact.participant_id,
                    "startSecs": artifact.start_secs,
                })
                .to_string(),
                "",
                "incoming quote references a session not present in the store or manifest",
                pass_ts,
            )?;
            counts.deferred += 1;
            continue;
        };

        let stable_key = stable_key::quote_stable_key(
            project_id,
            &artifact.session_id,
            &artifact.participant_id,
            artifact.start_secs,
            &artifact.text,
        );

        ensure_person(tx, &artifact.participant_id, pass_ts)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM quotes WHERE project_id = ?1 AND stable_key = ?2",
                params![project_id, stable_key],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE quotes SET session_id = ?2, person_id = ?3, start_secs = ?4, end_secs = ?5,
                            text = ?6, sentiment = ?7, intensity = ?8, grouping = ?9, last_imported_at = ?10
                     WHERE id = ?1",
                    params![
                        id,
                        session_id,
                        artifact.participant_id,
                        artifact.start_secs,
                        artifact.end_secs,
                        artifact.text,
                        artifact.sentiment,
                        artifact.intensity,
                        artifact.grouping.as_str(),
                        pass_ts,
                    ],
                )?;
                counts.refreshed += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO quotes (id, project_id, session_id, person_id, stable_key, start_secs, end_secs,
                            text, sentiment, intensity, grouping, last_imported_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        Uuid::new_v4().to_string(),
                        project_id,
                        session_id,
                        artifact.participant_id,
                        stable_key,
                        artifact.start_secs,
                        artifact.end_secs,
                        artifact.text,
                        artifact.sentiment,
                        artifact.intensity,
                        artifact.grouping.as_str(),
                        pass_ts,
                    ],
                )?;
                counts.inserted += 1;
            }
        }
    }

    Ok(counts)
}

// =============================================================================
// Clusters and themes
// =============================================================================

/// Upsert one grouping table (clusters or themes). Returns the counts plus
/// a map from normalized incoming label to the grouping row that incoming
/// memberships should attach to; labels that ended in a conflict have no
/// entry, and their memberships are dropped for this pass.
pub fn upsert_groupings(
    tx: &Transaction,
    project_id: &str,
    kind: GroupKind,
    groupings: &[GroupingArtifact],
    pass_ts: i64,
) -> rusqlite::Result<(UpsertCounts, HashMap<String, String>)> {
    let mut counts = UpsertCounts::default();
    let mut targets: HashMap<String, String> = HashMap::new();

    for artifact in groupings {
        let key = stable_key::normalize_label(&artifact.label);

        match stable_key::find_grouping(tx, project_id, kind, &artifact.label)? {
            GroupingMatch::None => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    &format!(
                        "INSERT INTO {} (id, project_id, label, description, created_by, last_imported_at)
                         VALUES (?1, ?2, ?3, ?4, 'pipeline', ?5)",
                        kind.group_table()
                    ),
                    params![id, project_id, artifact.label, artifact.description, pass_ts],
                )?;
                targets.insert(key, id);
                counts.inserted += 1;
            }

            GroupingMatch::One { id, created_by: Provenance::Pipeline, .. } => {
                tx.execute(
                    &format!(
                        "UPDATE {} SET label = ?2, description = ?3, last_imported_at = ?4 WHERE id = ?1",
                        kind.group_table()
                    ),
                    params![id, artifact.label, artifact.description, pass_ts],
                )?;
                targets.insert(key, id);
                counts.refreshed += 1;
            }

            GroupingMatch::One { id, created_by: Provenance::Researcher, via } => {
                let (label, description): (String, Option<String>) = tx.query_row(
                    &format!("SELECT label, description FROM {} WHERE id = ?1", kind.group_table()),
                    params![id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                let identical = label == artifact.label && description == artifact.description;

                // A row with a rename lineage answers to its *original*
                // label; an incoming proposal matching its renamed label is
                // a different lineage claiming the same name, which is a
                // collision even when the text happens to be identical.
                let renamed: bool = tx.query_row(
                    "SELECT COUNT(*) > 0 FROM heading_edits WHERE target_id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;

                if via == MatchVia::RenamedFrom || (identical && !renamed) {
                    // The researcher renamed this grouping (matched through
                    // its original label), or already holds an identical
                    // copy; the incoming label is dropped silently and
                    // memberships follow the existing row. Expected steady
                    // state, not a conflict.
                    targets.insert(key, id);
                    counts.refreshed += 1;
                } else {
                    record_conflict(
                        tx,
                        project_id,
                        kind.as_str(),
                        &[id.clone()],
                        &serde_json::json!({
                            "label": artifact.label,
                            "description": artifact.description,
                        })
                        .to_string(),
                        &serde_json::json!({
                            "label": label,
                            "description": description,
                        })
                        .to_string(),
                        &format!(
                            "pipeline proposed {} \"{}\" but a researcher-owned {} with that label already exists",
                            kind.as_str(),
                            artifact.label,
                            kind.as_str()
                        ),
                        pass_ts,
                    )?;
                    shield_from_sweep(tx, kind, std::slice::from_ref(&id), pass_ts)?;
                    counts.deferred += 1;
                }
            }

            GroupingMatch::Ambiguous(ids) => {
                record_conflict(
                    tx,
                    project_id,
                    kind.as_str(),
                    &ids,
                    &serde_json::json!({
                        "label": artifact.label,
                        "description": artifact.description,
                    })
                    .to_string(),
                    "",
                    &format!(
                        "incoming {} label \"{}\" matches more than one stored row; refusing to pick a winner",
                        kind.as_str(),
                        artifact.label
                    ),
                    pass_ts,
                )?;
                shield_from_sweep(tx, kind, &ids, pass_ts)?;
                counts.deferred += 1;
            }
        }
    }

    Ok((counts, targets))
}

/// A deferred proposal must leave the store untouched, which includes the
/// sweeper: stamp the matched rows (and their join rows) so the conflict
/// does not turn into a same-pass deletion. Only pipeline-owned rows need
/// the stamp; researcher-owned rows are outside the sweep anyway.
fn shield_from_sweep(
    tx: &Transaction,
    kind: GroupKind,
    ids: &[String],
    pass_ts: i64,
) -> rusqlite::Result<()> {
    for id in ids {
        tx.execute(
            &format!(
                "UPDATE {} SET last_imported_at = ?2 WHERE id = ?1 AND created_by = 'pipeline'",
                kind.group_table()
            ),
            params![id, pass_ts],
        )?;
        tx.execute(
            &format!(
                "UPDATE {} SET last_imported_at = ?2 WHERE {} = ?1 AND assigned_by = 'pipeline'",
                kind.join_table(),
                kind.join_group_column()
            ),
            params![id, pass_ts],
        )?;
    }
    Ok(())
}

// =============================================================================
// Join rows (cluster_quotes / theme_quotes)
// =============================================================================

/// Upsert quote memberships for one grouping axis. A researcher-assigned
/// join row blocks the pipeline from reassigning that quote; the incoming
/// assignment is dropped silently (expected steady state, not a conflict).
pub fn upsert_memberships(
    tx: &Transaction,
    project_id: &str,
    kind: GroupKind,
    groupings: &[GroupingArtifact],
    targets: &HashMap<String, String>,
    pass_ts: i64,
) -> rusqlite::Result<UpsertCounts> {
    let mut counts = UpsertCounts::default();

    for artifact in groupings {
        let key = stable_key::normalize_label(&artifact.label);
        let Some(group_id) = targets.get(&key) else {
            // Grouping was deferred to a conflict; its memberships wait for
            // the human decision.
            continue;
        };

        for quote_ref in &artifact.quotes {
            let Some(quote_id) = resolve_quote_ref(tx, project_id, quote_ref)? else {
                continue;
            };

            let existing: Option<(String, String)> = tx
                .query_row(
                    &format!(
                        "SELECT {}, assigned_by FROM {} WHERE quote_id = ?1",
                        kind.join_group_column(),
                        kind.join_table()
                    ),
                    params![quote_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match existing {
                None => {
                    tx.execute(
                        &format!(
                            "INSERT INTO {} ({}, quote_id, assigned_by, last_imported_at)
                             VALUES (?1, ?2, 'pipeline', ?3)",
                            kind.join_table(),
                            kind.join_group_column()
                        ),
                        params![group_id, quote_id, pass_ts],
                    )?;
                    counts.inserted += 1;
                }
                Some((_, assigned_by))
                    if Provenance::from_str(&assigned_by) == Some(Provenance::Pipeline) =>
                {
                    tx.execute(
                        &format!(
                            "UPDATE {} SET {} = ?2, last_imported_at = ?3 WHERE quote_id = ?1",
                            kind.join_table(),
                            kind.join_group_column()
                        ),
                        params![quote_id, group_id, pass_ts],
                    )?;
                    counts.refreshed += 1;
                }
                Some(_) => {
                    // Researcher moved this quote by hand; incoming
                    // assignment dropped.
                }
            }
        }
    }

    Ok(counts)
}

fn resolve_quote_ref(
    tx: &Transaction,
    project_id: &str,
    quote_ref: &QuoteRef,
) -> rusqlite::Result<Option<String>> {
    let stable_key = stable_key::quote_stable_key(
        project_id,
        &quote_ref.session_id,
        &quote_ref.participant_id,
        quote_ref.start_secs,
        &quote_ref.text,
    );
    tx.query_row(
        "SELECT id FROM quotes WHERE project_id = ?1 AND stable_key = ?2",
        params![project_id, stable_key],
        |row| row.get(0),
    )
    .optional()
}

// =============================================================================
// Conflict log
// =============================================================================

/// Append one import_conflicts row. Never merges, never resolves.
pub fn record_conflict(
    tx: &Transaction,
    project_id: &str,
    entity_kind: &str,
    entity_ids: &[String],
    incoming: &str,
    existing: &str,
    description: &str,
    pass_ts: i64,
) -> rusqlite::Result<()> {
    let ids_json = serde_json::to_string(entity_ids).unwrap_or_else(|_| "[]".to_string());
    tx.execute(
        "INSERT INTO import_conflicts (id, project_id, entity_kind, entity_ids, incoming, existing, description, resolved, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        params![
            Uuid::new_v4().to_string(),
            project_id,
            entity_kind,
            ids_json,
            incoming,
            existing,
            description,
            pass_ts,
        ],
    )?;
    Ok(())
}
