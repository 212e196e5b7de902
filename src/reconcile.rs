//! One full reconciliation pass: load artifacts, upsert every entity type
//! in foreign-key dependency order, sweep what the pipeline stopped
//! producing, commit.
//!
//! The pass is the single writer for pipeline-derived rows. It runs inside
//! one transaction, so readers see either the pre-pass or the post-pass
//! snapshot and a failure anywhere leaves the store byte-identical to the
//! pre-pass state. The pass timestamp is taken once and threaded through
//! explicitly so passes are reproducible from fixed inputs.

use crate::artifacts::{ArtifactError, ArtifactSet};
use crate::db::{Database, GroupKind};
use crate::sweep::{self, SweepCounts, SweepScope};
use crate::upsert::{self, UpsertCounts};
use rusqlite::params;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassError {
    #[error("unknown project: {0}")]
    UnknownProject(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("database error during pass: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Summary returned after a successful pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub pass_ts: i64,
    pub people: UpsertCounts,
    pub sessions: UpsertCounts,
    pub quotes: UpsertCounts,
    pub clusters: UpsertCounts,
    pub themes: UpsertCounts,
    pub cluster_memberships: UpsertCounts,
    pub theme_memberships: UpsertCounts,
    pub swept: SweepCounts,
    pub new_conflicts: usize,
}

/// Load the artifact directory and run one pass.
pub fn run_pass_from_dir<P: AsRef<Path>>(
    db: &Database,
    project_id: &str,
    dir: P,
    progress: &(dyn Fn(&str) + Send + Sync),
) -> Result<PassSummary, PassError> {
    let artifacts = ArtifactSet::load_dir(dir)?;
    run_pass(db, project_id, &artifacts, progress)
}

/// Run one reconciliation pass for a project against an already-loaded
/// artifact set.
///
/// `progress` receives human-readable status lines; the CLI prints them to
/// stderr, tests collect them in a Vec.
pub fn run_pass(
    db: &Database,
    project_id: &str,
    artifacts: &ArtifactSet,
    progress: &(dyn Fn(&str) + Send + Sync),
) -> Result<PassSummary, PassError> {
    if db.get_project(project_id)?.is_none() {
        return Err(PassError::UnknownProject(project_id.to_string()));
    }

    let pass_ts = chrono::Utc::now().timestamp_millis();
    let scope = SweepScope::from_artifacts(artifacts);

    let summary = db.with_transaction(|tx| -> Result<PassSummary, PassError> {
        let mut summary = PassSummary { pass_ts, ..Default::default() };

        progress("Step 1/4: Upserting people and sessions...");
        if let Some(people) = &artifacts.people {
            summary.people = upsert::upsert_people(tx, people, pass_ts)?;
        }
        if let Some(sessions) = &artifacts.sessions {
            summary.sessions =
                upsert::upsert_sessions(tx, project_id, sessions, &artifacts.transcripts, pass_ts)?;
        }

        progress("Step 2/4: Upserting quotes...");
        if let Some(quotes) = &artifacts.quotes {
            summary.quotes = upsert::upsert_quotes(tx, project_id, quotes, pass_ts)?;
        }

        progress("Step 3/4: Upserting clusters, themes and memberships...");
        if let Some(clusters) = &artifacts.clusters {
            let (counts, targets) =
                upsert::upsert_groupings(tx, project_id, GroupKind::Cluster, clusters, pass_ts)?;
            summary.clusters = counts;
            summary.cluster_memberships = upsert::upsert_memberships(
                tx,
                project_id,
                GroupKind::Cluster,
                clusters,
                &targets,
                pass_ts,
            )?;
        }
        if let Some(themes) = &artifacts.themes {
            let (counts, targets) =
                upsert::upsert_groupings(tx, project_id, GroupKind::Theme, themes, pass_ts)?;
            summary.themes = counts;
            summary.theme_memberships = upsert::upsert_memberships(
                tx,
                project_id,
                GroupKind::Theme,
                themes,
                &targets,
                pass_ts,
            )?;
        }

        progress("Step 4/4: Sweeping rows no longer produced...");
        summary.swept = sweep::sweep(tx, project_id, scope, pass_ts)?;

        summary.new_conflicts = tx.query_row(
            "SELECT COUNT(*) FROM import_conflicts WHERE project_id = ?1 AND created_at = ?2",
            params![project_id, pass_ts],
            |row| row.get(0),
        )?;

        Ok(summary)
    })?;

    progress(&format!(
        "Pass complete: {} quotes inserted, {} refreshed, {} swept, {} new conflicts",
        summary.quotes.inserted, summary.quotes.refreshed, summary.swept.quotes, summary.new_conflicts
    ));

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{
        GroupingArtifact, PersonArtifact, QuoteArtifact, QuoteRef, SegmentArtifact,
        SessionArtifact, SourceFileArtifact, SpeakerArtifact, TopicArtifact, TranscriptArtifact,
    };
    use crate::db::{CodebookGroup, GroupKind, Grouping, Provenance, TagDefinition};
    use std::collections::HashMap;

    const PROJECT: &str = "proj";

    fn test_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.create_project(PROJECT, "Usability study", 0).unwrap();
        db
    }

    fn no_progress() -> impl Fn(&str) + Send + Sync {
        |_: &str| {}
    }

    fn quote_ref_q1() -> QuoteRef {
        QuoteRef {
            session_id: "s1".to_string(),
            participant_id: "per-1".to_string(),
            start_secs: 12.5,
            text: "It never loads".to_string(),
        }
    }

    /// Pass-1 fixture: session s1 with quote q1 in cluster "Checkout".
    fn artifacts_v1() -> ArtifactSet {
        let mut transcripts = HashMap::new();
        transcripts.insert(
            "s1".to_string(),
            TranscriptArtifact {
                session_id: "s1".to_string(),
                segments: vec![
                    SegmentArtifact {
                        speaker: "MOD".to_string(),
                        start_secs: 0.0,
                        end_secs: 10.2,
                        text: "Try checking out with the saved card".to_string(),
                    },
                    SegmentArtifact {
                        speaker: "P1".to_string(),
                        start_secs: 12.5,
                        end_secs: 15.0,
                        text: "It never loads".to_string(),
                    },
                ],
                topics: vec![TopicArtifact { start_secs: 0.0, label: "Checkout task".to_string() }],
            },
        );
        ArtifactSet {
            people: Some(vec![PersonArtifact {
                id: "per-1".to_string(),
                display_name: "Ana".to_string(),
                role: Some("participant".to_string()),
            }]),
            sessions: Some(vec![SessionArtifact {
                id: "s1".to_string(),
                title: Some("Session one".to_string()),
                recorded_at: Some("2026-03-02T10:00:00Z".to_string()),
                duration_secs: Some(1800.0),
                source_files: vec![SourceFileArtifact {
                    path: "recordings/s1.mp4".to_string(),
                    kind: Some("video".to_string()),
                }],
                speakers: vec![SpeakerArtifact {
                    code: "P1".to_string(),
                    person_id: "per-1".to_string(),
                    role: Some("participant".to_string()),
                }],
            }]),
            transcripts,
            quotes: Some(vec![QuoteArtifact {
                session_id: "s1".to_string(),
                participant_id: "per-1".to_string(),
                start_secs: 12.5,
                end_secs: Some(15.0),
                text: "It never loads".to_string(),
                sentiment: Some("negative".to_string()),
                intensity: Some(0.8),
                grouping: GroupKind::Cluster,
            }]),
            clusters: Some(vec![GroupingArtifact {
                label: "Checkout".to_string(),
                description: Some("Checkout screen".to_string()),
                quotes: vec![quote_ref_q1()],
            }]),
            themes: Some(vec![]),
        }
    }

    fn create_tag(db: &Database, tag_id: &str, label: &str) {
        db.create_codebook_group(&CodebookGroup {
            id: "cb-1".to_string(),
            name: "Emotions".to_string(),
            sort_order: 0,
        })
        .ok();
        db.create_tag_definition(&TagDefinition {
            id: tag_id.to_string(),
            group_id: "cb-1".to_string(),
            label: label.to_string(),
            color: None,
            created_at: 0,
        })
        .unwrap();
    }

    #[test]
    fn test_first_pass_inserts_everything() {
        let db = test_db();
        let summary = run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        assert_eq!(summary.people.inserted, 1);
        assert_eq!(summary.sessions.inserted, 1);
        assert_eq!(summary.quotes.inserted, 1);
        assert_eq!(summary.clusters.inserted, 1);
        assert_eq!(summary.cluster_memberships.inserted, 1);
        assert_eq!(summary.new_conflicts, 0);

        let sessions = db.list_sessions(PROJECT).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].source_key, "s1");

        let quotes = db.list_quotes(PROJECT).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].text, "It never loads");

        let clusters = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].label, "Checkout");
        assert_eq!(clusters[0].created_by, Provenance::Pipeline);

        let members = db.quotes_for_group(GroupKind::Cluster, &clusters[0].id).unwrap();
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_idempotency_second_pass_adds_nothing() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        let quote_id = db.list_quotes(PROJECT).unwrap()[0].id.clone();
        let cluster_id = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap()[0].id.clone();

        let summary = run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();
        assert_eq!(summary.quotes.inserted, 0);
        assert_eq!(summary.quotes.refreshed, 1);
        assert_eq!(summary.clusters.inserted, 0);
        assert_eq!(summary.swept.quotes, 0);
        assert_eq!(summary.swept.clusters, 0);
        assert_eq!(summary.new_conflicts, 0);

        // Identities are stable, not just counts.
        let quotes = db.list_quotes(PROJECT).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].id, quote_id);
        let clusters = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, cluster_id);
    }

    #[test]
    fn test_session_children_update_in_place() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        let session = db.get_session_by_source_key(PROJECT, "s1").unwrap().unwrap();
        let segments = db.list_segments(&session.id).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].speaker_code, "MOD");
        assert_eq!(db.list_speakers(&session.id).unwrap().len(), 1);
        assert_eq!(db.list_source_files(&session.id).unwrap().len(), 1);
        assert_eq!(db.list_topic_boundaries(&session.id).unwrap().len(), 1);

        // The quote is still reachable by the same stable key.
        let key = crate::stable_key::quote_stable_key(PROJECT, "s1", "per-1", 12.5, "It never loads");
        assert!(db.get_quote_by_stable_key(PROJECT, &key).unwrap().is_some());
    }

    #[test]
    fn test_overlay_survives_reimport_while_core_fields_refresh() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        let quotes = db.list_quotes(PROJECT).unwrap();
        let quote = &quotes[0];
        create_tag(&db, "tag-frustration", "frustration");
        db.tag_quote(&quote.id, "tag-frustration", 100).unwrap();
        db.set_quote_starred(&quote.id, true, 100).unwrap();

        // Pipeline re-cleans the tail of the text and revises sentiment;
        // same stable key.
        let mut v2 = artifacts_v1();
        let q = &mut v2.quotes.as_mut().unwrap()[0];
        q.text = "It never loads, honestly".to_string();
        q.sentiment = Some("frustrated".to_string());

        run_pass(&db, PROJECT, &v2, &no_progress()).unwrap();

        let refreshed = db.get_quote(&quote.id).unwrap().unwrap();
        assert_eq!(refreshed.text, "It never loads, honestly");
        assert_eq!(refreshed.sentiment.as_deref(), Some("frustrated"));
        assert_eq!(db.get_quote_tags(&quote.id).unwrap().len(), 1);
        assert!(db.get_quote_state(&quote.id).unwrap().unwrap().starred);
    }

    #[test]
    fn test_overlay_destroyed_when_session_truly_removed() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        let quotes = db.list_quotes(PROJECT).unwrap();
        let quote = &quotes[0];
        create_tag(&db, "tag-frustration", "frustration");
        db.tag_quote(&quote.id, "tag-frustration", 100).unwrap();

        // Next run: the source recording was deleted, nothing produced.
        let mut v2 = artifacts_v1();
        v2.sessions = Some(vec![]);
        v2.quotes = Some(vec![]);
        v2.clusters = Some(vec![]);
        v2.people = None;
        v2.transcripts.clear();

        let summary = run_pass(&db, PROJECT, &v2, &no_progress()).unwrap();
        assert_eq!(summary.swept.quotes, 1);
        assert_eq!(summary.swept.sessions, 1);
        assert_eq!(summary.swept.clusters, 1);

        assert!(db.list_quotes(PROJECT).unwrap().is_empty());
        assert!(db.get_quote_tags(&quote.id).unwrap().is_empty());
        assert!(db.list_sessions(PROJECT).unwrap().is_empty());
        // Ana is referenced by nothing now, so the orphan cleanup takes her.
        assert!(db.get_person("per-1").unwrap().is_none());
    }

    #[test]
    fn test_unreferenced_person_survives_session_sweep() {
        let db = test_db();

        // An observer listed in the people artifact but never appearing as
        // a speaker or quote participant.
        let mut v1 = artifacts_v1();
        v1.people.as_mut().unwrap().push(PersonArtifact {
            id: "per-obs".to_string(),
            display_name: "Ben".to_string(),
            role: Some("observer".to_string()),
        });
        run_pass(&db, PROJECT, &v1, &no_progress()).unwrap();

        db.update_person("per-obs", "Ben K.", Some("observer"), 100).unwrap();

        // The session disappears from the source of truth; the observer is
        // still in people.json.
        let mut v2 = v1.clone();
        v2.sessions = Some(vec![]);
        v2.quotes = Some(vec![]);
        v2.clusters = Some(vec![]);
        v2.transcripts.clear();

        let summary = run_pass(&db, PROJECT, &v2, &no_progress()).unwrap();
        assert_eq!(summary.swept.sessions, 1);
        // Ana spoke in the swept session and loses her last reference with
        // it; Ben was never orphaned by anything and keeps his edits.
        assert_eq!(summary.swept.people, 1);
        assert!(db.get_person("per-1").unwrap().is_none());
        let observer = db.get_person("per-obs").unwrap().unwrap();
        assert_eq!(observer.display_name, "Ben K.");
    }

    #[test]
    fn test_missing_artifact_skips_category_without_sweeping_it() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        // A later run where the clusters file was not produced at all.
        let mut v2 = artifacts_v1();
        v2.clusters = None;

        let summary = run_pass(&db, PROJECT, &v2, &no_progress()).unwrap();
        assert_eq!(summary.swept.clusters, 0);
        assert_eq!(db.list_groupings(PROJECT, GroupKind::Cluster).unwrap().len(), 1);
    }

    #[test]
    fn test_researcher_grouping_never_swept_or_relabeled() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        db.create_grouping(
            GroupKind::Theme,
            &Grouping {
                id: "theme-pricing".to_string(),
                project_id: PROJECT.to_string(),
                label: "Pricing concerns".to_string(),
                description: None,
                created_by: Provenance::Researcher,
                last_imported_at: 0,
            },
        )
        .unwrap();

        // Several passes whose artifacts never mention the theme.
        for _ in 0..3 {
            run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();
        }

        let theme = db.get_grouping(GroupKind::Theme, "theme-pricing").unwrap().unwrap();
        assert_eq!(theme.label, "Pricing concerns");
        assert_eq!(theme.created_by, Provenance::Researcher);
    }

    #[test]
    fn test_researcher_assignment_blocks_pipeline_reassignment() {
        let db = test_db();

        let mut v1 = artifacts_v1();
        v1.clusters = Some(vec![
            GroupingArtifact {
                label: "Checkout".to_string(),
                description: None,
                quotes: vec![quote_ref_q1()],
            },
            GroupingArtifact {
                label: "Search".to_string(),
                description: None,
                quotes: vec![],
            },
        ]);
        run_pass(&db, PROJECT, &v1, &no_progress()).unwrap();

        let quote_id = db.list_quotes(PROJECT).unwrap()[0].id.clone();
        let clusters = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap();
        let search = clusters.iter().find(|c| c.label == "Search").unwrap();

        // Researcher drags the quote into "Search" by hand.
        db.move_quote(GroupKind::Cluster, &quote_id, &search.id, 100).unwrap();

        // Pipeline still assigns it to "Checkout".
        let summary = run_pass(&db, PROJECT, &v1, &no_progress()).unwrap();
        assert_eq!(summary.new_conflicts, 0);

        let assignment = db.get_assignment(GroupKind::Cluster, &quote_id).unwrap().unwrap();
        assert_eq!(assignment.group_id, search.id);
        assert_eq!(assignment.assigned_by, Provenance::Researcher);
    }

    #[test]
    fn test_conflict_when_new_cluster_collides_with_renamed_label() {
        let db = test_db();

        let mut v1 = artifacts_v1();
        v1.clusters = Some(vec![GroupingArtifact {
            label: "Homepage".to_string(),
            description: None,
            quotes: vec![],
        }]);
        run_pass(&db, PROJECT, &v1, &no_progress()).unwrap();

        let clusters = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap();
        let cluster = &clusters[0];
        db.rename_grouping(GroupKind::Cluster, &cluster.id, "Landing page", 100).unwrap();

        // Pipeline independently proposes a *new* cluster "Landing page".
        let mut v2 = artifacts_v1();
        v2.clusters = Some(vec![GroupingArtifact {
            label: "Landing page".to_string(),
            description: None,
            quotes: vec![],
        }]);

        let summary = run_pass(&db, PROJECT, &v2, &no_progress()).unwrap();
        assert_eq!(summary.clusters.deferred, 1);
        assert_eq!(summary.new_conflicts, 1);

        // Nothing merged, nothing renamed.
        let stored = db.get_grouping(GroupKind::Cluster, &cluster.id).unwrap().unwrap();
        assert_eq!(stored.label, "Landing page");
        assert_eq!(db.list_groupings(PROJECT, GroupKind::Cluster).unwrap().len(), 1);

        let conflicts = db.unresolved_conflicts(PROJECT).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_kind, "cluster");
    }

    #[test]
    fn test_ambiguous_label_is_deferred_not_guessed() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        // Researcher hand-creates a cluster whose normalized label collides
        // with the pipeline-owned "Checkout".
        db.create_grouping(
            GroupKind::Cluster,
            &Grouping {
                id: "cl-manual".to_string(),
                project_id: PROJECT.to_string(),
                label: "checkout ".to_string(),
                description: None,
                created_by: Provenance::Researcher,
                last_imported_at: 0,
            },
        )
        .unwrap();

        let summary = run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();
        assert_eq!(summary.clusters.deferred, 1);
        assert_eq!(summary.new_conflicts, 1);
        // Both rows still present, neither modified into the other.
        assert_eq!(db.list_groupings(PROJECT, GroupKind::Cluster).unwrap().len(), 2);
    }

    #[test]
    fn test_three_pass_scenario_rename_survives_reimport() {
        let db = test_db();

        // Pass 1: s1 / q1 / "Checkout".
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        // Pass 2: no source changes, identical row counts.
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();
        assert_eq!(db.list_quotes(PROJECT).unwrap().len(), 1);
        assert_eq!(db.list_groupings(PROJECT, GroupKind::Cluster).unwrap().len(), 1);

        // Human work: tag q1, rename "Checkout" -> "Checkout flow".
        let quote_id = db.list_quotes(PROJECT).unwrap()[0].id.clone();
        let cluster_id = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap()[0].id.clone();
        create_tag(&db, "tag-frustration", "frustration");
        db.tag_quote(&quote_id, "tag-frustration", 100).unwrap();
        db.rename_grouping(GroupKind::Cluster, &cluster_id, "Checkout flow", 100).unwrap();

        // Pass 3: pipeline re-run still proposes "Checkout". The rename
        // lineage matches it to the renamed row: no new cluster, no
        // conflict, label and tag untouched.
        let summary = run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();
        assert_eq!(summary.new_conflicts, 0);
        assert_eq!(summary.clusters.inserted, 0);

        let clusters = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].label, "Checkout flow");
        assert_eq!(clusters[0].created_by, Provenance::Researcher);
        assert_eq!(db.get_quote_tags(&quote_id).unwrap().len(), 1);

        // Incoming memberships still land in the renamed cluster.
        let members = db.quotes_for_group(GroupKind::Cluster, &cluster_id).unwrap();
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_atomicity_failed_pass_leaves_store_untouched() {
        let db = test_db();
        run_pass(&db, PROJECT, &artifacts_v1(), &no_progress()).unwrap();

        let before = db.database_checksum().unwrap();

        // Re-run the upserts and start the sweep, then fail before commit.
        let artifacts = artifacts_v1();
        let pass_ts = chrono::Utc::now().timestamp_millis();
        let result: Result<(), PassError> = db.with_transaction(|tx| {
            upsert::upsert_people(tx, artifacts.people.as_ref().unwrap(), pass_ts)?;
            upsert::upsert_sessions(
                tx,
                PROJECT,
                artifacts.sessions.as_ref().unwrap(),
                &artifacts.transcripts,
                pass_ts,
            )?;
            upsert::upsert_quotes(tx, PROJECT, artifacts.quotes.as_ref().unwrap(), pass_ts)?;
            sweep::sweep(tx, PROJECT, SweepScope::from_artifacts(&artifacts), pass_ts)?;
            Err(PassError::UnknownProject("injected failure".to_string()))
        });
        assert!(result.is_err());

        let after = db.database_checksum().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_unsorted_set_is_derived() {
        let db = test_db();

        let mut v1 = artifacts_v1();
        // The cluster artifact no longer claims q1.
        v1.clusters = Some(vec![GroupingArtifact {
            label: "Checkout".to_string(),
            description: None,
            quotes: vec![],
        }]);
        run_pass(&db, PROJECT, &v1, &no_progress()).unwrap();

        let unsorted = db.quotes_without_group(PROJECT, GroupKind::Cluster).unwrap();
        assert_eq!(unsorted.len(), 1);

        // Once assigned, it leaves the derived set.
        let cluster_id = db.list_groupings(PROJECT, GroupKind::Cluster).unwrap()[0].id.clone();
        db.move_quote(GroupKind::Cluster, &unsorted[0].id, &cluster_id, 100).unwrap();
        assert!(db.quotes_without_group(PROJECT, GroupKind::Cluster).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_project_is_fatal() {
        let db = Database::in_memory().unwrap();
        let err = run_pass(&db, "nope", &artifacts_v1(), &no_progress()).unwrap_err();
        assert!(matches!(err, PassError::UnknownProject(_)));
    }

    #[test]
    fn test_progress_reports_steps() {
        let db = test_db();
        let lines = std::sync::Mutex::new(Vec::new());
        run_pass(&db, PROJECT, &artifacts_v1(), &|msg: &str| {
            lines.lock().unwrap().push(msg.to_string());
        })
        .unwrap();
        let lines = lines.into_inner().unwrap();
        assert!(lines.iter().any(|l| l.starts_with("Step 1/4")));
        assert!(lines.iter().any(|l| l.starts_with("Pass complete")));
    }
}
