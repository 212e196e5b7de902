use rusqlite::{Connection, Result, Row, Transaction, params};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use super::models::{
    CodebookGroup, DeletedBadge, GroupAssignment, GroupKind, Grouping, HeadingEdit,
    ImportConflict, Person, Project, Provenance, Quote, QuoteEdit, QuoteState, QuoteTag,
    Session, SessionSpeaker, SourceFile, TagDefinition, TopicBoundary, TranscriptSegment,
};

pub struct Database {
    conn: Mutex<Connection>,
}

/// Tables hashed by `database_checksum`, in a fixed order so two
/// snapshots of the same data always hash identically.
const CHECKSUM_TABLES: &[&str] = &[
    "projects",
    "people",
    "codebook_groups",
    "tag_definitions",
    "sessions",
    "source_files",
    "session_speakers",
    "transcript_segments",
    "topic_boundaries",
    "quotes",
    "screen_clusters",
    "theme_groups",
    "cluster_quotes",
    "theme_quotes",
    "quote_tags",
    "quote_states",
    "quote_edits",
    "heading_edits",
    "deleted_badges",
    "import_conflicts",
];

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn: Mutex::new(conn) };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            -- Instance-scoped: shared across projects, never swept
            CREATE TABLE IF NOT EXISTS people (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                role TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS codebook_groups (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS tag_definitions (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL REFERENCES codebook_groups(id),
                label TEXT NOT NULL,
                color TEXT,
                created_at INTEGER NOT NULL
            );

            -- Project-scoped, pipeline-writable
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                source_key TEXT NOT NULL,
                title TEXT,
                recorded_at INTEGER,
                duration_secs REAL,
                last_imported_at INTEGER NOT NULL,
                UNIQUE(project_id, source_key)
            );

            CREATE TABLE IF NOT EXISTS source_files (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                path TEXT NOT NULL,
                kind TEXT,
                last_imported_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_speakers (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                person_id TEXT NOT NULL REFERENCES people(id),
                speaker_code TEXT NOT NULL,
                role TEXT,
                last_imported_at INTEGER NOT NULL,
                UNIQUE(session_id, speaker_code)
            );

            CREATE TABLE IF NOT EXISTS transcript_segments (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                seq INTEGER NOT NULL,
                speaker_code TEXT NOT NULL,
                start_secs REAL NOT NULL,
                end_secs REAL NOT NULL,
                text TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS topic_boundaries (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id),
                start_secs REAL NOT NULL,
                label TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS quotes (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                session_id TEXT NOT NULL REFERENCES sessions(id),
                person_id TEXT NOT NULL REFERENCES people(id),
                stable_key TEXT NOT NULL,
                start_secs REAL NOT NULL,
                end_secs REAL,
                text TEXT NOT NULL,
                sentiment TEXT,
                intensity REAL,
                grouping TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL,
                UNIQUE(project_id, stable_key)
            );

            CREATE TABLE IF NOT EXISTS screen_clusters (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                label TEXT NOT NULL,
                description TEXT,
                created_by TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS theme_groups (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                label TEXT NOT NULL,
                description TEXT,
                created_by TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL
            );

            -- A quote sits in at most one cluster and one theme:
            -- UNIQUE(quote_id) on both join tables. No join row = unsorted
            -- (derived by query, never stored as a flag).
            CREATE TABLE IF NOT EXISTS cluster_quotes (
                cluster_id TEXT NOT NULL REFERENCES screen_clusters(id),
                quote_id TEXT NOT NULL UNIQUE REFERENCES quotes(id),
                assigned_by TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS theme_quotes (
                theme_id TEXT NOT NULL REFERENCES theme_groups(id),
                quote_id TEXT NOT NULL UNIQUE REFERENCES quotes(id),
                assigned_by TEXT NOT NULL,
                last_imported_at INTEGER NOT NULL
            );

            -- Researcher overlay: never written by the import engine,
            -- deleted only when the target quote is deleted
            CREATE TABLE IF NOT EXISTS quote_tags (
                quote_id TEXT NOT NULL REFERENCES quotes(id),
                tag_id TEXT NOT NULL REFERENCES tag_definitions(id),
                created_at INTEGER NOT NULL,
                UNIQUE(quote_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS quote_states (
                quote_id TEXT PRIMARY KEY REFERENCES quotes(id),
                hidden INTEGER NOT NULL DEFAULT 0,
                starred INTEGER NOT NULL DEFAULT 0,
                hidden_at INTEGER,
                starred_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS quote_edits (
                quote_id TEXT PRIMARY KEY REFERENCES quotes(id),
                corrected_text TEXT NOT NULL,
                edited_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS heading_edits (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                target_kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                original_label TEXT NOT NULL,
                new_label TEXT NOT NULL,
                edited_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deleted_badges (
                quote_id TEXT NOT NULL REFERENCES quotes(id),
                badge TEXT NOT NULL,
                deleted_at INTEGER NOT NULL,
                UNIQUE(quote_id, badge)
            );

            CREATE TABLE IF NOT EXISTS import_conflicts (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                entity_kind TEXT NOT NULL,
                entity_ids TEXT NOT NULL,
                incoming TEXT NOT NULL,
                existing TEXT NOT NULL,
                description TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                resolved_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);
            CREATE INDEX IF NOT EXISTS idx_segments_session ON transcript_segments(session_id);
            CREATE INDEX IF NOT EXISTS idx_quotes_project ON quotes(project_id);
            CREATE INDEX IF NOT EXISTS idx_quotes_session ON quotes(session_id);
            CREATE INDEX IF NOT EXISTS idx_quotes_stale ON quotes(last_imported_at);
            CREATE INDEX IF NOT EXISTS idx_cluster_quotes_cluster ON cluster_quotes(cluster_id);
            CREATE INDEX IF NOT EXISTS idx_theme_quotes_theme ON theme_quotes(theme_id);
            CREATE INDEX IF NOT EXISTS idx_conflicts_project ON import_conflicts(project_id, resolved);
            CREATE INDEX IF NOT EXISTS idx_heading_edits_project ON heading_edits(project_id, target_kind);
            ",
        )?;

        // Migration: Add intensity column if it doesn't exist
        let has_intensity: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('quotes') WHERE name = 'intensity'",
            [],
            |row| row.get(0),
        ).unwrap_or(false);

        if !has_intensity {
            conn.execute("ALTER TABLE quotes ADD COLUMN intensity REAL", [])?;
            eprintln!("Migration: Added intensity column to quotes");
        }

        // Migration: Add color column to tag_definitions if it doesn't exist
        let has_color: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('tag_definitions') WHERE name = 'color'",
            [],
            |row| row.get(0),
        ).unwrap_or(false);

        if !has_color {
            conn.execute("ALTER TABLE tag_definitions ADD COLUMN color TEXT", [])?;
            eprintln!("Migration: Added color column to tag_definitions");
        }

        Ok(())
    }

    /// Run `f` inside a single transaction: commit on Ok, roll back on Err.
    ///
    /// The whole reconciliation pass goes through here so readers only ever
    /// see the pre-pass or post-pass snapshot, never an interleaving.
    pub fn with_transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // Project operations

    pub fn create_project(&self, id: &str, name: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, now],
        )?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, name, created_at FROM projects WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Project {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    // People operations

    pub fn get_person(&self, id: &str) -> Result<Option<Person>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, role, created_at, updated_at FROM people WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_person(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_people(&self) -> Result<Vec<Person>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, role, created_at, updated_at FROM people ORDER BY display_name",
        )?;
        let rows = stmt.query_map([], |row| row_to_person(row))?;
        rows.collect()
    }

    /// Human edit of person metadata. The import engine never calls this.
    pub fn update_person(&self, id: &str, display_name: &str, role: Option<&str>, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE people SET display_name = ?2, role = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, display_name, role, now],
        )?;
        Ok(())
    }

    // Codebook operations

    pub fn create_codebook_group(&self, group: &CodebookGroup) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO codebook_groups (id, name, sort_order) VALUES (?1, ?2, ?3)",
            params![group.id, group.name, group.sort_order],
        )?;
        Ok(())
    }

    pub fn create_tag_definition(&self, tag: &TagDefinition) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tag_definitions (id, group_id, label, color, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tag.id, tag.group_id, tag.label, tag.color, tag.created_at],
        )?;
        Ok(())
    }

    pub fn list_tag_definitions(&self) -> Result<Vec<TagDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT t.id, t.group_id, t.label, t.color, t.created_at
             FROM tag_definitions t
             JOIN codebook_groups g ON g.id = t.group_id
             ORDER BY g.sort_order, t.label",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TagDefinition {
                id: row.get(0)?,
                group_id: row.get(1)?,
                label: row.get(2)?,
                color: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    // Session reads

    pub fn list_sessions(&self, project_id: &str) -> Result<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, source_key, title, recorded_at, duration_secs, last_imported_at
             FROM sessions WHERE project_id = ?1 ORDER BY recorded_at",
        )?;
        let rows = stmt.query_map(params![project_id], |row| row_to_session(row))?;
        rows.collect()
    }

    pub fn get_session_by_source_key(&self, project_id: &str, source_key: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, source_key, title, recorded_at, duration_secs, last_imported_at
             FROM sessions WHERE project_id = ?1 AND source_key = ?2",
        )?;
        let mut rows = stmt.query(params![project_id, source_key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_session(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_segments(&self, session_id: &str) -> Result<Vec<TranscriptSegment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, seq, speaker_code, start_secs, end_secs, text, last_imported_at
             FROM transcript_segments WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(TranscriptSegment {
                id: row.get(0)?,
                session_id: row.get(1)?,
                seq: row.get(2)?,
                speaker_code: row.get(3)?,
                start_secs: row.get(4)?,
                end_secs: row.get(5)?,
                text: row.get(6)?,
                last_imported_at: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    pub fn list_speakers(&self, session_id: &str) -> Result<Vec<SessionSpeaker>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, person_id, speaker_code, role, last_imported_at
             FROM session_speakers WHERE session_id = ?1 ORDER BY speaker_code",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(SessionSpeaker {
                id: row.get(0)?,
                session_id: row.get(1)?,
                person_id: row.get(2)?,
                speaker_code: row.get(3)?,
                role: row.get(4)?,
                last_imported_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn list_source_files(&self, session_id: &str) -> Result<Vec<SourceFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, path, kind, last_imported_at
             FROM source_files WHERE session_id = ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(SourceFile {
                id: row.get(0)?,
                session_id: row.get(1)?,
                path: row.get(2)?,
                kind: row.get(3)?,
                last_imported_at: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    pub fn list_topic_boundaries(&self, session_id: &str) -> Result<Vec<TopicBoundary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, start_secs, label, last_imported_at
             FROM topic_boundaries WHERE session_id = ?1 ORDER BY start_secs",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(TopicBoundary {
                id: row.get(0)?,
                session_id: row.get(1)?,
                start_secs: row.get(2)?,
                label: row.get(3)?,
                last_imported_at: row.get(4)?,
            })
        })?;
        rows.collect()
    }

    // Quote reads

    pub fn get_quote(&self, id: &str) -> Result<Option<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes WHERE id = ?1",
            QUOTE_COLUMNS
        ))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_quote(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_quote_by_stable_key(&self, project_id: &str, stable_key: &str) -> Result<Option<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes WHERE project_id = ?1 AND stable_key = ?2",
            QUOTE_COLUMNS
        ))?;
        let mut rows = stmt.query(params![project_id, stable_key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_quote(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_quotes(&self, project_id: &str) -> Result<Vec<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes WHERE project_id = ?1 ORDER BY session_id, start_secs",
            QUOTE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], |row| row_to_quote(row))?;
        rows.collect()
    }

    pub fn quotes_for_session(&self, session_id: &str) -> Result<Vec<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes WHERE session_id = ?1 ORDER BY start_secs",
            QUOTE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![session_id], |row| row_to_quote(row))?;
        rows.collect()
    }

    pub fn quotes_for_group(&self, kind: GroupKind, group_id: &str) -> Result<Vec<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes q
             JOIN {} j ON j.quote_id = q.id
             WHERE j.{} = ?1 ORDER BY q.start_secs",
            QUOTE_COLUMNS_QUALIFIED,
            kind.join_table(),
            kind.join_group_column()
        ))?;
        let rows = stmt.query_map(params![group_id], |row| row_to_quote(row))?;
        rows.collect()
    }

    /// Quotes classified under `kind` with no join row on that axis.
    /// The "unsorted" set is derived here, never stored.
    pub fn quotes_without_group(&self, project_id: &str, kind: GroupKind) -> Result<Vec<Quote>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quotes q
             WHERE q.project_id = ?1 AND q.grouping = ?2
               AND NOT EXISTS (SELECT 1 FROM {} j WHERE j.quote_id = q.id)
             ORDER BY q.session_id, q.start_secs",
            QUOTE_COLUMNS_QUALIFIED,
            kind.join_table()
        ))?;
        let rows = stmt.query_map(params![project_id, kind.as_str()], |row| row_to_quote(row))?;
        rows.collect()
    }

    // Grouping reads

    pub fn list_groupings(&self, project_id: &str, kind: GroupKind) -> Result<Vec<Grouping>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, project_id, label, description, created_by, last_imported_at
             FROM {} WHERE project_id = ?1 ORDER BY label",
            kind.group_table()
        ))?;
        let rows = stmt.query_map(params![project_id], |row| row_to_grouping(row))?;
        rows.collect()
    }

    pub fn get_grouping(&self, kind: GroupKind, id: &str) -> Result<Option<Grouping>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, project_id, label, description, created_by, last_imported_at
             FROM {} WHERE id = ?1",
            kind.group_table()
        ))?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_grouping(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_assignment(&self, kind: GroupKind, quote_id: &str) -> Result<Option<GroupAssignment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, quote_id, assigned_by, last_imported_at FROM {} WHERE quote_id = ?1",
            kind.join_group_column(),
            kind.join_table()
        ))?;
        let mut rows = stmt.query(params![quote_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_assignment(row)?))
        } else {
            Ok(None)
        }
    }

    // Researcher overlay writes. These are the ordinary CRUD surface the
    // analyst-facing layer uses; the import engine never touches them.

    pub fn tag_quote(&self, quote_id: &str, tag_id: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO quote_tags (quote_id, tag_id, created_at) VALUES (?1, ?2, ?3)",
            params![quote_id, tag_id, now],
        )?;
        Ok(())
    }

    pub fn untag_quote(&self, quote_id: &str, tag_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM quote_tags WHERE quote_id = ?1 AND tag_id = ?2",
            params![quote_id, tag_id],
        )?;
        Ok(())
    }

    pub fn get_quote_tags(&self, quote_id: &str) -> Result<Vec<QuoteTag>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT quote_id, tag_id, created_at FROM quote_tags WHERE quote_id = ?1",
        )?;
        let rows = stmt.query_map(params![quote_id], |row| {
            Ok(QuoteTag {
                quote_id: row.get(0)?,
                tag_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn set_quote_hidden(&self, quote_id: &str, hidden: bool, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quote_states (quote_id, hidden, hidden_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(quote_id) DO UPDATE SET hidden = ?2, hidden_at = ?3",
            params![quote_id, hidden, if hidden { Some(now) } else { None }],
        )?;
        Ok(())
    }

    pub fn set_quote_starred(&self, quote_id: &str, starred: bool, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quote_states (quote_id, starred, starred_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(quote_id) DO UPDATE SET starred = ?2, starred_at = ?3",
            params![quote_id, starred, if starred { Some(now) } else { None }],
        )?;
        Ok(())
    }

    pub fn get_quote_state(&self, quote_id: &str) -> Result<Option<QuoteState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT quote_id, hidden, starred, hidden_at, starred_at FROM quote_states WHERE quote_id = ?1",
        )?;
        let mut rows = stmt.query(params![quote_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(QuoteState {
                quote_id: row.get(0)?,
                hidden: row.get(1)?,
                starred: row.get(2)?,
                hidden_at: row.get(3)?,
                starred_at: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn edit_quote_text(&self, quote_id: &str, corrected_text: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO quote_edits (quote_id, corrected_text, edited_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(quote_id) DO UPDATE SET corrected_text = ?2, edited_at = ?3",
            params![quote_id, corrected_text, now],
        )?;
        Ok(())
    }

    pub fn get_quote_edit(&self, quote_id: &str) -> Result<Option<QuoteEdit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT quote_id, corrected_text, edited_at FROM quote_edits WHERE quote_id = ?1",
        )?;
        let mut rows = stmt.query(params![quote_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(QuoteEdit {
                quote_id: row.get(0)?,
                corrected_text: row.get(1)?,
                edited_at: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn delete_sentiment_badge(&self, quote_id: &str, badge: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO deleted_badges (quote_id, badge, deleted_at) VALUES (?1, ?2, ?3)",
            params![quote_id, badge, now],
        )?;
        Ok(())
    }

    pub fn get_deleted_badges(&self, quote_id: &str) -> Result<Vec<DeletedBadge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT quote_id, badge, deleted_at FROM deleted_badges WHERE quote_id = ?1",
        )?;
        let rows = stmt.query_map(params![quote_id], |row| {
            Ok(DeletedBadge {
                quote_id: row.get(0)?,
                badge: row.get(1)?,
                deleted_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    /// Rename a cluster/theme heading. Rewrites the label, records the
    /// rename in heading_edits (so later imports can follow the lineage),
    /// and flips ownership to the researcher: from here on the import
    /// engine may not relabel or sweep this grouping.
    pub fn rename_grouping(&self, kind: GroupKind, id: &str, new_label: &str, now: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let (project_id, old_label): (String, String) = tx.query_row(
            &format!("SELECT project_id, label FROM {} WHERE id = ?1", kind.group_table()),
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        tx.execute(
            &format!(
                "UPDATE {} SET label = ?2, created_by = 'researcher' WHERE id = ?1",
                kind.group_table()
            ),
            params![id, new_label],
        )?;

        tx.execute(
            "INSERT INTO heading_edits (id, project_id, target_kind, target_id, original_label, new_label, edited_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                uuid::Uuid::new_v4().to_string(),
                project_id,
                kind.as_str(),
                id,
                old_label,
                new_label,
                now,
            ],
        )?;

        tx.commit()
    }

    /// Create a researcher-owned grouping with no pipeline equivalent.
    pub fn create_grouping(&self, kind: GroupKind, grouping: &Grouping) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, project_id, label, description, created_by, last_imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                kind.group_table()
            ),
            params![
                grouping.id,
                grouping.project_id,
                grouping.label,
                grouping.description,
                grouping.created_by.as_str(),
                grouping.last_imported_at,
            ],
        )?;
        Ok(())
    }

    /// Move a quote into a grouping by hand. The researcher-owned join row
    /// blocks the pipeline from reassigning this quote on later imports.
    pub fn move_quote(&self, kind: GroupKind, quote_id: &str, group_id: &str, now: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE quote_id = ?1", kind.join_table()),
            params![quote_id],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {} ({}, quote_id, assigned_by, last_imported_at) VALUES (?1, ?2, 'researcher', ?3)",
                kind.join_table(),
                kind.join_group_column()
            ),
            params![group_id, quote_id, now],
        )?;
        tx.commit()
    }

    /// Pull a quote back out of its grouping (into the derived unsorted set).
    pub fn unsort_quote(&self, kind: GroupKind, quote_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE quote_id = ?1", kind.join_table()),
            params![quote_id],
        )?;
        Ok(())
    }

    pub fn list_heading_edits(&self, project_id: &str, kind: GroupKind) -> Result<Vec<HeadingEdit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, target_kind, target_id, original_label, new_label, edited_at
             FROM heading_edits WHERE project_id = ?1 AND target_kind = ?2 ORDER BY edited_at",
        )?;
        let rows = stmt.query_map(params![project_id, kind.as_str()], |row| {
            Ok(HeadingEdit {
                id: row.get(0)?,
                project_id: row.get(1)?,
                target_kind: GroupKind::from_str(&row.get::<_, String>(2)?).unwrap_or(GroupKind::Cluster),
                target_id: row.get(3)?,
                original_label: row.get(4)?,
                new_label: row.get(5)?,
                edited_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    // Conflict log

    pub fn unresolved_conflicts(&self, project_id: &str) -> Result<Vec<ImportConflict>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, entity_kind, entity_ids, incoming, existing, description, resolved, created_at, resolved_at
             FROM import_conflicts WHERE project_id = ?1 AND resolved = 0 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![project_id], |row| row_to_conflict(row))?;
        rows.collect()
    }

    pub fn list_conflicts(&self, project_id: &str) -> Result<Vec<ImportConflict>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, entity_kind, entity_ids, incoming, existing, description, resolved, created_at, resolved_at
             FROM import_conflicts WHERE project_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![project_id], |row| row_to_conflict(row))?;
        rows.collect()
    }

    /// Mark a conflict as handled. The actual resolution (accept-incoming,
    /// keep-existing, merge) happens as ordinary CRUD writes by the caller.
    pub fn resolve_conflict(&self, conflict_id: &str, now: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE import_conflicts SET resolved = 1, resolved_at = ?2 WHERE id = ?1 AND resolved = 0",
            params![conflict_id, now],
        )?;
        Ok(n > 0)
    }

    /// Digest of every row of every table, in fixed order. Two calls on
    /// identical store states hash identically; used to verify that a
    /// failed pass left no partial effects.
    pub fn database_checksum(&self) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        let mut hasher = Sha256::new();

        for table in CHECKSUM_TABLES {
            hasher.update(table.as_bytes());
            let mut stmt = conn.prepare(&format!("SELECT * FROM {} ORDER BY 1", table))?;
            let col_count = stmt.column_count();
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                for i in 0..col_count {
                    match row.get_ref(i)? {
                        rusqlite::types::ValueRef::Null => hasher.update(b"\0null"),
                        rusqlite::types::ValueRef::Integer(v) => hasher.update(v.to_le_bytes()),
                        rusqlite::types::ValueRef::Real(v) => hasher.update(v.to_le_bytes()),
                        rusqlite::types::ValueRef::Text(t) => hasher.update(t),
                        rusqlite::types::ValueRef::Blob(b) => hasher.update(b),
                    }
                    hasher.update(b"|");
                }
                hasher.update(b"\n");
            }
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

// Row mapping helpers shared across queries

const QUOTE_COLUMNS: &str =
    "id, project_id, session_id, person_id, stable_key, start_secs, end_secs, text, sentiment, intensity, grouping, last_imported_at";

const QUOTE_COLUMNS_QUALIFIED: &str =
    "q.id, q.project_id, q.session_id, q.person_id, q.stable_key, q.start_secs, q.end_secs, q.text, q.sentiment, q.intensity, q.grouping, q.last_imported_at";

fn row_to_person(row: &Row) -> Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        display_name: row.get(1)?,
        role: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_session(row: &Row) -> Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        project_id: row.get(1)?,
        source_key: row.get(2)?,
        title: row.get(3)?,
        recorded_at: row.get(4)?,
        duration_secs: row.get(5)?,
        last_imported_at: row.get(6)?,
    })
}

fn row_to_quote(row: &Row) -> Result<Quote> {
    Ok(Quote {
        id: row.get(0)?,
        project_id: row.get(1)?,
        session_id: row.get(2)?,
        person_id: row.get(3)?,
        stable_key: row.get(4)?,
        start_secs: row.get(5)?,
        end_secs: row.get(6)?,
        text: row.get(7)?,
        sentiment: row.get(8)?,
        intensity: row.get(9)?,
        grouping: GroupKind::from_str(&row.get::<_, String>(10)?).unwrap_or(GroupKind::Cluster),
        last_imported_at: row.get(11)?,
    })
}

fn row_to_grouping(row: &Row) -> Result<Grouping> {
    Ok(Grouping {
        id: row.get(0)?,
        project_id: row.get(1)?,
        label: row.get(2)?,
        description: row.get(3)?,
        // Unknown provenance values are treated as researcher-owned, the
        // conservative side of the ownership rules.
        created_by: Provenance::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(Provenance::Researcher),
        last_imported_at: row.get(5)?,
    })
}

fn row_to_assignment(row: &Row) -> Result<GroupAssignment> {
    Ok(GroupAssignment {
        group_id: row.get(0)?,
        quote_id: row.get(1)?,
        assigned_by: Provenance::from_str(&row.get::<_, String>(2)?)
            .unwrap_or(Provenance::Researcher),
        last_imported_at: row.get(3)?,
    })
}

fn row_to_conflict(row: &Row) -> Result<ImportConflict> {
    let ids_json: String = row.get(3)?;
    Ok(ImportConflict {
        id: row.get(0)?,
        project_id: row.get(1)?,
        entity_kind: row.get(2)?,
        entity_ids: serde_json::from_str(&ids_json).unwrap_or_default(),
        incoming: row.get(4)?,
        existing: row.get(5)?,
        description: row.get(6)?,
        resolved: row.get(7)?,
        created_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_quote() -> (Database, String) {
        let db = Database::in_memory().unwrap();
        db.create_project("proj", "Study", 0).unwrap();
        db.with_transaction(|tx| -> std::result::Result<(), rusqlite::Error> {
            tx.execute(
                "INSERT INTO people (id, display_name, created_at, updated_at) VALUES ('per-1', 'Ana', 0, 0)",
                [],
            )?;
            tx.execute(
                "INSERT INTO sessions (id, project_id, source_key, last_imported_at)
                 VALUES ('sess-1', 'proj', 's1', 0)",
                [],
            )?;
            tx.execute(
                "INSERT INTO quotes (id, project_id, session_id, person_id, stable_key, start_secs, text, grouping, last_imported_at)
                 VALUES ('q-1', 'proj', 'sess-1', 'per-1', 'key1', 12.5, 'It never loads', 'cluster', 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        (db, "q-1".to_string())
    }

    #[test]
    fn test_quote_state_upsert() {
        let (db, q) = db_with_quote();

        db.set_quote_hidden(&q, true, 10).unwrap();
        db.set_quote_starred(&q, true, 20).unwrap();
        let state = db.get_quote_state(&q).unwrap().unwrap();
        assert!(state.hidden);
        assert!(state.starred);
        assert_eq!(state.starred_at, Some(20));

        db.set_quote_hidden(&q, false, 30).unwrap();
        let state = db.get_quote_state(&q).unwrap().unwrap();
        assert!(!state.hidden);
        assert!(state.starred);
        assert!(state.hidden_at.is_none());
    }

    #[test]
    fn test_quote_edit_keeps_latest_correction() {
        let (db, q) = db_with_quote();
        db.edit_quote_text(&q, "It never loads at all", 10).unwrap();
        db.edit_quote_text(&q, "It never ever loads", 20).unwrap();
        let edit = db.get_quote_edit(&q).unwrap().unwrap();
        assert_eq!(edit.corrected_text, "It never ever loads");
        assert_eq!(edit.edited_at, 20);
    }

    #[test]
    fn test_deleted_badge_is_idempotent() {
        let (db, q) = db_with_quote();
        db.delete_sentiment_badge(&q, "sentiment", 10).unwrap();
        db.delete_sentiment_badge(&q, "sentiment", 20).unwrap();
        let badges = db.get_deleted_badges(&q).unwrap();
        assert_eq!(badges.len(), 1);
        assert_eq!(badges[0].deleted_at, 10);
    }

    #[test]
    fn test_rename_records_lineage_and_flips_ownership() {
        let db = Database::in_memory().unwrap();
        db.create_project("proj", "Study", 0).unwrap();
        db.create_grouping(
            GroupKind::Cluster,
            &Grouping {
                id: "cl-1".to_string(),
                project_id: "proj".to_string(),
                label: "Homepage".to_string(),
                description: None,
                created_by: Provenance::Pipeline,
                last_imported_at: 0,
            },
        )
        .unwrap();

        db.rename_grouping(GroupKind::Cluster, "cl-1", "Landing page", 50).unwrap();

        let g = db.get_grouping(GroupKind::Cluster, "cl-1").unwrap().unwrap();
        assert_eq!(g.label, "Landing page");
        assert_eq!(g.created_by, Provenance::Researcher);

        let edits = db.list_heading_edits("proj", GroupKind::Cluster).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].original_label, "Homepage");
        assert_eq!(edits[0].new_label, "Landing page");
        assert_eq!(edits[0].target_id, "cl-1");
    }

    #[test]
    fn test_resolve_conflict_unknown_id() {
        let db = Database::in_memory().unwrap();
        assert!(!db.resolve_conflict("nope", 10).unwrap());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let (db, q) = db_with_quote();
        let a = db.database_checksum().unwrap();
        let b = db.database_checksum().unwrap();
        assert_eq!(a, b);

        db.create_codebook_group(&CodebookGroup {
            id: "cb-1".to_string(),
            name: "Emotions".to_string(),
            sort_order: 0,
        })
        .unwrap();
        db.create_tag_definition(&TagDefinition {
            id: "tag-1".to_string(),
            group_id: "cb-1".to_string(),
            label: "frustration".to_string(),
            color: None,
            created_at: 0,
        })
        .unwrap();
        db.tag_quote(&q, "tag-1", 10).unwrap();
        let c = db.database_checksum().unwrap();
        assert_ne!(a, c);

        db.set_quote_starred(&q, true, 10).unwrap();
        let d = db.database_checksum().unwrap();
        assert_ne!(c, d);
    }
}
