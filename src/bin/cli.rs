//! Verbatim CLI - command-line interface for the interview-analysis store
//!
//! Usage: verbatim-cli [OPTIONS] <COMMAND>
//!
//! Runs pipeline imports and the researcher-side edit operations against a
//! local SQLite database. Supports JSON output for scripting.

use clap::{Parser, Subcommand};
use verbatim_lib::db::{CodebookGroup, Database, GroupKind, Grouping, Provenance, TagDefinition};
use verbatim_lib::reconcile;
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Verbatim interview-analysis store CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path (default: auto-detect)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress output
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project
    AddProject {
        /// Project identifier
        id: String,
        /// Display name
        name: String,
    },
    /// Run one import pass from a pipeline artifact directory
    Import {
        /// Directory containing the pipeline's JSON artifacts
        #[arg(long)]
        dir: PathBuf,
        /// Project to reconcile into
        #[arg(long)]
        project: String,
    },
    /// List sessions in a project
    Sessions {
        #[arg(long)]
        project: String,
    },
    /// List quotes in a project
    Quotes {
        #[arg(long)]
        project: String,
        /// Only quotes of this session (by pipeline session id)
        #[arg(long)]
        session: Option<String>,
        /// Only quotes not sorted into any group of this kind (cluster|theme)
        #[arg(long)]
        unsorted: Option<String>,
    },
    /// List clusters or themes in a project
    Groups {
        #[arg(long)]
        project: String,
        /// cluster|theme
        #[arg(long)]
        kind: String,
    },
    /// Print a session's transcript
    Transcript {
        #[arg(long)]
        project: String,
        /// Pipeline session id
        session: String,
    },
    /// List people known to this database
    People,
    /// Edit a person's display name or role
    EditPerson {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        role: Option<String>,
    },
    /// List the codebook's tag definitions
    Tags,
    /// List import conflicts for a project
    Conflicts {
        #[arg(long)]
        project: String,
        /// Include conflicts already marked resolved
        #[arg(long)]
        all: bool,
    },
    /// Mark a conflict as resolved
    Resolve {
        conflict_id: String,
    },
    /// Attach a codebook tag to a quote
    Tag {
        quote_id: String,
        tag_id: String,
    },
    /// Detach a codebook tag from a quote
    Untag {
        quote_id: String,
        tag_id: String,
    },
    /// Star a quote (or un-star with --off)
    Star {
        quote_id: String,
        #[arg(long)]
        off: bool,
    },
    /// Hide a quote (or un-hide with --off)
    Hide {
        quote_id: String,
        #[arg(long)]
        off: bool,
    },
    /// Record a corrected transcription for a quote
    EditText {
        quote_id: String,
        text: String,
    },
    /// Remove a sentiment badge from a quote
    DropBadge {
        quote_id: String,
        badge: String,
    },
    /// Rename a cluster or theme
    Rename {
        /// cluster|theme
        #[arg(long)]
        kind: String,
        group_id: String,
        new_label: String,
    },
    /// Move a quote into a cluster or theme by hand
    MoveQuote {
        /// cluster|theme
        #[arg(long)]
        kind: String,
        quote_id: String,
        group_id: String,
    },
    /// Remove a quote from its cluster or theme
    Unsort {
        /// cluster|theme
        #[arg(long)]
        kind: String,
        quote_id: String,
    },
    /// Create a cluster or theme by hand
    AddGroup {
        #[arg(long)]
        project: String,
        /// cluster|theme
        #[arg(long)]
        kind: String,
        label: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Create a codebook group
    AddCodebookGroup {
        id: String,
        name: String,
        #[arg(long, default_value_t = 0)]
        sort_order: i32,
    },
    /// Create a tag definition inside a codebook group
    AddTag {
        /// Codebook group the tag belongs to
        #[arg(long)]
        group: String,
        label: String,
        #[arg(long)]
        color: Option<String>,
    },
}

fn resolve_db_path(flag: Option<String>) -> PathBuf {
    if let Some(path) = flag {
        return PathBuf::from(path);
    }
    // In development, use local data/verbatim.db if it exists
    let local_db = PathBuf::from("data/verbatim.db");
    if local_db.exists() {
        return local_db;
    }
    let dir = dirs::data_dir()
        .map(|p| p.join("verbatim"))
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).ok();
    dir.join("verbatim.db")
}

fn parse_kind(s: &str) -> Result<GroupKind, String> {
    GroupKind::from_str(s).ok_or_else(|| format!("unknown group kind '{}', expected cluster or theme", s))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn main() {
    let cli = Cli::parse();

    let db_path = resolve_db_path(cli.db.clone());
    let db = match Database::new(&db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open database {:?}: {}", db_path, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&cli, &db) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, db: &Database) -> Result<(), String> {
    match &cli.command {
        Commands::AddProject { id, name } => {
            db.create_project(id, name, now_millis()).map_err(|e| e.to_string())?;
            if !cli.quiet {
                println!("Created project '{}'", id);
            }
        }

        Commands::Import { dir, project } => {
            let quiet = cli.quiet;
            let progress = move |msg: &str| {
                if !quiet {
                    eprintln!("{}", msg);
                }
            };
            let summary = reconcile::run_pass_from_dir(db, project, dir, &progress)
                .map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?);
            } else {
                println!(
                    "Imported into '{}': sessions +{}/~{}, quotes +{}/~{}, clusters +{}/~{}, themes +{}/~{}",
                    project,
                    summary.sessions.inserted, summary.sessions.refreshed,
                    summary.quotes.inserted, summary.quotes.refreshed,
                    summary.clusters.inserted, summary.clusters.refreshed,
                    summary.themes.inserted, summary.themes.refreshed,
                );
                println!(
                    "Swept: {} quotes, {} clusters, {} themes, {} sessions",
                    summary.swept.quotes, summary.swept.clusters, summary.swept.themes, summary.swept.sessions
                );
                if summary.new_conflicts > 0 {
                    println!(
                        "{} new conflict(s) recorded; run `verbatim-cli conflicts --project {}`",
                        summary.new_conflicts, project
                    );
                }
            }
        }

        Commands::Sessions { project } => {
            let sessions = db.list_sessions(project).map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sessions).map_err(|e| e.to_string())?);
            } else {
                for s in &sessions {
                    println!(
                        "{}  [{}]  {}",
                        s.id,
                        s.source_key,
                        s.title.as_deref().unwrap_or("(untitled)")
                    );
                }
                println!("{} session(s)", sessions.len());
            }
        }

        Commands::Quotes { project, session, unsorted } => {
            let quotes = match (unsorted, session) {
                (Some(kind), session) => {
                    let kind = parse_kind(kind)?;
                    let quotes = db.quotes_without_group(project, kind).map_err(|e| e.to_string())?;
                    match session {
                        Some(key) => {
                            let session = db
                                .get_session_by_source_key(project, key)
                                .map_err(|e| e.to_string())?
                                .ok_or_else(|| format!("no session with id '{}'", key))?;
                            quotes.into_iter().filter(|q| q.session_id == session.id).collect()
                        }
                        None => quotes,
                    }
                }
                (None, Some(key)) => {
                    let session = db
                        .get_session_by_source_key(project, key)
                        .map_err(|e| e.to_string())?
                        .ok_or_else(|| format!("no session with id '{}'", key))?;
                    db.quotes_for_session(&session.id).map_err(|e| e.to_string())?
                }
                (None, None) => db.list_quotes(project).map_err(|e| e.to_string())?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&quotes).map_err(|e| e.to_string())?);
            } else {
                for q in &quotes {
                    let badge = q.sentiment.as_deref().unwrap_or("-");
                    println!("{}  {:>8.1}s  [{}]  {}", q.id, q.start_secs, badge, q.text);
                }
                println!("{} quote(s)", quotes.len());
            }
        }

        Commands::Groups { project, kind } => {
            let kind = parse_kind(kind)?;
            let groups = db.list_groupings(project, kind).map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&groups).map_err(|e| e.to_string())?);
            } else {
                for g in &groups {
                    println!("{}  [{}]  {}", g.id, g.created_by.as_str(), g.label);
                }
                println!("{} {}(s)", groups.len(), kind.as_str());
            }
        }

        Commands::Transcript { project, session } => {
            let session = db
                .get_session_by_source_key(project, session)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no session with id '{}'", session))?;
            let segments = db.list_segments(&session.id).map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&segments).map_err(|e| e.to_string())?);
            } else {
                let topics = db.list_topic_boundaries(&session.id).map_err(|e| e.to_string())?;
                let mut topics = topics.iter().peekable();
                for seg in &segments {
                    while let Some(topic) = topics.peek() {
                        if topic.start_secs > seg.start_secs {
                            break;
                        }
                        println!("--- {} ---", topic.label);
                        topics.next();
                    }
                    println!("[{:>8.1}s] {}: {}", seg.start_secs, seg.speaker_code, seg.text);
                }
            }
        }

        Commands::People => {
            let people = db.list_people().map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&people).map_err(|e| e.to_string())?);
            } else {
                for p in &people {
                    println!("{}  {}  ({})", p.id, p.display_name, p.role.as_deref().unwrap_or("-"));
                }
                println!("{} person(s)", people.len());
            }
        }

        Commands::EditPerson { id, name, role } => {
            db.update_person(id, name, role.as_deref(), now_millis()).map_err(|e| e.to_string())?;
        }

        Commands::Tags => {
            let tags = db.list_tag_definitions().map_err(|e| e.to_string())?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tags).map_err(|e| e.to_string())?);
            } else {
                for t in &tags {
                    println!("{}  {}  [{}]", t.id, t.label, t.group_id);
                }
                println!("{} tag(s)", tags.len());
            }
        }

        Commands::Conflicts { project, all } => {
            let conflicts = if *all {
                db.list_conflicts(project).map_err(|e| e.to_string())?
            } else {
                db.unresolved_conflicts(project).map_err(|e| e.to_string())?
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&conflicts).map_err(|e| e.to_string())?);
            } else {
                for c in &conflicts {
                    let status = if c.resolved { "resolved" } else { "open" };
                    println!("{}  [{}] [{}]  {}", c.id, c.entity_kind, status, c.description);
                }
                println!("{} conflict(s)", conflicts.len());
            }
        }

        Commands::Resolve { conflict_id } => {
            let found = db.resolve_conflict(conflict_id, now_millis()).map_err(|e| e.to_string())?;
            if !found {
                return Err(format!("no conflict with id '{}'", conflict_id));
            }
            if !cli.quiet {
                println!("Resolved {}", conflict_id);
            }
        }

        Commands::Tag { quote_id, tag_id } => {
            db.tag_quote(quote_id, tag_id, now_millis()).map_err(|e| e.to_string())?;
        }
        Commands::Untag { quote_id, tag_id } => {
            db.untag_quote(quote_id, tag_id).map_err(|e| e.to_string())?;
        }
        Commands::Star { quote_id, off } => {
            db.set_quote_starred(quote_id, !off, now_millis()).map_err(|e| e.to_string())?;
        }
        Commands::Hide { quote_id, off } => {
            db.set_quote_hidden(quote_id, !off, now_millis()).map_err(|e| e.to_string())?;
        }
        Commands::EditText { quote_id, text } => {
            db.edit_quote_text(quote_id, text, now_millis()).map_err(|e| e.to_string())?;
        }
        Commands::DropBadge { quote_id, badge } => {
            db.delete_sentiment_badge(quote_id, badge, now_millis()).map_err(|e| e.to_string())?;
        }

        Commands::Rename { kind, group_id, new_label } => {
            let kind = parse_kind(kind)?;
            db.rename_grouping(kind, group_id, new_label, now_millis()).map_err(|e| e.to_string())?;
            if !cli.quiet {
                println!("Renamed {} to '{}'", group_id, new_label);
            }
        }
        Commands::MoveQuote { kind, quote_id, group_id } => {
            let kind = parse_kind(kind)?;
            db.move_quote(kind, quote_id, group_id, now_millis()).map_err(|e| e.to_string())?;
        }
        Commands::Unsort { kind, quote_id } => {
            let kind = parse_kind(kind)?;
            db.unsort_quote(kind, quote_id).map_err(|e| e.to_string())?;
        }

        Commands::AddGroup { project, kind, label, description } => {
            let kind = parse_kind(kind)?;
            let id = uuid::Uuid::new_v4().to_string();
            db.create_grouping(
                kind,
                &Grouping {
                    id: id.clone(),
                    project_id: project.clone(),
                    label: label.clone(),
                    description: description.clone(),
                    created_by: Provenance::Researcher,
                    last_imported_at: 0,
                },
            )
            .map_err(|e| e.to_string())?;
            println!("{}", id);
        }
        Commands::AddCodebookGroup { id, name, sort_order } => {
            db.create_codebook_group(&CodebookGroup {
                id: id.clone(),
                name: name.clone(),
                sort_order: *sort_order,
            })
            .map_err(|e| e.to_string())?;
        }
        Commands::AddTag { group, label, color } => {
            let id = uuid::Uuid::new_v4().to_string();
            db.create_tag_definition(&TagDefinition {
                id: id.clone(),
                group_id: group.clone(),
                label: label.clone(),
                color: color.clone(),
                created_at: now_millis(),
            })
            .map_err(|e| e.to_string())?;
            println!("{}", id);
        }
    }

    Ok(())
}
