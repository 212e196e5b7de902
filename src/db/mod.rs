mod schema;
mod models;

pub use schema::Database;
pub use models::{
    CodebookGroup, DeletedBadge, GroupAssignment, GroupKind, Grouping, HeadingEdit,
    ImportConflict, Person, Project, Provenance, Quote, QuoteEdit, QuoteState, QuoteTag,
    Session, SessionSpeaker, SourceFile, TagDefinition, TopicBoundary, TranscriptSegment,
};
