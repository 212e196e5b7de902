pub mod artifacts;
pub mod db;
pub mod reconcile;
pub mod stable_key;
pub mod sweep;
pub mod upsert;

pub use artifacts::{ArtifactError, ArtifactSet};
pub use db::Database;
pub use reconcile::{run_pass, run_pass_from_dir, PassError, PassSummary};
