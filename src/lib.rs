//! Mnemon - outcome-driven memory engine for AI coding assistants
//!
//! Stores discrete units of context, retrieves the most relevant ones for a
//! query by fusing several ranking sources, learns which memories are
//! actually useful by attributing decision outcomes back to them, and
//! promotes memories through a temporal hierarchy on sustained evidence.

pub mod embedding;
pub mod error;
pub mod events;
pub mod fusion;
pub mod promotion;
pub mod retrieval;
pub mod storage;
pub mod tracking;
pub mod types;

pub use error::{MnemonError, Result};
pub use retrieval::{RetrievalResult, RetrievalService};
pub use tracking::DecisionTracker;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
