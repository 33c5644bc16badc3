//! Validation batches over reference pages

pub mod orchestrator;
pub mod session;
pub mod sets;
pub mod stats;

pub use orchestrator::{BatchOptions, BatchSummary, ErrorPolicy, ValidationOrchestrator};
pub use session::SessionState;
pub use sets::{SetDefinition, SetSummary, ValidationCatalog};
pub use stats::{BatchStats, StatsAggregator};
