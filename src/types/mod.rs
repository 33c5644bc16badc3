//! Type definitions for validation sessions

pub mod page;

pub use page::{PagePredictions, PageRecord};
