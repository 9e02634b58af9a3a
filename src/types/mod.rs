//! Type definitions for the waste classifier service

pub mod label;
pub mod prediction;

pub use label::WasteClass;
pub use prediction::{HistoryEntry, PredictionRecord, PredictionSummary};
