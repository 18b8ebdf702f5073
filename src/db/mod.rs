//! Durable storage. The per-day backup history lives in a single JSON file.

pub mod history;

pub use history::{HistoryError, HistoryRecord, HistoryStore, Outcome};
