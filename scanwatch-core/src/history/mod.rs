//! Scan history: session cache, durable sink, and the store that merges them

mod cache;
mod durable;
mod entry;
mod store;

pub use cache::SessionCache;
pub use durable::{DurableSink, RestHistorySink};
pub use entry::{DurableRow, HistoryEntry};
pub use store::{reconcile, HistoryStore, SuppressionState};
