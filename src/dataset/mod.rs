//! Dataset loading.

pub mod loader;

pub use loader::{load_csv, load_csv_async, load_from_reader, LoadSummary, LoadedDataset};
