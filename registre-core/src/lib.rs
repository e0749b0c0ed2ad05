//! Core types and export orchestration for the registre waste registry exporter.

/// Session memory of generated exports, used to recover from cooldown conflicts.
pub mod cache;
/// Spreadsheet parsing, column filters, and serialization.
pub mod dataset;
/// Domain models and identifiers.
pub mod model;
/// Trait describing the registry API and its error type.
pub mod ports;
/// High-level export service used by clients.
pub mod service;

pub use cache::*;
pub use dataset::*;
pub use model::*;
pub use ports::*;
pub use service::*;
