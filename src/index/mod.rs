//! Vector index and case metadata storage

mod metadata;
mod vector;

pub use metadata::CaseMetadataStore;
pub use vector::VectorIndex;
