//! Ingestion for the weir relay engine: turns the merged, untrusted relay
//! event stream into deduplicated, reference-indexed storage writes.
//!
//! Events are identity-validated at the pipeline ingress, batched through
//! a bounded buffer, and written events-first/references-second per batch.
//! Storage itself is an external collaborator behind [`EventStore`].

pub mod error;
pub mod pipeline;
pub mod refs;
pub mod store;

pub use error::{IngestError, Result};
pub use pipeline::{IngestHandle, IngestOutcome, IngestionPipeline, PipelineConfig, PipelineStats};
pub use refs::{
    EventReference, HashtagReference, Marker, PubkeyReference, References, extract_references,
};
pub use store::{EventStore, MemoryStore};
