#![doc = include_str!("../README.md")]
// Declare modules
pub mod bitmap;
pub mod error;
pub mod flusher;
pub mod grouping;
pub mod index;
pub mod metadata;
pub mod store;
pub mod tag_index;
pub mod telemetry;
pub mod types;

/// Compressed series ID set.
pub use crate::bitmap::SeriesIdBitmap;
/// Error type for index operations.
pub use crate::error::IndexError;
/// Flush collaborator and the reference section writer.
pub use crate::flusher::{Flusher, SectionFlusher};
/// Per-query group-by context.
pub use crate::grouping::{GroupingContext, TagValuesEntrySet};
/// Main entry point: the per-shard tag inverted index.
pub use crate::index::{IndexConfig, IndexStats, InvertedIndex};
/// ID-minting collaborator.
pub use crate::metadata::{InMemoryMetadata, Metadata, MetadataLimits};
/// Outer tag key => tag index map.
pub use crate::store::TagIndexStore;
/// Inverted index of a single tag key.
pub use crate::tag_index::TagIndex;
/// Structured event hook for observability.
pub use crate::telemetry::{IndexEvent, IndexEventListener};
/// ID aliases and the tag set type.
pub use crate::types::{SeriesId, TagKeyId, TagSet, TagValueId, TAGLESS_TAG_KEY_ID};
