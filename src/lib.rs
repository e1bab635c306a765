//! # Parts Catalog Update Broadcast Pipeline
//!
//! Joins per-site parts-inventory records against a master parts catalog
//! and emits one deployable `UP####.ZIP` archive per site, containing only
//! the catalog files that site's inventory references. Polars DataFrames
//! hold the intermediate record set; everything runs as sequential systems
//! on a background engine that streams progress events to the caller.

pub mod archive;
pub mod catalog;
pub mod data;
pub mod engine;
pub mod error;
pub mod persist;
pub mod pipeline;
pub mod systems;

// Re-export main API types
pub use catalog::CatalogIndex;
pub use data::{CompositeKey, PartRecord, RecordSet, RunState, RunSummary, SiteId};
pub use engine::{BroadcastEngine, PipelineEvent};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{dispatch_processed, Pipeline, PipelineConfig};
pub use systems::{SystemContext, SystemProgress};
