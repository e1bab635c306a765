//! Catalog ingest system: private copy, normalization, marker guard

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::catalog::CatalogIndex;
use crate::data::RunState;
use crate::error::SystemResult;
use crate::systems::{lift_pipeline, System, SystemContext, SystemRunner};

/// Copies the supplied catalog tree into the working root, normalizes the
/// copy's directory names, and runs the marker-file guard. Runs first:
/// every later system resolves against the ingested copy.
#[derive(Debug)]
pub struct CatalogIngestSystem {
	/// Externally supplied catalog tree; read, never mutated
	pub catalog_source: PathBuf,
	/// Destination of the private copy under the working root
	pub catalog_root: PathBuf,
}

impl CatalogIngestSystem {
	pub fn new(catalog_source: PathBuf, catalog_root: PathBuf) -> Self {
		Self {
			catalog_source,
			catalog_root,
		}
	}
}

#[async_trait]
impl SystemRunner for CatalogIngestSystem {
	async fn run(&self, _state: &mut RunState, _context: &SystemContext) -> SystemResult<()> {
		let index = CatalogIndex::ingest(&self.catalog_source, &self.catalog_root)
			.map_err(|e| lift_pipeline(self.name(), e))?;
		index
			.verify_markers()
			.map_err(|e| lift_pipeline(self.name(), e))?;
		info!("Ingest: catalog ready at {}", self.catalog_root.display());
		Ok(())
	}

	fn can_run(&self, _state: &RunState) -> bool {
		// Ingest creates the catalog copy, no prerequisites
		true
	}

	fn priority(&self) -> u8 {
		255
	}

	fn name(&self) -> &'static str {
		"CatalogIngest"
	}
}

impl System for CatalogIngestSystem {
	fn required_columns(&self) -> &[&'static str] {
		&[]
	}

	fn description(&self) -> &'static str {
		"Copies the catalog tree into the working root, normalizes it, and verifies marker files"
	}
}
