//! Orphan report system

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::catalog::CatalogIndex;
use crate::data::{RecordSet, RunState};
use crate::error::SystemResult;
use crate::persist::CheckpointManager;
use crate::systems::{lift_pipeline, System, SystemContext, SystemRunner};

/// Re-checks every record in the full record set against the final catalog
/// state and writes the ones that resolve to zero files into `UNUSED.CSV`.
/// Runs last so the report reflects the catalog as the archives saw it.
/// The report only exists when there is something to report.
#[derive(Debug)]
pub struct OrphanReportSystem {
	pub catalog_root: PathBuf,
	checkpoint: CheckpointManager,
}

impl OrphanReportSystem {
	pub fn new(catalog_root: PathBuf, working_root: PathBuf) -> Self {
		Self {
			catalog_root,
			checkpoint: CheckpointManager::new(working_root),
		}
	}
}

#[async_trait]
impl SystemRunner for OrphanReportSystem {
	async fn run(&self, state: &mut RunState, _context: &SystemContext) -> SystemResult<()> {
		let index = CatalogIndex::open(self.catalog_root.clone());

		let mut unused = Vec::new();
		for record in state
			.records
			.records()
			.map_err(|e| lift_pipeline(self.name(), e))?
		{
			let resolved = index
				.resolve(&record.key)
				.map_err(|e| lift_pipeline(self.name(), e))?;
			if resolved.is_empty() {
				unused.push(record);
			}
		}

		state.summary.orphan_count = unused.len();
		if unused.is_empty() {
			self.checkpoint.clear_unused()?;
			info!("Orphans: every record resolved");
			return Ok(());
		}

		let report =
			RecordSet::from_records(&unused).map_err(|e| lift_pipeline(self.name(), e))?;
		self.checkpoint.save_unused(&report)?;
		info!("Orphans: {} unresolved records reported", unused.len());
		Ok(())
	}

	fn can_run(&self, state: &RunState) -> bool {
		!state.records.is_empty()
	}

	fn priority(&self) -> u8 {
		50
	}

	fn name(&self) -> &'static str {
		"OrphanReport"
	}
}

impl System for OrphanReportSystem {
	fn required_columns(&self) -> &[&'static str] {
		&[
			crate::data::COL_KEY,
			crate::data::COL_DESCRIPTION,
			crate::data::COL_BRAND_NAME,
			crate::data::COL_SITE_ID,
		]
	}

	fn description(&self) -> &'static str {
		"Reports records whose composite key resolved to no catalog files"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::{CompositeKey, PartRecord, RunState, RunSummary, SiteId};
	use polars::prelude::SerReader;
	use std::fs;
	use tempfile::TempDir;

	fn record(key: &str, site: &str) -> PartRecord {
		PartRecord {
			key: CompositeKey::parse(key).unwrap(),
			description: "desc".to_string(),
			brand_name: "brand".to_string(),
			site_id: SiteId::parse(site).unwrap(),
		}
	}

	fn state_with(records: &[PartRecord]) -> RunState {
		let mut state =
			RunState::new(RunSummary::new("cat".to_string(), "inv".to_string())).unwrap();
		state.records = RecordSet::from_records(records).unwrap();
		state
	}

	#[smol_potat::test]
	async fn test_orphans_partition_the_record_set() {
		let catalog = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		fs::create_dir_all(catalog.path().join("A_12345")).unwrap();
		fs::write(catalog.path().join("A_12345/A_12345_BR9.DBF"), b"dbf").unwrap();

		let mut state = state_with(&[
			record("A_12345_BR9", "0105"),
			record("A_99999_XX0", "0105"),
			record("A_12345_ZZ7", "3256"),
		]);

		let system =
			OrphanReportSystem::new(catalog.path().to_path_buf(), work.path().to_path_buf());
		system.run(&mut state, &SystemContext::new()).await.unwrap();

		// One key resolves; the directory-missing and prefix-missing keys
		// are both orphans
		assert_eq!(state.summary.orphan_count, 2);
		let report = CheckpointManager::new(work.path().to_path_buf());
		let rows = RecordSet::from_dataframe(
			polars::prelude::CsvReader::from_path(report.unused_path())
				.unwrap()
				.infer_schema(Some(0))
				.finish()
				.unwrap(),
		);
		let keys: Vec<String> = rows
			.records()
			.unwrap()
			.iter()
			.map(|r| r.key.as_str().to_string())
			.collect();
		assert_eq!(keys, vec!["A_99999_XX0", "A_12345_ZZ7"]);
	}

	#[smol_potat::test]
	async fn test_no_orphans_no_report_and_stale_removed() {
		let catalog = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		fs::create_dir_all(catalog.path().join("A_12345")).unwrap();
		fs::write(catalog.path().join("A_12345/A_12345_BR9.DBF"), b"dbf").unwrap();

		// Stale report from an earlier run in the same root
		fs::write(work.path().join("UNUSED.CSV"), "stale").unwrap();

		let mut state = state_with(&[record("A_12345_BR9", "0105")]);
		let system =
			OrphanReportSystem::new(catalog.path().to_path_buf(), work.path().to_path_buf());
		system.run(&mut state, &SystemContext::new()).await.unwrap();

		assert_eq!(state.summary.orphan_count, 0);
		assert!(!work.path().join("UNUSED.CSV").exists());
	}
}
