//! Inventory record parser system

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::data::{CompositeKey, PartRecord, RecordSet, RunState, SiteId};
use crate::error::{SystemError, SystemResult};
use crate::persist::CheckpointManager;
use crate::systems::{lift_pipeline, System, SystemContext, SystemProgress, SystemRunner};

/// Parses every `PART####.DAT` inventory file, persists the record set as
/// the `MASTER.CSV` checkpoint, and reloads the checkpoint into the run
/// state. The checkpoint, not the in-memory parse result, is what the
/// join phase consumes.
#[derive(Debug)]
pub struct RecordParseSystem {
	/// Directory of `PART####.DAT` flat files; read, never mutated
	pub inventory_source: PathBuf,
	checkpoint: CheckpointManager,
}

impl RecordParseSystem {
	pub fn new(inventory_source: PathBuf, working_root: PathBuf) -> Self {
		Self {
			inventory_source,
			checkpoint: CheckpointManager::new(working_root),
		}
	}

	/// Inventory files with a well-formed name, sorted by filename so
	/// parse order (and with it checkpoint row order) is deterministic.
	fn inventory_files(&self) -> SystemResult<Vec<(SiteId, PathBuf)>> {
		let entries = match fs::read_dir(&self.inventory_source) {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				return Err(SystemError::InputMissing {
					path: self.inventory_source.clone(),
				});
			}
			Err(e) => return Err(e.into()),
		};

		let mut files = Vec::new();
		for entry in entries {
			let entry = entry?;
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			if let Some(site) = SiteId::from_inventory_filename(name) {
				files.push((site, entry.path()));
			} else {
				debug!("Parse: ignoring {} (name does not match)", name);
			}
		}
		if files.is_empty() {
			return Err(SystemError::InputMissing {
				path: self.inventory_source.clone(),
			});
		}
		files.sort_by(|a, b| a.1.cmp(&b.1));
		Ok(files)
	}

	/// Parse one flat file. First line is a header; fields are positional
	/// (raw part code, description, brand code, brand name at indices
	/// 2..=5) so rows short of six fields are skipped with a warning and
	/// extra trailing fields are tolerated.
	fn parse_file(&self, site: &SiteId, path: &Path) -> SystemResult<Vec<PartRecord>> {
		let content = fs::read_to_string(path)?;
		let mut records = Vec::new();
		for (line_no, line) in content.lines().enumerate().skip(1) {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			let fields: Vec<&str> = line.split(',').collect();
			if fields.len() < 6 {
				warn!(
					"Parse: {}:{} has {} fields, skipping row",
					path.display(),
					line_no + 1,
					fields.len()
				);
				continue;
			}
			let raw_part_code = strip_quotes(fields[2]);
			let description = strip_quotes(fields[3]);
			let brand_code = strip_quotes(fields[4]);
			let brand_name = strip_quotes(fields[5]);

			let Some(key) = CompositeKey::from_raw_fields(raw_part_code, brand_code) else {
				warn!(
					"Parse: {}:{} has malformed part/brand codes {:?}/{:?}, skipping row",
					path.display(),
					line_no + 1,
					raw_part_code,
					brand_code
				);
				continue;
			};
			records.push(PartRecord {
				key,
				description: description.to_string(),
				brand_name: brand_name.to_string(),
				site_id: site.clone(),
			});
		}
		Ok(records)
	}
}

fn strip_quotes(field: &str) -> &str {
	field.trim_matches('"')
}

#[async_trait]
impl SystemRunner for RecordParseSystem {
	async fn run(&self, state: &mut RunState, context: &SystemContext) -> SystemResult<()> {
		let files = self.inventory_files()?;
		info!("Parse: {} inventory files", files.len());

		let mut progress = SystemProgress::new(self.name().to_string(), files.len());
		let mut parsed = Vec::new();
		for (i, (site, path)) in files.iter().enumerate() {
			context.ensure_not_cancelled(self.name())?;
			info!("Parse: processing {}", path.display());
			parsed.extend(self.parse_file(site, path)?);
			progress.update(i + 1, Some(site.to_string()));
			context.report_progress(progress.clone());
		}

		if parsed.is_empty() {
			// Matching files existed but carried no data rows; same abort
			// as an empty inventory directory
			return Err(SystemError::InputMissing {
				path: self.inventory_source.clone(),
			});
		}

		let records =
			RecordSet::from_records(&parsed).map_err(|e| lift_pipeline(self.name(), e))?;
		self.checkpoint.save_master(&records)?;

		// Reload from disk: the checkpoint is the sole source of truth
		// for everything downstream
		state.records = self.checkpoint.load_master()?;
		state.summary.record_count = state.records.height();
		state.summary.site_count = state
			.records
			.site_ids()
			.map_err(|e| lift_pipeline(self.name(), e))?
			.len();
		info!(
			"Parse: {} records across {} sites",
			state.summary.record_count, state.summary.site_count
		);
		Ok(())
	}

	fn can_run(&self, _state: &RunState) -> bool {
		true
	}

	fn priority(&self) -> u8 {
		250
	}

	fn name(&self) -> &'static str {
		"RecordParse"
	}
}

impl System for RecordParseSystem {
	fn required_columns(&self) -> &[&'static str] {
		&[]
	}

	fn description(&self) -> &'static str {
		"Parses inventory flat files and persists the MASTER.CSV record checkpoint"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::{RunState, RunSummary};
	use tempfile::TempDir;

	const HEADER: &str = "LINE,QTY,PART,DESC,BRAND,BRANDNAME\n";

	fn state() -> RunState {
		RunState::new(RunSummary::new("cat".to_string(), "inv".to_string())).unwrap()
	}

	fn system(inventory: &Path, work: &Path) -> RecordParseSystem {
		RecordParseSystem::new(inventory.to_path_buf(), work.to_path_buf())
	}

	#[smol_potat::test]
	async fn test_parse_extracts_site_id_from_filename() {
		let inventory = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		fs::write(
			inventory.path().join("PART0105.DAT"),
			format!("{HEADER}1,2,\"A_12345\",\"BRAKE PAD\",\"BR9\",\"ACME\"\n"),
		)
		.unwrap();
		fs::write(
			inventory.path().join("PART3256.DAT"),
			format!("{HEADER}1,2,\"A_67890\",\"OIL FILTER\",\"ZZ1\",\"ZENITH\"\n"),
		)
		.unwrap();
		// Non-matching names are ignored
		fs::write(inventory.path().join("NOTES.TXT"), "ignore me").unwrap();

		let mut state = state();
		system(inventory.path(), work.path())
			.run(&mut state, &SystemContext::new())
			.await
			.unwrap();

		let records = state.records.records().unwrap();
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].site_id.as_str(), "0105");
		assert_eq!(records[0].key.as_str(), "A_12345_BR9");
		assert_eq!(records[0].brand_name, "ACME");
		assert_eq!(records[1].site_id.as_str(), "3256");
	}

	#[smol_potat::test]
	async fn test_parse_skips_malformed_rows() {
		let inventory = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		fs::write(
			inventory.path().join("PART0105.DAT"),
			format!(
				"{HEADER}\
				 1,2,\"A_12345\",\"GOOD ROW\",\"BR9\",\"ACME\"\n\
				 1,2,\"A_99999\",\"SHORT ROW\"\n\
				 \n\
				 1,2,\"A_67890\",\"EXTRA FIELDS\",\"ZZ1\",\"ZENITH\",\"SPARE\",\"MORE\"\n"
			),
		)
		.unwrap();

		let mut state = state();
		system(inventory.path(), work.path())
			.run(&mut state, &SystemContext::new())
			.await
			.unwrap();

		// Short row skipped, blank line skipped, extra-field row kept
		let keys: Vec<String> = state
			.records
			.records()
			.unwrap()
			.iter()
			.map(|r| r.key.as_str().to_string())
			.collect();
		assert_eq!(keys, vec!["A_12345_BR9", "A_67890_ZZ1"]);
	}

	#[smol_potat::test]
	async fn test_parse_aborts_on_missing_or_empty_inventory() {
		let work = TempDir::new().unwrap();

		let missing = work.path().join("nope");
		let err = system(&missing, work.path())
			.run(&mut state(), &SystemContext::new())
			.await
			.unwrap_err();
		assert!(matches!(err, SystemError::InputMissing { .. }));

		let empty = TempDir::new().unwrap();
		let err = system(empty.path(), work.path())
			.run(&mut state(), &SystemContext::new())
			.await
			.unwrap_err();
		assert!(matches!(err, SystemError::InputMissing { .. }));

		// A directory with files but none matching the pattern also aborts
		let unmatched = TempDir::new().unwrap();
		fs::write(unmatched.path().join("PART105.DAT"), "x").unwrap();
		let err = system(unmatched.path(), work.path())
			.run(&mut state(), &SystemContext::new())
			.await
			.unwrap_err();
		assert!(matches!(err, SystemError::InputMissing { .. }));
	}

	#[smol_potat::test]
	async fn test_checkpoint_written_before_state_loaded() {
		let inventory = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		fs::write(
			inventory.path().join("PART0105.DAT"),
			format!("{HEADER}1,2,\"A_12345\",\"BRAKE PAD\",\"BR9\",\"ACME\"\n"),
		)
		.unwrap();

		let mut state = state();
		system(inventory.path(), work.path())
			.run(&mut state, &SystemContext::new())
			.await
			.unwrap();

		assert!(work.path().join("MASTER.CSV").is_file());
		assert_eq!(state.summary.record_count, 1);
		assert_eq!(state.summary.site_count, 1);
	}
}
