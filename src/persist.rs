//! Checkpoint and report persistence (CSV + JSON run manifest)

use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, info};

use crate::data::{RecordSet, RunSummary, COL_BRAND_NAME, COL_DESCRIPTION, COL_KEY, COL_SITE_ID};
use crate::error::{PersistError, PersistResult};

/// Intermediate record checkpoint written between the parse and join phases.
pub const MASTER_FILE: &str = "MASTER.CSV";
/// Side report of records that never resolved to a catalog file.
pub const UNUSED_FILE: &str = "UNUSED.CSV";
/// Run manifest recording inputs, counts, and per-site outcomes.
pub const MANIFEST_FILE: &str = "RUN.json";

/// Manages the working root's persisted state: the `MASTER.CSV` record
/// checkpoint, the conditional `UNUSED.CSV` orphan report, and the
/// `RUN.json` manifest.
///
/// The checkpoint is a deliberate cut point: once written, it is the sole
/// source of truth for the join phase, which re-reads it rather than
/// trusting the in-memory parse result. All writes go through a temp file
/// and an atomic rename so a crashed run never leaves a half-written
/// checkpoint behind.
#[derive(Debug)]
pub struct CheckpointManager {
	pub working_root: PathBuf,
}

impl CheckpointManager {
	pub fn new(working_root: PathBuf) -> Self {
		Self { working_root }
	}

	pub fn master_path(&self) -> PathBuf {
		self.working_root.join(MASTER_FILE)
	}
	pub fn unused_path(&self) -> PathBuf {
		self.working_root.join(UNUSED_FILE)
	}
	pub fn manifest_path(&self) -> PathBuf {
		self.working_root.join(MANIFEST_FILE)
	}

	pub fn ensure_dir(&self) -> PersistResult<()> {
		fs::create_dir_all(&self.working_root)?;
		Ok(())
	}

	/// Persist the parsed record set as the `MASTER.CSV` checkpoint.
	pub fn save_master(&self, records: &RecordSet) -> PersistResult<()> {
		self.ensure_dir()?;
		atomic_write_csv(self.master_path(), records.data.clone())?;
		info!(
			"Persist: wrote {} ({} rows)",
			self.master_path().display(),
			records.height()
		);
		Ok(())
	}

	/// Load the checkpoint back. Every column is read as a string so site
	/// ids keep their leading zeros.
	pub fn load_master(&self) -> PersistResult<RecordSet> {
		let path = self.master_path();
		let df = CsvReader::from_path(&path)?
			.infer_schema(Some(0))
			.finish()?;
		validate_schema(&path, &df)?;
		debug!("Persist: loaded {} rows from {}", df.height(), path.display());
		Ok(RecordSet::from_dataframe(df))
	}

	/// Write the orphan report. Callers only invoke this with a non-empty
	/// set; [`CheckpointManager::clear_unused`] removes a stale report when
	/// the current run produced no orphans.
	pub fn save_unused(&self, records: &RecordSet) -> PersistResult<()> {
		self.ensure_dir()?;
		atomic_write_csv(self.unused_path(), records.data.clone())?;
		info!(
			"Persist: wrote {} ({} rows)",
			self.unused_path().display(),
			records.height()
		);
		Ok(())
	}

	/// Remove a leftover orphan report from an earlier run in this root.
	pub fn clear_unused(&self) -> PersistResult<()> {
		match fs::remove_file(self.unused_path()) {
			Ok(()) => {
				debug!("Persist: removed stale {}", self.unused_path().display());
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	pub fn save_manifest(&self, summary: &RunSummary) -> PersistResult<()> {
		self.ensure_dir()?;
		let bytes = serde_json::to_vec_pretty(summary)?;
		atomic_write(self.manifest_path(), "json.tmp", &bytes)?;
		debug!("Persist: wrote {}", self.manifest_path().display());
		Ok(())
	}

	pub fn load_manifest(&self) -> PersistResult<Option<RunSummary>> {
		let path = self.manifest_path();
		if !path.exists() {
			return Ok(None);
		}
		let bytes = fs::read(&path)?;
		Ok(Some(serde_json::from_slice(&bytes)?))
	}
}

fn validate_schema(path: &std::path::Path, df: &DataFrame) -> PersistResult<()> {
	for required in [COL_KEY, COL_DESCRIPTION, COL_BRAND_NAME, COL_SITE_ID] {
		if df.column(required).is_err() {
			return Err(PersistError::Malformed {
				path: path.to_path_buf(),
				reason: format!("missing column {}", required),
			});
		}
	}
	Ok(())
}

// Write to a temp file and atomically rename into place
fn atomic_write_csv(path: PathBuf, mut df: DataFrame) -> PersistResult<()> {
	let tmp = path.with_extension("csv.tmp");
	let mut f = File::create(&tmp)?;
	CsvWriter::new(&mut f).finish(&mut df)?;
	f.flush()?;
	f.sync_all()?;
	drop(f);

	cross_platform_atomic_rename(&tmp, &path)?;
	Ok(())
}

fn atomic_write(path: PathBuf, tmp_ext: &str, bytes: &[u8]) -> PersistResult<()> {
	let tmp = path.with_extension(tmp_ext);
	fs::write(&tmp, bytes)?;
	cross_platform_atomic_rename(&tmp, &path)?;
	Ok(())
}

// Cross-platform atomic rename that handles Windows limitations
fn cross_platform_atomic_rename(
	from: &std::path::Path,
	to: &std::path::Path,
) -> PersistResult<()> {
	#[cfg(windows)]
	{
		// On Windows, remove target file first if it exists
		if to.exists() {
			std::fs::remove_file(to)?;
		}
		std::fs::rename(from, to)?;
	}

	#[cfg(not(windows))]
	{
		// On Unix-like systems, rename is atomic even if target exists
		std::fs::rename(from, to)?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::{CompositeKey, PartRecord, SiteId};
	use tempfile::TempDir;

	fn record(key: &str, description: &str, site: &str) -> PartRecord {
		PartRecord {
			key: CompositeKey::parse(key).unwrap(),
			description: description.to_string(),
			brand_name: "ACME".to_string(),
			site_id: SiteId::parse(site).unwrap(),
		}
	}

	#[test_log::test]
	fn test_master_checkpoint_is_source_of_truth() {
		let work = TempDir::new().unwrap();
		let manager = CheckpointManager::new(work.path().to_path_buf());

		let records = RecordSet::from_records(&[
			record("A_12345_BR9", "BRAKE PAD, FRONT", "0105"),
			record("A_67890_BR9", "OIL FILTER", "0105"),
			record("A_12345_ZZ1", "BRAKE PAD, FRONT", "3256"),
		])
		.unwrap();
		manager.save_master(&records).unwrap();

		let loaded = manager.load_master().unwrap();
		assert_eq!(loaded.height(), 3);

		// Parse order survives, leading zeros survive, quoted commas survive
		let back = loaded.records().unwrap();
		assert_eq!(back[0].key.as_str(), "A_12345_BR9");
		assert_eq!(back[0].description, "BRAKE PAD, FRONT");
		assert_eq!(back[0].site_id.as_str(), "0105");
		assert_eq!(back[2].site_id.as_str(), "3256");
	}

	#[test_log::test]
	fn test_load_master_rejects_wrong_schema() {
		let work = TempDir::new().unwrap();
		let manager = CheckpointManager::new(work.path().to_path_buf());
		fs::write(manager.master_path(), "a,b\n1,2\n").unwrap();

		let err = manager.load_master().unwrap_err();
		assert!(matches!(err, PersistError::Malformed { .. }));
	}

	#[test]
	fn test_clear_unused_tolerates_absence() {
		let work = TempDir::new().unwrap();
		let manager = CheckpointManager::new(work.path().to_path_buf());
		manager.clear_unused().unwrap();

		fs::write(manager.unused_path(), "stale").unwrap();
		manager.clear_unused().unwrap();
		assert!(!manager.unused_path().exists());
	}

	#[test_log::test]
	fn test_manifest_round_trip() {
		let work = TempDir::new().unwrap();
		let manager = CheckpointManager::new(work.path().to_path_buf());
		assert!(manager.load_manifest().unwrap().is_none());

		let mut summary = RunSummary::new("/cat".to_string(), "/inv".to_string());
		summary.record_count = 3;
		summary.archived_sites.push("0105".to_string());
		manager.save_manifest(&summary).unwrap();

		let loaded = manager.load_manifest().unwrap().unwrap();
		assert_eq!(loaded.version, RunSummary::VERSION);
		assert_eq!(loaded.record_count, 3);
		assert_eq!(loaded.archived_sites, vec!["0105"]);
	}
}
