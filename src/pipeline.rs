//! Main API for the update-build pipeline

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::catalog::copy_tree;
use crate::data::{RunState, RunSummary};
use crate::error::{PipelineError, PipelineResult};
use crate::persist::CheckpointManager;
use crate::systems::{
	AllowlistRouteSystem, CatalogIngestSystem, OrphanReportSystem, RecordParseSystem,
	SiteBuildSystem, SystemContext, SystemScheduler,
};

/// Staging area under the working root.
pub const UPDATE_DIR: &str = "UPDATE";
/// Finished archives accumulate here, under the staging area.
pub const PROCESSED_DIR: &str = "PROCESSED";
/// Allowlisted archives are re-routed here, under the staging area.
pub const ALLOWLIST_DIR: &str = "ALLOWLIST";
/// Private normalized catalog copy under the working root.
pub const CATALOG_DIR: &str = "CATALOG";
/// Single-run guard file under the working root.
pub const LOCK_FILE: &str = ".partcast.lock";

/// Everything a run needs from the caller: the working root that owns all
/// intermediate and output state, the two source trees, and the optional
/// allowlist. The process current directory is never consulted.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
	pub working_root: PathBuf,
	pub catalog_source: PathBuf,
	pub inventory_source: PathBuf,
	pub allowlist: Option<PathBuf>,
}

impl PipelineConfig {
	pub fn new(working_root: PathBuf, catalog_source: PathBuf, inventory_source: PathBuf) -> Self {
		Self {
			working_root,
			catalog_source,
			inventory_source,
			allowlist: None,
		}
	}

	pub fn with_allowlist(mut self, allowlist: PathBuf) -> Self {
		self.allowlist = Some(allowlist);
		self
	}

	pub fn catalog_root(&self) -> PathBuf {
		self.working_root.join(CATALOG_DIR)
	}
	pub fn update_dir(&self) -> PathBuf {
		self.working_root.join(UPDATE_DIR)
	}
	pub fn processed_dir(&self) -> PathBuf {
		self.update_dir().join(PROCESSED_DIR)
	}
	pub fn allowlist_dir(&self) -> PathBuf {
		self.update_dir().join(ALLOWLIST_DIR)
	}
	pub fn lock_path(&self) -> PathBuf {
		self.working_root.join(LOCK_FILE)
	}
}

/// A configured update-build run: ingest, parse, per-site build, optional
/// allowlist routing, orphan report, executed once in that order.
pub struct Pipeline {
	pub config: PipelineConfig,
	pub state: RunState,
	pub scheduler: SystemScheduler,
}

impl Pipeline {
	pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
		let summary = RunSummary::new(
			config.catalog_source.display().to_string(),
			config.inventory_source.display().to_string(),
		);
		let state = RunState::new(summary)?;

		// Registration order is the pipeline state machine
		let mut scheduler = SystemScheduler::new();
		scheduler.add_system(CatalogIngestSystem::new(
			config.catalog_source.clone(),
			config.catalog_root(),
		));
		scheduler.add_system(RecordParseSystem::new(
			config.inventory_source.clone(),
			config.working_root.clone(),
		));
		scheduler.add_system(SiteBuildSystem::new(
			config.inventory_source.clone(),
			config.catalog_root(),
			config.update_dir(),
			config.processed_dir(),
		));
		scheduler.add_system(AllowlistRouteSystem::new(
			config.allowlist.clone(),
			config.processed_dir(),
			config.allowlist_dir(),
		));
		scheduler.add_system(OrphanReportSystem::new(
			config.catalog_root(),
			config.working_root.clone(),
		));

		Ok(Self {
			config,
			state,
			scheduler,
		})
	}

	/// Drive the whole run under the single-run guard and persist the run
	/// manifest on completion.
	///
	/// A clean pipeline pass returns `Ok` even when individual sites
	/// failed: per-site failures are isolated and land in
	/// [`RunSummary::failed_sites`]. Only fatal conditions (missing input,
	/// failed validation, cancellation, I/O outside a site's boundary)
	/// return `Err`.
	pub async fn run_all(&mut self, context: &SystemContext) -> PipelineResult<RunSummary> {
		fs::create_dir_all(&self.config.working_root)?;
		let _guard = RunGuard::acquire(self.config.lock_path())?;

		info!(
			"Pipeline: run started (catalog {}, inventory {})",
			self.config.catalog_source.display(),
			self.config.inventory_source.display()
		);
		self.scheduler.run_all(&mut self.state, context).await?;

		self.state.summary.finished_at = Some(Utc::now());
		CheckpointManager::new(self.config.working_root.clone())
			.save_manifest(&self.state.summary)?;
		info!(
			"Pipeline: run finished ({} archived, {} failed, {} orphans)",
			self.state.summary.archived_sites.len(),
			self.state.summary.failed_sites.len(),
			self.state.summary.orphan_count
		);
		Ok(self.state.summary.clone())
	}

	pub fn summary(&self) -> &RunSummary {
		&self.state.summary
	}
}

/// Move the entire contents of the processed-output directory into a
/// caller-chosen destination, creating it as needed. Used to hand the
/// finished update set to the distribution channel.
pub fn dispatch_processed(working_root: &Path, dest: &Path) -> PipelineResult<usize> {
	let processed = working_root.join(UPDATE_DIR).join(PROCESSED_DIR);
	if !processed.is_dir() {
		return Err(PipelineError::InputMissing { path: processed });
	}
	fs::create_dir_all(dest)?;

	let mut moved = 0usize;
	for entry in fs::read_dir(&processed)? {
		let entry = entry?;
		move_entry(&entry.path(), &dest.join(entry.file_name()))?;
		moved += 1;
	}
	info!(
		"Dispatch: moved {} entries from {} to {}",
		moved,
		processed.display(),
		dest.display()
	);
	Ok(moved)
}

// Rename when possible, copy-and-remove across filesystems
fn move_entry(from: &Path, to: &Path) -> io::Result<()> {
	if fs::rename(from, to).is_ok() {
		return Ok(());
	}
	if from.is_dir() {
		copy_tree(from, to)?;
		fs::remove_dir_all(from)
	} else {
		fs::copy(from, to)?;
		fs::remove_file(from)
	}
}

/// Mutual exclusion for a working root: holds the guard file for the
/// lifetime of a run. Two runs against the same root would race on the
/// catalog copy and the staging area, so the second fails fast.
struct RunGuard {
	path: PathBuf,
}

impl RunGuard {
	fn acquire(path: PathBuf) -> PipelineResult<Self> {
		match OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(mut file) => {
				let _ = writeln!(file, "{}", Utc::now().to_rfc3339());
				debug!("Pipeline: acquired run guard {}", path.display());
				Ok(Self { path })
			}
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
				Err(PipelineError::RunInProgress { lock: path })
			}
			Err(e) => Err(e.into()),
		}
	}
}

impl Drop for RunGuard {
	fn drop(&mut self) {
		let _ = fs::remove_file(&self.path);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs::File;
	use tempfile::TempDir;

	struct Fixture {
		work: TempDir,
		catalog: TempDir,
		inventory: TempDir,
	}

	impl Fixture {
		/// One site (0105), one data row, resolvable against the catalog.
		fn resolvable() -> Self {
			let fixture = Self::bare();
			fs::create_dir_all(fixture.catalog.path().join("12345")).unwrap();
			fs::write(
				fixture.catalog.path().join("12345/A_12345_BR9.DBF"),
				b"dbf",
			)
			.unwrap();
			fs::write(
				fixture.inventory.path().join("PART0105.DAT"),
				"HEADER\n1,2,\"A_12345\",\"BRAKE PAD\",\"BR9\",\"ACME\"\n",
			)
			.unwrap();
			fixture
		}

		fn bare() -> Self {
			Fixture {
				work: TempDir::new().unwrap(),
				catalog: TempDir::new().unwrap(),
				inventory: TempDir::new().unwrap(),
			}
		}

		fn config(&self) -> PipelineConfig {
			PipelineConfig::new(
				self.work.path().join("root"),
				self.catalog.path().to_path_buf(),
				self.inventory.path().to_path_buf(),
			)
		}
	}

	fn archive_names(path: &Path) -> Vec<String> {
		let archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
		let mut names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
		names.sort();
		names
	}

	#[smol_potat::test]
	async fn scenario_a_resolved_entry_archives_without_orphans() {
		let fixture = Fixture::resolvable();
		let config = fixture.config();
		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let summary = pipeline.run_all(&SystemContext::new()).await.unwrap();

		assert!(summary.is_clean());
		assert_eq!(summary.archived_sites, vec!["0105"]);
		assert_eq!(summary.orphan_count, 0);

		let produced = config.processed_dir().join("UP0105.ZIP");
		assert!(produced.is_file());
		assert_eq!(
			archive_names(&produced),
			vec!["POS/PART0105.DAT", "POS/PARTS/A_12345_BR9.DBF"]
		);
		// Checkpoint and manifest written; no orphan report
		assert!(config.working_root.join("MASTER.CSV").is_file());
		assert!(config.working_root.join("RUN.json").is_file());
		assert!(!config.working_root.join("UNUSED.CSV").exists());
		// Guard released
		assert!(!config.lock_path().exists());
	}

	#[smol_potat::test]
	async fn scenario_b_missing_catalog_entry_reports_orphan() {
		let fixture = Fixture::bare();
		// Catalog has markers but not this part's directory
		fs::create_dir_all(fixture.catalog.path().join("A_77777")).unwrap();
		fs::write(
			fixture.catalog.path().join("A_77777/A_77777_QQ2.DBF"),
			b"dbf",
		)
		.unwrap();
		fs::write(
			fixture.inventory.path().join("PART0105.DAT"),
			"HEADER\n1,2,\"A_12345\",\"BRAKE PAD\",\"BR9\",\"ACME\"\n",
		)
		.unwrap();

		let config = fixture.config();
		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let summary = pipeline.run_all(&SystemContext::new()).await.unwrap();

		// Archive still produced with just the raw inventory file
		let produced = config.processed_dir().join("UP0105.ZIP");
		assert_eq!(archive_names(&produced), vec!["POS/PART0105.DAT"]);
		// And the miss lands in the orphan report
		assert_eq!(summary.orphan_count, 1);
		assert!(config.working_root.join("UNUSED.CSV").is_file());
	}

	#[smol_potat::test]
	async fn scenario_c_empty_inventory_aborts_before_outputs() {
		let fixture = Fixture::bare();
		fs::create_dir_all(fixture.catalog.path().join("A_12345")).unwrap();
		fs::write(
			fixture.catalog.path().join("A_12345/A_12345_BR9.DBF"),
			b"dbf",
		)
		.unwrap();

		let config = fixture.config();
		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let err = pipeline.run_all(&SystemContext::new()).await.unwrap_err();

		assert!(matches!(err, PipelineError::InputMissing { .. }));
		assert!(!config.working_root.join("MASTER.CSV").exists());
		assert!(!config.update_dir().exists());
		assert!(!config.lock_path().exists());
	}

	#[smol_potat::test]
	async fn scenario_d_allowlisted_archive_is_rerouted() {
		let fixture = Fixture::resolvable();
		let list = fixture.work.path().join("allowlist.csv");
		fs::write(&list, "0105\n").unwrap();

		let config = fixture.config().with_allowlist(list);
		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let summary = pipeline.run_all(&SystemContext::new()).await.unwrap();

		assert_eq!(summary.routed_sites, vec!["0105"]);
		assert!(config.allowlist_dir().join("UP0105.ZIP").is_file());
		assert!(!config.processed_dir().join("UP0105.ZIP").exists());
	}

	#[smol_potat::test]
	async fn scenario_e_allowlisted_site_without_archive_is_warning_only() {
		let fixture = Fixture::resolvable();
		let list = fixture.work.path().join("allowlist.csv");
		fs::write(&list, "9999\n").unwrap();

		let config = fixture.config().with_allowlist(list);
		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let summary = pipeline.run_all(&SystemContext::new()).await.unwrap();

		assert_eq!(summary.missing_allowlisted, vec!["9999"]);
		assert!(summary.is_clean());
		// The unlisted archive stays in processed-output
		assert!(config.processed_dir().join("UP0105.ZIP").is_file());
	}

	#[smol_potat::test]
	async fn test_every_record_staged_or_orphaned() {
		let fixture = Fixture::bare();
		fs::create_dir_all(fixture.catalog.path().join("12345")).unwrap();
		fs::write(
			fixture.catalog.path().join("12345/A_12345_BR9.DBF"),
			b"dbf",
		)
		.unwrap();
		fs::write(
			fixture.inventory.path().join("PART0105.DAT"),
			"HEADER\n\
			 1,2,\"A_12345\",\"RESOLVES\",\"BR9\",\"ACME\"\n\
			 1,2,\"A_55555\",\"ORPHAN\",\"BR9\",\"ACME\"\n",
		)
		.unwrap();
		fs::write(
			fixture.inventory.path().join("PART3256.DAT"),
			"HEADER\n1,2,\"A_12345\",\"RESOLVES\",\"BR9\",\"ACME\"\n",
		)
		.unwrap();

		let config = fixture.config();
		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let summary = pipeline.run_all(&SystemContext::new()).await.unwrap();

		// 3 records parsed; resolved + orphaned partitions the set
		assert_eq!(summary.record_count, 3);
		assert_eq!(summary.orphan_count, 1);
		assert_eq!(summary.archived_sites, vec!["0105", "3256"]);
	}

	#[smol_potat::test]
	async fn test_run_guard_excludes_concurrent_runs() {
		let fixture = Fixture::resolvable();
		let config = fixture.config();
		fs::create_dir_all(&config.working_root).unwrap();
		fs::write(config.lock_path(), "held\n").unwrap();

		let mut pipeline = Pipeline::new(config.clone()).unwrap();
		let err = pipeline.run_all(&SystemContext::new()).await.unwrap_err();
		assert!(matches!(err, PipelineError::RunInProgress { .. }));

		// Stale guard removed by the operator; the run goes through
		fs::remove_file(config.lock_path()).unwrap();
		let mut pipeline = Pipeline::new(config).unwrap();
		pipeline.run_all(&SystemContext::new()).await.unwrap();
	}

	#[smol_potat::test]
	async fn test_cancellation_checked_between_systems() {
		let fixture = Fixture::resolvable();
		let context = SystemContext::new();
		context.cancel();

		let mut pipeline = Pipeline::new(fixture.config()).unwrap();
		let err = pipeline.run_all(&context).await.unwrap_err();
		assert!(matches!(err, PipelineError::Cancelled { .. }));
	}

	#[test]
	fn test_dispatch_moves_processed_contents() {
		let work = TempDir::new().unwrap();
		let root = work.path().join("root");
		let processed = root.join(UPDATE_DIR).join(PROCESSED_DIR);
		fs::create_dir_all(&processed).unwrap();
		fs::write(processed.join("UP0105.ZIP"), b"zip").unwrap();
		fs::write(processed.join("UP3256.ZIP"), b"zip").unwrap();

		let dest = work.path().join("outbound");
		let moved = dispatch_processed(&root, &dest).unwrap();
		assert_eq!(moved, 2);
		assert!(dest.join("UP0105.ZIP").is_file());
		assert!(fs::read_dir(&processed).unwrap().next().is_none());

		// A root that never produced output is a caller mistake
		let err = dispatch_processed(work.path().join("other").as_path(), &dest).unwrap_err();
		assert!(matches!(err, PipelineError::InputMissing { .. }));
	}
}
