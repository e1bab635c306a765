//! Per-site staging, archiving, and cleanup system

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::archive::compress_staging_tree;
use crate::catalog::CatalogIndex;
use crate::data::{FailedSite, RecordSet, RunState, SiteId};
use crate::error::SystemResult;
use crate::systems::{lift_pipeline, System, SystemContext, SystemProgress, SystemRunner};

/// Directory level holding point-of-sale payload inside a staging tree.
pub const POS_DIR: &str = "POS";
/// Directory level holding resolved catalog files inside a staging tree.
pub const PARTS_DIR: &str = "PARTS";

/// Builds one archive per distinct site: stages resolved catalog files and
/// the site's raw inventory files, compresses the staging tree, moves the
/// archive into processed-output, and deletes the staging tree.
///
/// Sites are processed in sorted order and each one is an isolated
/// transaction: a failure preserves that site's staging tree for retry,
/// is recorded in the run summary, and the loop moves on to the next
/// site. Progress is reported after each site finishes archiving.
#[derive(Debug)]
pub struct SiteBuildSystem {
	/// Directory of `PART####.DAT` flat files; read, never mutated
	pub inventory_source: PathBuf,
	/// Ingested catalog copy resolved against
	pub catalog_root: PathBuf,
	/// Staging area root (`<working_root>/UPDATE`)
	pub update_dir: PathBuf,
	/// Destination for finished archives (`<update_dir>/PROCESSED`)
	pub processed_dir: PathBuf,
}

impl SiteBuildSystem {
	/// Stable system name, also matched by the engine to turn this
	/// system's progress into site-archived events.
	pub const NAME: &'static str = "SiteBuild";

	pub fn new(
		inventory_source: PathBuf,
		catalog_root: PathBuf,
		update_dir: PathBuf,
		processed_dir: PathBuf,
	) -> Self {
		Self {
			inventory_source,
			catalog_root,
			update_dir,
			processed_dir,
		}
	}

	/// Stage and archive one site. Archive creation plus cleanup is a
	/// single logical step: the staging tree is deleted only after the
	/// finished archive has been moved into processed-output.
	fn build_site(&self, records: &RecordSet, site: &SiteId) -> SystemResult<()> {
		let index = CatalogIndex::open(self.catalog_root.clone());
		let site_dir = self.update_dir.join(site.as_str());
		let pos_dir = site_dir.join(POS_DIR);
		let parts_dir = pos_dir.join(PARTS_DIR);
		fs::create_dir_all(&parts_dir)?;

		// Resolved catalog files, in record order; a file named by two
		// records is overwritten in place, not duplicated
		let mut copied = 0usize;
		for record in records
			.site_records(site)
			.map_err(|e| lift_pipeline(Self::NAME, e))?
		{
			for file in index
				.resolve(&record.key)
				.map_err(|e| lift_pipeline(Self::NAME, e))?
			{
				let Some(name) = file.file_name() else { continue };
				fs::copy(&file, parts_dir.join(name))?;
				copied += 1;
			}
		}

		// The site's raw inventory files land beside PARTS so the archive
		// also carries the source records
		for entry in fs::read_dir(&self.inventory_source)? {
			let entry = entry?;
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			if name.starts_with(&site.inventory_prefix()) && name.ends_with(".DAT") {
				fs::copy(entry.path(), pos_dir.join(name))?;
			}
		}
		debug!("SiteBuild: staged {} catalog files for {}", copied, site);

		let zip_path = self.update_dir.join(site.archive_file_name());
		compress_staging_tree(&site_dir, &zip_path).map_err(|e| lift_pipeline(Self::NAME, e))?;

		fs::create_dir_all(&self.processed_dir)?;
		fs::rename(&zip_path, self.processed_dir.join(site.archive_file_name()))?;
		fs::remove_dir_all(&site_dir)?;
		Ok(())
	}
}

#[async_trait]
impl SystemRunner for SiteBuildSystem {
	async fn run(&self, state: &mut RunState, context: &SystemContext) -> SystemResult<()> {
		let sites = state
			.records
			.site_ids()
			.map_err(|e| lift_pipeline(Self::NAME, e))?;
		info!("SiteBuild: {} sites to build", sites.len());

		let mut progress = SystemProgress::new(Self::NAME.to_string(), sites.len());
		for (idx, site) in sites.iter().enumerate() {
			context.ensure_not_cancelled(Self::NAME)?;
			match self.build_site(&state.records, site) {
				Ok(()) => {
					info!("SiteBuild: archived {}", site.archive_file_name());
					state.summary.archived_sites.push(site.to_string());
				}
				Err(e) => {
					// Isolate the failure: keep the staging tree for
					// retry and carry on with the remaining sites
					warn!(
						"SiteBuild: site {} failed: {} (staging tree preserved)",
						site, e
					);
					state.summary.failed_sites.push(FailedSite {
						site_id: site.to_string(),
						reason: e.to_string(),
					});
				}
			}
			progress.update(idx + 1, Some(site.to_string()));
			context.report_progress(progress.clone());
		}

		info!(
			"SiteBuild: {} archived, {} failed",
			state.summary.archived_sites.len(),
			state.summary.failed_sites.len()
		);
		Ok(())
	}

	fn can_run(&self, state: &RunState) -> bool {
		!state.records.is_empty()
	}

	fn priority(&self) -> u8 {
		200
	}

	fn name(&self) -> &'static str {
		Self::NAME
	}
}

impl System for SiteBuildSystem {
	fn required_columns(&self) -> &[&'static str] {
		&[
			crate::data::COL_KEY,
			crate::data::COL_DESCRIPTION,
			crate::data::COL_BRAND_NAME,
			crate::data::COL_SITE_ID,
		]
	}

	fn description(&self) -> &'static str {
		"Stages, archives, and cleans up one update per distinct site"
	}
}
