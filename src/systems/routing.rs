//! Allowlist routing system

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::data::{RunState, SiteId};
use crate::error::{SystemError, SystemResult};
use crate::systems::{System, SystemContext, SystemRunner};

/// Relocates archives for allowlisted sites out of processed-output into
/// the dedicated allowlist-output directory. Skipped entirely when no
/// allowlist was supplied; a listed site with no produced archive is a
/// warning, never a failure.
#[derive(Debug)]
pub struct AllowlistRouteSystem {
	/// Single-column site-id list, no header; `None` disables the system
	pub allowlist: Option<PathBuf>,
	pub processed_dir: PathBuf,
	pub allowlist_dir: PathBuf,
}

impl AllowlistRouteSystem {
	pub fn new(allowlist: Option<PathBuf>, processed_dir: PathBuf, allowlist_dir: PathBuf) -> Self {
		Self {
			allowlist,
			processed_dir,
			allowlist_dir,
		}
	}
}

#[async_trait]
impl SystemRunner for AllowlistRouteSystem {
	async fn run(&self, state: &mut RunState, _context: &SystemContext) -> SystemResult<()> {
		let Some(path) = &self.allowlist else {
			return Ok(());
		};
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				// Supplied but absent is a caller mistake, not a skip
				return Err(SystemError::InputMissing { path: path.clone() });
			}
			Err(e) => return Err(e.into()),
		};

		for line in content.lines() {
			let raw = line.trim();
			if raw.is_empty() {
				continue;
			}
			let Some(site) = SiteId::parse(raw) else {
				warn!("Route: ignoring malformed site id {:?}", raw);
				continue;
			};

			let archive = self.processed_dir.join(site.archive_file_name());
			if archive.is_file() {
				fs::create_dir_all(&self.allowlist_dir)?;
				fs::rename(&archive, self.allowlist_dir.join(site.archive_file_name()))?;
				info!("Route: moved {} to allowlist output", site.archive_file_name());
				state.summary.routed_sites.push(site.to_string());
			} else {
				warn!(
					"Route: {} not found in {}",
					site.archive_file_name(),
					self.processed_dir.display()
				);
				state.summary.missing_allowlisted.push(site.to_string());
			}
		}
		Ok(())
	}

	fn can_run(&self, _state: &RunState) -> bool {
		self.allowlist.is_some()
	}

	fn priority(&self) -> u8 {
		100
	}

	fn name(&self) -> &'static str {
		"AllowlistRoute"
	}
}

impl System for AllowlistRouteSystem {
	fn required_columns(&self) -> &[&'static str] {
		&[]
	}

	fn description(&self) -> &'static str {
		"Moves allowlisted sites' archives into the separate allowlist output"
	}
}
