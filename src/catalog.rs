//! Catalog ingest, layout normalization, and composite-key resolution

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::data::CompositeKey;
use crate::error::{PipelineError, PipelineResult};

/// Extension (compared case-insensitively) whose presence anywhere under
/// the catalog root attests the tree is real catalog data.
pub const MARKER_EXTENSION: &str = "DBF";

/// Index over a normalized catalog tree.
///
/// The index is purely a projection of the directory layout: entry
/// `A_<partCode>` holds files named with a composite-key prefix, and
/// resolution is a prefix match against one directory listing. Nothing is
/// cached; the filesystem stays authoritative so the orphan re-check at
/// the end of a run observes the final catalog state.
///
/// The tree an index points at is always the pipeline's private copy under
/// the working root. [`CatalogIndex::ingest`] produces that copy and
/// normalizes it; the externally supplied catalog tree is never renamed.
#[derive(Debug, Clone)]
pub struct CatalogIndex {
	root: PathBuf,
}

impl CatalogIndex {
	/// Wrap an already-ingested catalog root.
	pub fn open(root: PathBuf) -> Self {
		Self { root }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Copy the supplied catalog tree to `dest` and normalize the copy.
	///
	/// Re-ingesting replaces the previous copy wholesale, so repeated
	/// ingests of the same source converge on the same layout. Fails with
	/// `InputMissing` when the source is absent or empty.
	pub fn ingest(source: &Path, dest: &Path) -> PipelineResult<Self> {
		if !source.is_dir() || dir_is_empty(source)? {
			return Err(PipelineError::InputMissing {
				path: source.to_path_buf(),
			});
		}

		if dest.exists() {
			fs::remove_dir_all(dest)?;
		}
		copy_tree(source, dest)?;
		info!(
			"Catalog: ingested {} into {}",
			source.display(),
			dest.display()
		);

		let index = Self::open(dest.to_path_buf());
		index.normalize_layout()?;
		Ok(index)
	}

	/// Rename every immediate subdirectory not already carrying the `A_`
	/// prefix. Idempotent: a second pass finds nothing to rename.
	///
	/// Returns the number of directories renamed.
	pub fn normalize_layout(&self) -> PipelineResult<usize> {
		let mut renamed = 0usize;
		for entry in fs::read_dir(&self.root)? {
			let entry = entry?;
			if !entry.file_type()?.is_dir() {
				continue;
			}
			let name = entry.file_name();
			let Some(name) = name.to_str() else {
				warn!("Catalog: skipping non-UTF-8 directory name {:?}", name);
				continue;
			};
			if name.starts_with(CompositeKey::PREFIX) {
				continue;
			}

			let target = self.root.join(format!("{}{}", CompositeKey::PREFIX, name));
			if target.exists() {
				// Both X and A_X present; renaming would clobber the
				// existing entry, so leave the unprefixed one alone
				warn!(
					"Catalog: not renaming {} ({} already exists)",
					name,
					target.display()
				);
				continue;
			}
			fs::rename(entry.path(), &target)?;
			debug!("Catalog: renamed {} -> {}", name, target.display());
			renamed += 1;
		}
		if renamed > 0 {
			info!("Catalog: normalized {} directory names", renamed);
		}
		Ok(renamed)
	}

	/// Guard check: at least one marker file (`.DBF`) must exist anywhere
	/// under the catalog root, else the whole pipeline aborts.
	pub fn verify_markers(&self) -> PipelineResult<()> {
		for entry in WalkDir::new(&self.root).into_iter() {
			let entry = match entry {
				Ok(e) => e,
				Err(e) => {
					warn!("Catalog: walk error during marker check: {}", e);
					continue;
				}
			};
			if !entry.file_type().is_file() {
				continue;
			}
			let is_marker = entry
				.path()
				.extension()
				.and_then(|e| e.to_str())
				.is_some_and(|e| e.eq_ignore_ascii_case(MARKER_EXTENSION));
			if is_marker {
				debug!("Catalog: marker file {}", entry.path().display());
				return Ok(());
			}
		}
		Err(PipelineError::ValidationFailed {
			reason: format!(
				"no .{} files under {}",
				MARKER_EXTENSION,
				self.root.display()
			),
		})
	}

	/// Resolve a composite key to the catalog files whose names start with
	/// the full key, sorted by name for deterministic copy order.
	///
	/// An absent directory or zero prefix matches is not an error: the
	/// empty result signals an orphan and the caller reports it.
	pub fn resolve(&self, key: &CompositeKey) -> PipelineResult<Vec<PathBuf>> {
		let dir = self.root.join(key.catalog_dir_name());
		let entries = match fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut matches = Vec::new();
		for entry in entries {
			let entry = entry?;
			if !entry.file_type()?.is_file() {
				continue;
			}
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			if name.starts_with(key.as_str()) {
				matches.push(entry.path());
			}
		}
		matches.sort();
		Ok(matches)
	}
}

fn dir_is_empty(path: &Path) -> io::Result<bool> {
	Ok(fs::read_dir(path)?.next().is_none())
}

/// Recursively copy a directory tree. Destination directories are created
/// as needed; existing files are overwritten.
pub(crate) fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
	fs::create_dir_all(dest)?;
	for entry in fs::read_dir(source)? {
		let entry = entry?;
		let target = dest.join(entry.file_name());
		if entry.file_type()?.is_dir() {
			copy_tree(&entry.path(), &target)?;
		} else {
			fs::copy(entry.path(), &target)?;
		}
	}
	Ok(())
}
