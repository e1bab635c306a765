//! Site archive creation (deflate-compressed ZIP)

use std::fs::File;
use std::io;
use std::path::Path;

use tracing::{debug, trace};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineResult;

/// Compress a completed site staging tree into a single archive.
///
/// Only the `POS` subtree is packed, and entry paths are made relative to
/// the per-site root, so extraction reproduces `POS/PARTS/...` with no
/// leading site-id segment. Entries are walked in name order so the same
/// staging tree always produces the same archive layout.
///
/// Returns the number of file entries written. The caller owns the
/// archive-then-cleanup transaction: this function never touches the
/// staging tree itself.
pub fn compress_staging_tree(site_dir: &Path, zip_path: &Path) -> PipelineResult<usize> {
	let file = File::create(zip_path)?;
	let mut writer = ZipWriter::new(file);
	let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

	let pos_dir = site_dir.join("POS");
	let mut count = 0usize;
	if pos_dir.is_dir() {
		for entry in WalkDir::new(&pos_dir).sort_by_file_name() {
			let entry = entry.map_err(io::Error::from)?;
			if !entry.file_type().is_file() {
				continue;
			}
			let rel = entry
				.path()
				.strip_prefix(site_dir)
				.expect("walked entries live under the site root");
			// ZIP entry names always use forward slashes
			let name = rel
				.components()
				.map(|c| c.as_os_str().to_string_lossy())
				.collect::<Vec<_>>()
				.join("/");

			writer.start_file(name.as_str(), options)?;
			let mut src = File::open(entry.path())?;
			io::copy(&mut src, &mut writer)?;
			trace!("Archive: added {}", name);
			count += 1;
		}
	}

	writer.finish()?;
	debug!(
		"Archive: wrote {} ({} entries)",
		zip_path.display(),
		count
	);
	Ok(count)
}
