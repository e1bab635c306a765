//! Core data structures using Polars DataFrames

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineResult;

/// Column name for the composite part+brand key.
pub const COL_KEY: &str = "Part_Code_BrandCode";
/// Column name for the free-text part description.
pub const COL_DESCRIPTION: &str = "Description";
/// Column name for the brand display name.
pub const COL_BRAND_NAME: &str = "BrandName";
/// Column name for the 4-digit site identifier.
pub const COL_SITE_ID: &str = "Unique_ID";

/// Composite key identifying a part+brand combination.
///
/// Format is `A_<partCode>_<brandCode>`, derived from the raw inventory
/// fields by stripping the `A_` prefix already present on the part code
/// and re-joining with the brand code. A well-formed key splits on `_`
/// into exactly three segments (`A`, part code, brand code), both codes
/// non-empty. Keys with embedded underscores in either code are
/// malformed and rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey(String);

impl CompositeKey {
	/// Prefix shared by composite keys and catalog directory names.
	pub const PREFIX: &'static str = "A_";

	/// Build a key from the raw inventory fields.
	///
	/// The raw part code may or may not already carry the `A_` prefix;
	/// either spelling produces the same key. Returns `None` when either
	/// code is empty or contains an underscore.
	pub fn from_raw_fields(raw_part_code: &str, brand_code: &str) -> Option<Self> {
		let part_code = raw_part_code
			.strip_prefix(Self::PREFIX)
			.unwrap_or(raw_part_code);
		if part_code.is_empty() || brand_code.is_empty() {
			return None;
		}
		if part_code.contains('_') || brand_code.contains('_') {
			return None;
		}
		Some(CompositeKey(format!(
			"{}{}_{}",
			Self::PREFIX,
			part_code,
			brand_code
		)))
	}

	/// Parse an already-formatted key, validating well-formedness.
	pub fn parse(s: &str) -> Option<Self> {
		let mut segments = s.split('_');
		match (
			segments.next(),
			segments.next(),
			segments.next(),
			segments.next(),
		) {
			(Some("A"), Some(part), Some(brand), None) if !part.is_empty() && !brand.is_empty() => {
				Some(CompositeKey(s.to_string()))
			}
			_ => None,
		}
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// The part code segment (between the two underscores).
	pub fn part_code(&self) -> &str {
		// Well-formedness is guaranteed at construction
		self.0.split('_').nth(1).unwrap_or("")
	}

	/// The brand code segment (after the second underscore).
	pub fn brand_code(&self) -> &str {
		self.0.split('_').nth(2).unwrap_or("")
	}

	/// Name of the catalog directory holding this key's files (`A_<partCode>`).
	pub fn catalog_dir_name(&self) -> String {
		format!("{}{}", Self::PREFIX, self.part_code())
	}
}

impl std::fmt::Display for CompositeKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// 4-digit zero-padded retail site identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(String);

impl SiteId {
	/// Parse a site id string; must be exactly four ASCII digits.
	pub fn parse(s: &str) -> Option<Self> {
		if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
			Some(SiteId(s.to_string()))
		} else {
			None
		}
	}

	/// Extract the embedded site id from an inventory filename
	/// (`PART####.DAT`, exact case). Returns `None` for any other name.
	pub fn from_inventory_filename(name: &str) -> Option<Self> {
		let digits = name.strip_prefix("PART")?.strip_suffix(".DAT")?;
		Self::parse(digits)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Filename prefix shared by this site's inventory files (`PART####`).
	pub fn inventory_prefix(&self) -> String {
		format!("PART{}", self.0)
	}

	/// Name of this site's produced archive (`UP####.ZIP`).
	pub fn archive_file_name(&self) -> String {
		format!("UP{}.ZIP", self.0)
	}
}

impl std::fmt::Display for SiteId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// One parsed inventory row. Immutable once parsed; its lifetime ends when
/// it is persisted into the intermediate record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
	pub key: CompositeKey,
	pub description: String,
	pub brand_name: String,
	pub site_id: SiteId,
}

/// The intermediate record set: every parsed inventory row, in parse order.
///
/// Backed by a Polars DataFrame whose columns match the on-disk checkpoint
/// header exactly (`Part_Code_BrandCode`, `Description`, `BrandName`,
/// `Unique_ID`), so persisting is a direct CSV write with no renaming.
/// Row order is parse order and is never re-sorted; per-site selection
/// filters without reordering so staging copy order stays deterministic.
/// No dedup happens at this stage.
#[derive(Debug, Clone)]
pub struct RecordSet {
	/// Primary DataFrame containing all parsed records
	pub data: DataFrame,
}

impl RecordSet {
	/// Create a new empty record set
	pub fn new() -> PipelineResult<Self> {
		let data = Self::create_empty_dataframe()?;
		Ok(RecordSet { data })
	}

	/// Create the schema for the record DataFrame
	fn create_empty_dataframe() -> PolarsResult<DataFrame> {
		df! {
			COL_KEY => Vec::<String>::new(),
			COL_DESCRIPTION => Vec::<String>::new(),
			COL_BRAND_NAME => Vec::<String>::new(),
			COL_SITE_ID => Vec::<String>::new(),
		}
	}

	/// Build a record set from parsed records, preserving their order.
	pub fn from_records(records: &[PartRecord]) -> PipelineResult<Self> {
		let keys: Vec<String> = records.iter().map(|r| r.key.as_str().to_string()).collect();
		let descriptions: Vec<String> = records.iter().map(|r| r.description.clone()).collect();
		let brand_names: Vec<String> = records.iter().map(|r| r.brand_name.clone()).collect();
		let site_ids: Vec<String> = records
			.iter()
			.map(|r| r.site_id.as_str().to_string())
			.collect();

		let data = df! {
			COL_KEY => keys,
			COL_DESCRIPTION => descriptions,
			COL_BRAND_NAME => brand_names,
			COL_SITE_ID => site_ids,
		}?;
		Ok(RecordSet { data })
	}

	/// Wrap a DataFrame already known to carry the record schema
	/// (checkpoint loads validate the header before calling this).
	pub fn from_dataframe(data: DataFrame) -> Self {
		RecordSet { data }
	}

	pub fn height(&self) -> usize {
		self.data.height()
	}

	pub fn is_empty(&self) -> bool {
		self.data.height() == 0
	}

	/// Distinct site ids, lexicographically sorted.
	///
	/// Sorted order is the documented deterministic order for per-site
	/// processing and progress reporting. Rows whose site id fails
	/// validation are skipped with a warning rather than aborting the run.
	pub fn site_ids(&self) -> PipelineResult<Vec<SiteId>> {
		let col = self.data.column(COL_SITE_ID)?.str()?;
		let mut distinct = std::collections::BTreeSet::new();
		for opt in col.into_iter() {
			let Some(raw) = opt else { continue };
			match SiteId::parse(raw) {
				Some(id) => {
					distinct.insert(id);
				}
				None => warn!("Records: skipping invalid site id {:?}", raw),
			}
		}
		Ok(distinct.into_iter().collect())
	}

	/// All records for one site, in original parse order.
	pub fn site_records(&self, site: &SiteId) -> PipelineResult<Vec<PartRecord>> {
		let filtered = self
			.data
			.clone()
			.lazy()
			.filter(col(COL_SITE_ID).eq(lit(site.as_str())))
			.collect()?;
		Self::rows_to_records(&filtered)
	}

	/// Every record in the set, in parse order.
	pub fn records(&self) -> PipelineResult<Vec<PartRecord>> {
		Self::rows_to_records(&self.data)
	}

	fn rows_to_records(df: &DataFrame) -> PipelineResult<Vec<PartRecord>> {
		let keys = df.column(COL_KEY)?.str()?;
		let descriptions = df.column(COL_DESCRIPTION)?.str()?;
		let brand_names = df.column(COL_BRAND_NAME)?.str()?;
		let site_ids = df.column(COL_SITE_ID)?.str()?;

		let mut records = Vec::with_capacity(df.height());
		for i in 0..df.height() {
			let raw_key = keys.get(i).unwrap_or("");
			let raw_site = site_ids.get(i).unwrap_or("");
			let (Some(key), Some(site_id)) = (CompositeKey::parse(raw_key), SiteId::parse(raw_site))
			else {
				// Rows can only get malformed through hand-edited checkpoints;
				// same skip-and-log policy as the parser
				warn!("Records: skipping malformed row {} ({:?})", i, raw_key);
				continue;
			};
			records.push(PartRecord {
				key,
				description: descriptions.get(i).unwrap_or("").to_string(),
				brand_name: brand_names.get(i).unwrap_or("").to_string(),
				site_id,
			});
		}
		Ok(records)
	}
}

impl Default for RecordSet {
	fn default() -> Self {
		Self::new().expect("failed to create empty RecordSet")
	}
}

/// One site whose staging or archiving failed; the run continues past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedSite {
	pub site_id: String,
	pub reason: String,
}

/// Result object for a whole run, emitted on completion and persisted as
/// the run manifest. Replaces any shared mutable run flag: callers learn
/// everything about the run from this value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
	pub version: u32,
	pub started_at: DateTime<Utc>,
	pub finished_at: Option<DateTime<Utc>>,
	pub catalog_source: String,
	pub inventory_source: String,
	pub record_count: usize,
	pub site_count: usize,
	pub archived_sites: Vec<String>,
	pub failed_sites: Vec<FailedSite>,
	pub routed_sites: Vec<String>,
	pub missing_allowlisted: Vec<String>,
	pub orphan_count: usize,
}

impl RunSummary {
	/// Manifest format version; bump on breaking schema changes.
	pub const VERSION: u32 = 1;

	pub fn new(catalog_source: String, inventory_source: String) -> Self {
		Self {
			version: Self::VERSION,
			started_at: Utc::now(),
			finished_at: None,
			catalog_source,
			inventory_source,
			record_count: 0,
			site_count: 0,
			archived_sites: Vec::new(),
			failed_sites: Vec::new(),
			routed_sites: Vec::new(),
			missing_allowlisted: Vec::new(),
			orphan_count: 0,
		}
	}

	/// True when every site archived without error.
	pub fn is_clean(&self) -> bool {
		self.failed_sites.is_empty()
	}
}

/// Shared mutable state the systems run against: the record set plus the
/// accumulating run summary.
#[derive(Debug)]
pub struct RunState {
	pub records: RecordSet,
	pub summary: RunSummary,
}

impl RunState {
	pub fn new(summary: RunSummary) -> PipelineResult<Self> {
		Ok(Self {
			records: RecordSet::new()?,
			summary,
		})
	}
}
