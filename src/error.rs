//! Error types for the update-build pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type covering all failure modes in the pipeline.
///
/// `PipelineError` separates fatal conditions (which abort a run and are
/// surfaced to the caller as a single terminal failure) from conditions
/// that are handled inside the run and only aggregated into logs and
/// reports. Only the fatal conditions appear here; the non-fatal ones
/// (malformed rows, unresolved composite keys, allowlisted sites with no
/// archive, per-site archive failures) never become a `PipelineError`.
/// They are logged, written to the orphan report, or collected into the
/// [`RunSummary`](crate::data::RunSummary) failure list.
///
/// ## Fatal categories
///
/// - **Input errors**: a required source directory is absent or empty
/// - **Validation errors**: the catalog tree carries no marker files
/// - **Exclusion errors**: another run holds the working-root guard
/// - **I/O / data errors**: filesystem, archive, or DataFrame failures
///   outside the per-site isolation boundary
#[derive(Debug, Error)]
pub enum PipelineError {
	/// Required source directory absent, empty, or without matching files
	#[error("required input missing or empty: {path}")]
	InputMissing { path: PathBuf },

	/// Catalog tree failed the marker-file guard check
	#[error("catalog validation failed: {reason}")]
	ValidationFailed { reason: String },

	/// Another run holds the working-root guard file
	#[error("a run is already in progress (guard file {lock} exists)")]
	RunInProgress { lock: PathBuf },

	/// Run was cancelled between per-site iterations or systems
	#[error("run cancelled during {system}")]
	Cancelled { system: String },

	/// File system I/O errors outside the per-site isolation boundary
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Polars DataFrame operation errors during record processing
	#[error("Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	/// Archive container errors (corrupt or unwritable ZIP)
	#[error("archive error: {0}")]
	Archive(#[from] zip::result::ZipError),

	/// Checkpoint/report persistence errors
	#[error("persist error: {0}")]
	Persist(#[from] PersistError),

	/// A system failed for a reason without a more specific category
	#[error("system error: {0}")]
	System(SystemError),
}

/// Errors raised by individual pipeline systems.
///
/// Systems run under the scheduler and report through this type; the
/// pipeline lifts the variants that have a top-level meaning (missing
/// input, failed validation, cancellation) into the matching
/// [`PipelineError`] variant so callers can distinguish them without
/// digging through a generic wrapper.
#[derive(Debug, Error)]
pub enum SystemError {
	#[error("required input missing or empty: {path}")]
	InputMissing { path: PathBuf },

	#[error("catalog validation failed: {reason}")]
	ValidationFailed { reason: String },

	#[error("cancelled during {system}")]
	Cancelled { system: String },

	#[error("system {system} failed: {reason}")]
	ExecutionFailed { system: String, reason: String },

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	#[error("archive error: {0}")]
	Archive(#[from] zip::result::ZipError),

	#[error("persist error: {0}")]
	Persist(#[from] PersistError),
}

/// Checkpoint and report persistence errors (CSV checkpoint, run manifest)
#[derive(Debug, Error)]
pub enum PersistError {
	#[error("persist I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("persist Polars error: {0}")]
	Polars(#[from] polars::error::PolarsError),

	#[error("persist JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("checkpoint {path} is malformed: {reason}")]
	Malformed { path: PathBuf, reason: String },
}

impl From<SystemError> for PipelineError {
	fn from(err: SystemError) -> Self {
		// Lift variants with a caller-facing meaning to the top level
		match err {
			SystemError::InputMissing { path } => PipelineError::InputMissing { path },
			SystemError::ValidationFailed { reason } => PipelineError::ValidationFailed { reason },
			SystemError::Cancelled { system } => PipelineError::Cancelled { system },
			SystemError::Io(e) => PipelineError::Io(e),
			SystemError::Polars(e) => PipelineError::Polars(e),
			SystemError::Archive(e) => PipelineError::Archive(e),
			SystemError::Persist(e) => PipelineError::Persist(e),
			other => PipelineError::System(other),
		}
	}
}

/// Convenience type alias for Results in the pipeline API.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Convenience type alias for system operation results.
pub type SystemResult<T> = Result<T, SystemError>;

/// Convenience type alias for persistence operation results.
pub type PersistResult<T> = Result<T, PersistError>;
