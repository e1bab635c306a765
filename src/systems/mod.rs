//! Processing systems for the update-build pipeline

use async_trait::async_trait;

use crate::data::RunState;
use crate::error::{PipelineError, SystemError, SystemResult};

pub mod ingest;
pub mod orphans;
pub mod parse;
pub mod routing;
pub mod scheduler;
pub mod sites;

pub use ingest::CatalogIngestSystem;
pub use orphans::OrphanReportSystem;
pub use parse::RecordParseSystem;
pub use routing::AllowlistRouteSystem;
pub use scheduler::SystemScheduler;
pub use sites::SiteBuildSystem;

/// Common interface for all processing systems
#[async_trait]
pub trait SystemRunner: Send + Sync {
	/// Run the system against the shared run state
	async fn run(&self, state: &mut RunState, context: &SystemContext) -> SystemResult<()>;

	/// Check if this system can run (inputs configured, dependencies met).
	/// Systems whose precondition is absent are skipped, not failed.
	fn can_run(&self, state: &RunState) -> bool;

	/// System priority (higher number = earlier in the run order)
	fn priority(&self) -> u8;

	/// System name for logging and identification
	fn name(&self) -> &'static str;
}

/// System metadata interface
pub trait System {
	/// Record-frame columns this system reads
	fn required_columns(&self) -> &[&'static str];

	/// System description
	fn description(&self) -> &'static str;
}

/// Progress information for system execution
#[derive(Debug, Clone)]
pub struct SystemProgress {
	pub system_name: String,
	pub total_items: usize,
	pub processed_items: usize,
	pub current_item: Option<String>,
}

impl SystemProgress {
	pub fn new(system_name: String, total_items: usize) -> Self {
		Self {
			system_name,
			total_items,
			processed_items: 0,
			current_item: None,
		}
	}

	pub fn update(&mut self, processed: usize, current_item: Option<String>) {
		self.processed_items = processed;
		self.current_item = current_item;
	}

	pub fn progress_ratio(&self) -> f64 {
		if self.total_items == 0 {
			1.0
		} else {
			self.processed_items as f64 / self.total_items as f64
		}
	}

	/// Whole-number percentage for progress displays
	pub fn percent(&self) -> u8 {
		(self.progress_ratio() * 100.0).round().clamp(0.0, 100.0) as u8
	}

	pub fn is_complete(&self) -> bool {
		self.processed_items >= self.total_items
	}
}

/// System execution context: progress reporting plus the cancellation flag
/// checked between systems and between per-site iterations.
pub struct SystemContext {
	pub progress_callback: Option<Box<dyn Fn(SystemProgress) + Send + Sync>>,
	pub cancellation_token: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Default for SystemContext {
	fn default() -> Self {
		Self {
			progress_callback: None,
			cancellation_token: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
		}
	}
}

impl SystemContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_progress_callback<F>(mut self, callback: F) -> Self
	where
		F: Fn(SystemProgress) + Send + Sync + 'static,
	{
		self.progress_callback = Some(Box::new(callback));
		self
	}

	pub fn with_cancellation_token(
		mut self,
		token: std::sync::Arc<std::sync::atomic::AtomicBool>,
	) -> Self {
		self.cancellation_token = token;
		self
	}

	pub fn report_progress(&self, progress: SystemProgress) {
		if let Some(ref callback) = self.progress_callback {
			callback(progress);
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token
			.load(std::sync::atomic::Ordering::Relaxed)
	}

	pub fn cancel(&self) {
		self.cancellation_token
			.store(true, std::sync::atomic::Ordering::Relaxed)
	}

	/// Fail with `Cancelled` if the flag has been raised
	pub fn ensure_not_cancelled(&self, system: &'static str) -> SystemResult<()> {
		if self.is_cancelled() {
			return Err(SystemError::Cancelled {
				system: system.to_string(),
			});
		}
		Ok(())
	}
}

/// Map a leaf-module error into the system error channel, keeping the
/// variants with a caller-facing meaning intact.
pub(crate) fn lift_pipeline(system: &'static str, err: PipelineError) -> SystemError {
	match err {
		PipelineError::InputMissing { path } => SystemError::InputMissing { path },
		PipelineError::ValidationFailed { reason } => SystemError::ValidationFailed { reason },
		PipelineError::Io(e) => SystemError::Io(e),
		PipelineError::Polars(e) => SystemError::Polars(e),
		PipelineError::Archive(e) => SystemError::Archive(e),
		PipelineError::Persist(e) => SystemError::Persist(e),
		other => SystemError::ExecutionFailed {
			system: system.to_string(),
			reason: other.to_string(),
		},
	}
}
