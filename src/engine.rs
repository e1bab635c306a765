//! Background engine to drive a pipeline run with progress events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_channel as channel;
use futures_lite::future;
use tracing::info;

use crate::data::RunSummary;
use crate::pipeline::Pipeline;
use crate::systems::{SiteBuildSystem, SystemContext};

/// Events emitted over the engine's channel, in order: `Started`, one
/// `SiteArchived` per site as it finishes archiving, then exactly one of
/// `Completed` or `Failed`.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
	Started,
	SiteArchived { percent: u8, site_id: String },
	Completed(RunSummary),
	Failed(String),
}

/// Runs a pipeline on its own thread so an interactive caller stays
/// responsive, and translates system progress into a consumable event
/// stream. Cancellation raises the shared flag the pipeline checks
/// between systems and between per-site iterations.
pub struct BroadcastEngine {
	evt_rx: channel::Receiver<PipelineEvent>,
	cancel: Arc<AtomicBool>,
	handle: Option<std::thread::JoinHandle<()>>,
}

impl BroadcastEngine {
	pub fn start(mut pipeline: Pipeline) -> Self {
		let (evt_tx, evt_rx) = channel::unbounded::<PipelineEvent>();
		let cancel = Arc::new(AtomicBool::new(false));
		let token = cancel.clone();

		// Run the whole pipeline on a dedicated thread; the caller's
		// thread only ever consumes events
		let handle = std::thread::spawn(move || {
			future::block_on(async move {
				info!("Engine: started");
				let _ = evt_tx.send(PipelineEvent::Started).await;

				let progress_tx = evt_tx.clone();
				let context = SystemContext::new()
					.with_cancellation_token(token)
					.with_progress_callback(move |progress| {
						// Only site-build progress is caller-facing
						if progress.system_name == SiteBuildSystem::NAME {
							let site_id = progress.current_item.clone().unwrap_or_default();
							let _ = progress_tx.try_send(PipelineEvent::SiteArchived {
								percent: progress.percent(),
								site_id,
							});
						}
					});

				match pipeline.run_all(&context).await {
					Ok(summary) => {
						let _ = evt_tx.send(PipelineEvent::Completed(summary)).await;
					}
					Err(e) => {
						let _ = evt_tx.send(PipelineEvent::Failed(e.to_string())).await;
					}
				}
				info!("Engine: finished");
			});
		});

		Self {
			evt_rx,
			cancel,
			handle: Some(handle),
		}
	}

	/// Event stream for this run. The channel closes after the terminal
	/// event once the engine thread exits.
	pub fn events(&self) -> channel::Receiver<PipelineEvent> {
		self.evt_rx.clone()
	}

	/// Request cancellation; takes effect at the next check point.
	pub fn cancel(&self) {
		self.cancel.store(true, Ordering::Relaxed);
	}

	/// Wait for the engine thread to finish.
	pub fn join(mut self) {
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pipeline::PipelineConfig;
	use std::fs;
	use tempfile::TempDir;

	#[smol_potat::test]
	async fn test_engine_emits_progress_then_completion() {
		let work = TempDir::new().unwrap();
		let catalog = TempDir::new().unwrap();
		let inventory = TempDir::new().unwrap();
		fs::create_dir_all(catalog.path().join("A_12345")).unwrap();
		fs::write(catalog.path().join("A_12345/A_12345_BR9.DBF"), b"dbf").unwrap();
		fs::write(
			inventory.path().join("PART0105.DAT"),
			"HEADER\n1,2,\"A_12345\",\"D\",\"BR9\",\"B\"\n",
		)
		.unwrap();

		let config = PipelineConfig::new(
			work.path().join("root"),
			catalog.path().to_path_buf(),
			inventory.path().to_path_buf(),
		);
		let pipeline = Pipeline::new(config).unwrap();
		let engine = BroadcastEngine::start(pipeline);
		let events = engine.events();

		let mut site_events = Vec::new();
		let mut completed = None;
		while let Ok(event) = events.recv().await {
			match event {
				PipelineEvent::Started => {}
				PipelineEvent::SiteArchived { percent, site_id } => {
					site_events.push((percent, site_id));
				}
				PipelineEvent::Completed(summary) => {
					completed = Some(summary);
					break;
				}
				PipelineEvent::Failed(reason) => panic!("run failed: {reason}"),
			}
		}
		engine.join();

		assert_eq!(site_events, vec![(100, "0105".to_string())]);
		let summary = completed.unwrap();
		assert_eq!(summary.archived_sites, vec!["0105"]);
	}

	#[smol_potat::test]
	async fn test_engine_reports_failure() {
		let work = TempDir::new().unwrap();
		let config = PipelineConfig::new(
			work.path().join("root"),
			work.path().join("no-catalog"),
			work.path().join("no-inventory"),
		);
		let pipeline = Pipeline::new(config).unwrap();
		let engine = BroadcastEngine::start(pipeline);
		let events = engine.events();

		let mut failed = None;
		while let Ok(event) = events.recv().await {
			if let PipelineEvent::Failed(reason) = event {
				failed = Some(reason);
				break;
			}
		}
		engine.join();

		let reason = failed.unwrap();
		assert!(reason.contains("required input missing"));
	}
}
