//! System scheduler for orchestrating system execution

use crate::data::RunState;
use crate::error::SystemResult;
use crate::systems::{SystemContext, SystemRunner};
use tracing::{debug, info};

pub struct SystemScheduler {
	pub systems: Vec<Box<dyn SystemRunner>>,
}

impl Default for SystemScheduler {
	fn default() -> Self {
		Self::new()
	}
}

impl SystemScheduler {
	pub fn new() -> Self {
		Self {
			systems: Vec::new(),
		}
	}

	pub fn add_system<S: SystemRunner + 'static>(&mut self, system: S) {
		debug!("Scheduler: added system");
		self.systems.push(Box::new(system));
	}

	/// Add a pre-boxed system (useful for dynamic registration by callers)
	pub fn add_boxed_system(&mut self, system: Box<dyn SystemRunner>) {
		debug!("Scheduler: added boxed system");
		self.systems.push(system);
	}

	/// Run every runnable system once, in registration order, checking the
	/// cancellation flag between systems. Registration order follows the
	/// pipeline state machine, so a single sequential pass is the whole run.
	pub async fn run_all(&self, state: &mut RunState, context: &SystemContext) -> SystemResult<()> {
		info!("Scheduler: running {} systems", self.systems.len());
		for system in self.systems.iter() {
			context.ensure_not_cancelled("Scheduler")?;
			if !system.can_run(state) {
				debug!("Scheduler: skipping system {} (cannot run)", system.name());
				continue;
			}
			debug!("Scheduler: running system {}", system.name());
			system.run(state, context).await?;
			debug!("Scheduler: completed system {}", system.name());
		}
		Ok(())
	}
}
