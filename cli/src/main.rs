use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing::{Level, subscriber::set_global_default};
fn init_tracing(verbosity: u8) {
    // Map -q/-v to tracing levels; default INFO
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::from_default_env()
        .add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr) // logs to stderr
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    // Ignore error if already set in tests or env
    let _ = set_global_default(subscriber);
}

use partcast::{dispatch_processed, BroadcastEngine, Pipeline, PipelineConfig, PipelineEvent};

fn main() {
    let opts = Opts::parse();
    init_tracing(1 + opts.verbose.saturating_sub(opts.quiet));
    if let Err(e) = run(opts) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(opts: Opts) -> anyhow::Result<()> {
    match opts.command {
        Command::Build {
            working_root,
            catalog,
            inventory,
            allowlist,
        } => {
            let mut config = PipelineConfig::new(working_root, catalog, inventory);
            if let Some(list) = allowlist {
                config = config.with_allowlist(list);
            }
            let pipeline = Pipeline::new(config)?;
            let engine = BroadcastEngine::start(pipeline);
            let events = engine.events();

            let summary = futures_lite::future::block_on(async move {
                loop {
                    match events.recv().await {
                        Ok(PipelineEvent::Started) => {
                            println!("Update build started");
                        }
                        Ok(PipelineEvent::SiteArchived { percent, site_id }) => {
                            println!("[{percent:>3}%] Processed site {site_id}");
                        }
                        Ok(PipelineEvent::Completed(summary)) => break Ok(summary),
                        Ok(PipelineEvent::Failed(reason)) => {
                            break Err(anyhow::anyhow!(reason));
                        }
                        Err(_) => break Err(anyhow::anyhow!("engine channel closed early")),
                    }
                }
            })?;
            engine.join();

            print_summary_counts(
                summary.archived_sites.len(),
                summary.failed_sites.len(),
                summary.orphan_count,
            );
            for failed in &summary.failed_sites {
                eprintln!("site {} failed: {}", failed.site_id, failed.reason);
            }
            if !summary.is_clean() {
                anyhow::bail!("{} site(s) failed to build", summary.failed_sites.len());
            }
        }
        Command::Dispatch { working_root, dest } => {
            let moved = dispatch_processed(&working_root, &dest)?;
            println!("Moved {moved} archive(s) to {}", dest.display());
        }
    }
    Ok(())
}

fn print_summary_counts(archived: usize, failed: usize, orphans: usize) {
    println!("Archived sites: {archived}");
    println!("Failed sites:   {failed}");
    println!("Orphan records: {orphans}");
}

#[derive(Parser)]
#[command(version, about = "partcast: per-site parts-catalog update builder")]
pub struct Opts {
    /// Increase verbosity (-v, -vv). Default INFO.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Decrease verbosity (-q). Each -q reduces level by one step.
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build per-site update archives from a catalog and an inventory tree
    Build {
        /// Directory owning all intermediate and output state
        #[arg(long)]
        working_root: PathBuf,
        /// Master parts-catalog directory (read-only)
        catalog: PathBuf,
        /// Per-site inventory directory of PART####.DAT files (read-only)
        inventory: PathBuf,
        /// Single-column CSV of site ids to route into the allowlist output
        #[arg(long)]
        allowlist: Option<PathBuf>,
    },
    /// Move the processed-output archives to a destination folder
    Dispatch {
        /// Directory owning the UPDATE/PROCESSED output of a build
        #[arg(long)]
        working_root: PathBuf,
        /// Destination folder receiving the archives
        dest: PathBuf,
    },
}
