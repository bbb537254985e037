use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use flapbots_app::{ConfigArgs, EvolveOptions, best, evolve, record, train};
use flapbots_core::{Canceller, ExperimentSummary};
use owo_colors::OwoColorize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "flapbots",
    version,
    about = "Evolve and train pipe-dodging agents"
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct SearchArgs {
    /// Generations to run.
    #[arg(long, env = "FLAPBOTS_ITERATIONS", default_value_t = 100)]
    iterations: u64,

    /// Keep going after a candidate solves the task.
    #[arg(long)]
    keep_going: bool,

    /// Hidden layer width of evolved brains.
    #[arg(long, default_value_t = 8)]
    hidden: usize,

    /// DuckDB file receiving the best candidate of every generation.
    #[arg(long, env = "FLAPBOTS_DB")]
    db: Option<PathBuf>,
}

impl SearchArgs {
    fn options(&self, show_status: bool) -> EvolveOptions {
        EvolveOptions {
            iterations: self.iterations,
            stop_on_solution: !self.keep_going,
            hidden: self.hidden,
            database: self.db.clone(),
            show_status,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evolve model-driven candidates in the live simulation.
    Evolve {
        #[command(flatten)]
        search: SearchArgs,
        /// Suppress the status line.
        #[arg(long)]
        quiet: bool,
    },
    /// Play with the keyboard (space to jump, 1-9 to pick a level, q to quit)
    /// and record traces.
    Record {
        /// Trace file to append to.
        #[arg(long, default_value = "flapbots.jsonl")]
        traces: PathBuf,
        /// Number of attempts before exiting.
        #[arg(long, default_value_t = 1)]
        attempts: u32,
    },
    /// Evolve candidates that reproduce recorded traces.
    Train {
        /// Trace file produced by `record`.
        #[arg(long, default_value = "flapbots.jsonl")]
        traces: PathBuf,
        #[command(flatten)]
        search: SearchArgs,
    },
    /// List the best stored candidates.
    Best {
        #[arg(long, env = "FLAPBOTS_DB", default_value = "flapbots.duckdb")]
        db: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print records as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn report_summary(summary: &ExperimentSummary) {
    println!(
        "{} after {} generations ({:?})",
        "finished".green().bold(),
        summary.generations,
        summary.stop
    );
    if let Some(best) = summary.best {
        println!(
            "{} id {} fitness {:.3} solved {}",
            "best".cyan().bold(),
            best.id,
            best.fitness,
            best.solved
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let canceller = Canceller::new();
    let ctrl_c = canceller.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; stopping");
            ctrl_c.cancel();
        } else {
            warn!("failed to install Ctrl-C handler");
        }
    });

    match cli.command {
        Command::Evolve { search, quiet } => {
            let config = cli.config.resolve()?;
            let summary = evolve(config, search.options(!quiet), canceller).await?;
            report_summary(&summary);
        }
        Command::Record { traces, attempts } => {
            let config = cli.config.resolve()?;
            let scores = record(config, &traces, attempts, canceller).await?;
            for (attempt, fitness) in scores.iter().enumerate() {
                println!("{} {attempt}: {fitness:.3}", "attempt".green().bold());
            }
            println!("traces appended to {}", traces.display().bold());
        }
        Command::Train { traces, search } => {
            let config = cli.config.resolve()?;
            let summary = train(config, &traces, search.options(false), canceller).await?;
            report_summary(&summary);
        }
        Command::Best { db, limit, json } => {
            let records = best(&db, limit)?;
            if records.is_empty() {
                println!("{}", "No candidates stored yet".yellow());
                return Ok(());
            }
            if json {
                for record in &records {
                    println!("{}", serde_json::to_string(record)?);
                }
                return Ok(());
            }
            println!(
                "{:<8} {:<6} {:>12} {}",
                "ID".bold().cyan(),
                "GEN".bold().cyan(),
                "FITNESS".bold().cyan(),
                "SOLVED".bold().cyan()
            );
            println!("{}", "-".repeat(40).dimmed());
            for record in records {
                let solved = if record.solved {
                    "yes".green().to_string()
                } else {
                    "no".dimmed().to_string()
                };
                println!(
                    "{:<8} {:<6} {:>12.3} {}",
                    record.id.to_string().bold(),
                    record.generation,
                    record.fitness,
                    solved
                );
            }
        }
    }

    Ok(())
}
