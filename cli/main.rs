#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{CommandFactory, Parser, Subcommand};
use genobase::config::BaselineConfig;
use genobase::evaluate::ResultRow;
use genobase::progress::RunProgressObserver;
use genobase::runner::{SplitSummary, inspect, run_with_progress};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "genobase",
    version,
    about = "Genotype-only grain yield baseline with a cross-validated lasso",
    long_about = "Fits a cross-validated lasso on genotype features for every train/val/test \
                 split of a field-trial dataset and writes MAE, MSE, R2 and Pearson r per split."
)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the baseline on every split and write the result table
    #[command(about = "Run the genotype baseline (outputs: genotype_results.csv)")]
    Run {
        /// Path to the TOML run configuration
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Evaluate splits 0..N instead of the configured count
        #[arg(long, value_name = "N")]
        num_splits: Option<usize>,

        /// Write the result table here instead of the configured path
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Report partition sizes without fitting anything
    #[command(about = "Inspect the genotype partitions of the configured splits")]
    Inspect {
        /// Path to the TOML run configuration
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Only inspect this split
        #[arg(long, value_name = "I")]
        split: Option<usize>,
    },
}

fn main() {
    let Cli { verbose, command } = Cli::parse();
    init_logging(verbose);

    let result = match command {
        Some(Commands::Run {
            config,
            num_splits,
            output,
        }) => run_baseline(config, num_splits, output),
        Some(Commands::Inspect { config, split }) => run_inspect(config, split),
        None => {
            let printed = Cli::command().print_help();
            println!();
            printed.map_err(Into::into)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run_baseline(
    config_path: PathBuf,
    num_splits: Option<usize>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let mut config = BaselineConfig::load(&config_path)?;
    if let Some(num_splits) = num_splits {
        config.run.num_splits = num_splits;
    }
    if let Some(output) = output {
        config.output.results = output;
    }

    let mut progress = SplitProgressBar::default();
    let table = run_with_progress(&config, &mut progress)?;

    println!("method\tsplit_id\tmae\tmse\tr2_sc\tpears");
    for row in table.rows() {
        println!(
            "{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            row.method, row.split_id, row.mae, row.mse, row.r2_sc, row.pears
        );
    }
    println!("Results written to {}", config.output.results.display());
    Ok(())
}

fn run_inspect(config_path: PathBuf, split: Option<usize>) -> Result<(), Box<dyn Error>> {
    let config = BaselineConfig::load(&config_path)?;
    for summary in inspect(&config, split)? {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &SplitSummary) {
    let SplitSummary {
        split,
        plots,
        genotypes,
        overlapping,
    } = summary;
    println!(
        "Split {split}: plots train={} val={} test={}; genotypes train={} val={} test={}; \
         in more than one partition={overlapping}",
        plots.train, plots.val, plots.test, genotypes.train, genotypes.val, genotypes.test
    );
}

/// Split counter on stderr, hidden when stderr is not a terminal.
#[derive(Default)]
struct SplitProgressBar {
    bar: Option<ProgressBar>,
}

impl RunProgressObserver for SplitProgressBar {
    fn on_run_start(&mut self, total_splits: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_splits as u64), draw_target);
        let style = ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} splits {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        self.bar = Some(bar);
    }

    fn on_split_start(&mut self, split: usize) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("fitting split {split}"));
        }
    }

    fn on_split_finish(&mut self, row: &ResultRow) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("split {} R2 {:.4}", row.split_id, row.r2_sc));
            bar.inc(1);
        }
    }

    fn on_run_finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
