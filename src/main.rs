use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ne_light::config::PipelineConfig;
use ne_light::evaluate::run_evaluation;
use ne_light::simulation::{run_simulations, SimulationEvent, CONFIG_FILE};
use ne_light::train::run_training;

/// Predict effective population size from simulated genomes.
///
/// Simulates coalescent replicates over a range of Ne, trains a small
/// feed-forward network on their segregating-site positions and evaluates it
/// on a held-out split.
#[derive(Parser, Debug)]
#[command(name = "ne_light")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults, then <output>/config.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding replicates, manifest, model and reports
    #[arg(short, long, global = true, default_value = "ne_data")]
    output: PathBuf,

    /// Worker threads for the simulation pool and rayon
    #[arg(short = 't', long, global = true)]
    threads: Option<usize>,

    /// Master random seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Hide the simulation progress bar
    #[arg(long, global = true)]
    quiet: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Simulate replicates and write them with a manifest.
    Simulate,
    /// Train a model on an existing manifest.
    Train,
    /// Evaluate a trained model on the test split.
    Evaluate,
    /// Simulate, train and evaluate in sequence.
    Run,
}

/// Per-parameter overrides of the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Number of replicates
    #[arg(long, global = true)]
    replicates: Option<usize>,
    /// Sampled individuals per replicate
    #[arg(long, global = true)]
    sample_size: Option<usize>,
    /// Sequence length (bp)
    #[arg(long, global = true)]
    sequence_length: Option<f64>,
    /// Recombination rate per bp per generation
    #[arg(long, global = true)]
    recombination_rate: Option<f64>,
    /// Mutation rate per bp per generation
    #[arg(long, global = true)]
    mutation_rate: Option<f64>,
    /// Lower bound of the Ne prior
    #[arg(long, global = true)]
    ne_min: Option<f64>,
    /// Upper bound of the Ne prior
    #[arg(long, global = true)]
    ne_max: Option<f64>,
    /// Fraction of replicates used for training
    #[arg(long, global = true)]
    train_fraction: Option<f64>,
    /// Fraction of replicates used for validation
    #[arg(long, global = true)]
    validation_fraction: Option<f64>,
    /// Fraction of replicates held out for testing
    #[arg(long, global = true)]
    test_fraction: Option<f64>,
    /// Input length of the network
    #[arg(long, global = true)]
    max_snps: Option<usize>,
    #[arg(long, global = true)]
    batch_size: Option<usize>,
    #[arg(long, global = true)]
    epochs: Option<usize>,
    #[arg(long, global = true)]
    learning_rate: Option<f64>,
    #[arg(long, global = true)]
    momentum: Option<f64>,
}

impl Cli {
    /// Train and evaluate pick up the configuration the simulation wrote.
    fn reuses_saved_config(&self) -> bool {
        matches!(self.command, Commands::Train | Commands::Evaluate)
    }

    fn resolve_config(&self) -> Result<PipelineConfig> {
        let saved = self.output.join(CONFIG_FILE);
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None if self.reuses_saved_config() && saved.exists() => PipelineConfig::load(&saved)
                .with_context(|| format!("failed to load config {}", saved.display()))?,
            None => PipelineConfig::default(),
        };

        let o = &self.overrides;
        let sim = &mut config.simulation;
        set(&mut sim.num_replicates, o.replicates);
        set(&mut sim.sample_size, o.sample_size);
        set(&mut sim.sequence_length, o.sequence_length);
        set(&mut sim.recombination_rate, o.recombination_rate);
        set(&mut sim.mutation_rate, o.mutation_rate);
        set(&mut sim.ne_min, o.ne_min);
        set(&mut sim.ne_max, o.ne_max);
        set(&mut sim.seed, self.seed);
        if self.threads.is_some() {
            sim.workers = self.threads;
        }
        let split = &mut config.split;
        set(&mut split.train, o.train_fraction);
        set(&mut split.validation, o.validation_fraction);
        set(&mut split.test, o.test_fraction);
        let training = &mut config.training;
        set(&mut training.max_snps, o.max_snps);
        set(&mut training.batch_size, o.batch_size);
        set(&mut training.epochs, o.epochs);
        set(&mut training.learning_rate, o.learning_rate);
        set(&mut training.momentum, o.momentum);

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn simulate(config: &PipelineConfig, output: &Path, show_progress: bool) -> Result<()> {
    let (sender, receiver) = crossbeam::channel::unbounded::<SimulationEvent>();
    let progress = std::thread::spawn(move || {
        let mut bar: Option<ProgressBar> = None;
        for event in receiver {
            match event {
                SimulationEvent::Started { replicates } if show_progress => {
                    let pb = ProgressBar::new(replicates as u64);
                    if let Ok(style) = ProgressStyle::default_bar().template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    ) {
                        pb.set_style(style.progress_chars("#>-"));
                    }
                    bar = Some(pb);
                }
                SimulationEvent::ReplicateDone { .. } => {
                    if let Some(pb) = &bar {
                        pb.inc(1);
                    }
                }
                SimulationEvent::Finished { .. } => {
                    if let Some(pb) = &bar {
                        pb.finish_with_message("done");
                    }
                }
                _ => {}
            }
        }
    });

    let result = run_simulations(config, output, Some(&sender));
    drop(sender);
    if progress.join().is_err() {
        tracing::warn!("progress display panicked");
    }
    let rows = result.context("simulation failed")?;
    println!(
        "Simulated {} replicates into {}",
        rows.len(),
        output.display()
    );
    Ok(())
}

fn train(config: &PipelineConfig, output: &Path) -> Result<()> {
    let report = run_training(config, output).context("training failed")?;
    if let Some(loss) = report.final_train_loss() {
        println!(
            "Trained on {} ({} epochs), final train loss {loss:.6}",
            report.device,
            report.epochs.len()
        );
    }
    Ok(())
}

fn evaluate(config: &PipelineConfig, output: &Path) -> Result<()> {
    match run_evaluation(config, output).context("evaluation failed")? {
        Some(metrics) => println!(
            "Test replicates: {}  MSE: {:.1}  MAE: {:.1}  R2: {}",
            metrics.count,
            metrics.mse,
            metrics.mae,
            metrics
                .r2
                .map_or_else(|| "n/a".to_string(), |r2| format!("{r2:.3}"))
        ),
        None => println!("No test replicates to evaluate"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    let config = cli.resolve_config()?;
    let output = cli.output.as_path();
    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    match cli.command {
        Commands::Simulate => simulate(&config, output, !cli.quiet)?,
        Commands::Train => train(&config, output)?,
        Commands::Evaluate => evaluate(&config, output)?,
        Commands::Run => {
            simulate(&config, output, !cli.quiet)?;
            train(&config, output)?;
            evaluate(&config, output)?;
        }
    }
    Ok(())
}
