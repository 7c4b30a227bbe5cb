use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use harpspec::{
    collate, infer_dataset, load_dataset, match_labels, process, save_dataset, LabelModel, LabelTable,
    ProcessParams, Progress, QuadraticLabelModel, TableSpectrumLoader, TrainedQuadraticModel,
};

#[derive(Parser)]
#[command(name = "harpspec")]
#[command(about = "Collate, normalize and label HARPS stellar spectra", long_about = None)]
#[command(version)]
struct Cli {
    /// Worker threads for per-target work (default: all cores)
    #[arg(short = 't', long, global = true, value_name = "N")]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collate a spectrum file or a directory of spectrum files into a dataset
    Collate {
        /// Spectrum file (.parquet, .json, .csv) or directory of them
        #[arg(value_name = "FILE|DIR")]
        target: PathBuf,
        /// Output dataset (.parquet)
        dest: PathBuf,
    },

    /// Attach labels to targets whose id starts with a label-table id
    Match {
        /// Dataset written by 'collate'
        dataset: PathBuf,
        /// Label table: id column followed by numeric label columns
        #[arg(value_name = "LABEL-FILE")]
        labels: PathBuf,
        /// Output dataset (.parquet)
        dest: PathBuf,
    },

    /// Resample, align, downsample and continuum-normalize a dataset
    Process {
        /// Processing parameters (.json)
        params: PathBuf,
        /// Input dataset
        dataset: PathBuf,
        /// Output dataset (.parquet)
        dest: PathBuf,
        /// Also write the velocity shift of every aligned target (CSV)
        #[arg(long, value_name = "FILE")]
        shifts: Option<PathBuf>,
    },

    /// Fit the quadratic label model to a labeled, processed dataset
    Train {
        /// Labeled, processed dataset
        dataset: PathBuf,
        /// Output model (.json)
        model: PathBuf,
    },

    /// Infer labels for a processed dataset
    Infer {
        /// Processed dataset
        dataset: PathBuf,
        /// Model written by 'train'
        model: PathBuf,
        /// Output dataset (.parquet)
        dest: PathBuf,
    },
}

fn write_shifts(path: &Path, targets: &[String], shifts: &[f64]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["target", "z"])?;
    for (target, z) in targets.iter().zip(shifts) {
        writer.write_record([target.as_str(), z.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn run(command: Commands) -> Result<()> {
    let progress = Progress::logging();
    match command {
        Commands::Collate { target, dest } => {
            let dataset = collate(&target, &TableSpectrumLoader, &progress)
                .with_context(|| format!("Failed to collate {}", target.display()))?;
            save_dataset(&dataset, &dest).with_context(|| format!("Failed to write {}", dest.display()))?;
        }
        Commands::Match { dataset, labels, dest } => {
            let ds = load_dataset(&dataset).with_context(|| format!("Failed to read {}", dataset.display()))?;
            let table = LabelTable::load(&labels)
                .with_context(|| format!("Failed to read label file {}", labels.display()))?;
            let matched = match_labels(&ds, &table)?;
            save_dataset(&matched, &dest).with_context(|| format!("Failed to write {}", dest.display()))?;
        }
        Commands::Process {
            params,
            dataset,
            dest,
            shifts,
        } => {
            let params = ProcessParams::load(&params)
                .with_context(|| format!("Failed to read parameters {}", params.display()))?;
            let ds = load_dataset(&dataset).with_context(|| format!("Failed to read {}", dataset.display()))?;
            let out = process(&ds, &params, &progress).context("Processing failed")?;
            for target in &out.excluded {
                warn!("excluded '{target}': no usable alignment line");
            }
            save_dataset(&out.dataset, &dest).with_context(|| format!("Failed to write {}", dest.display()))?;
            if let Some(path) = shifts {
                write_shifts(&path, out.dataset.targets(), &out.shifts)
                    .with_context(|| format!("Failed to write shifts {}", path.display()))?;
            }
        }
        Commands::Train { dataset, model } => {
            let ds = load_dataset(&dataset).with_context(|| format!("Failed to read {}", dataset.display()))?;
            let trained = QuadraticLabelModel::default().fit(&ds).context("Training failed")?;
            trained
                .save(&model)
                .with_context(|| format!("Failed to write model {}", model.display()))?;
        }
        Commands::Infer { dataset, model, dest } => {
            let ds = load_dataset(&dataset).with_context(|| format!("Failed to read {}", dataset.display()))?;
            let trained = TrainedQuadraticModel::load(&model)
                .with_context(|| format!("Failed to read model {}", model.display()))?;
            let labeled = infer_dataset(&QuadraticLabelModel::default(), &trained, &ds, &progress)
                .context("Inference failed")?;
            save_dataset(&labeled, &dest).with_context(|| format!("Failed to write {}", dest.display()))?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build the worker thread pool")?;
        info!("using {threads} worker threads");
    }

    run(cli.command)
}
