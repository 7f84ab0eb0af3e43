/// Point cloud pipeline runner entry point
use clap::Parser;
use log::error;
use point_cloud_pipeline::{PipelineConfig, PipelineError, PipelineExecutor};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about = "Run a point cloud processing pipeline over chunked inputs")]
struct Cli {
    /// JSON configuration with `processing` options and a `pipeline` stage list
    config: PathBuf,

    /// Worker threads, overrides the configuration (0 for every core)
    #[arg(long)]
    ncores: Option<usize>,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,

    /// Also write the run report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = PipelineConfig::from_path(&cli.config)?;
    if let Some(ncores) = cli.ncores {
        config.processing.ncores = ncores;
    }
    config.processing.progress |= cli.progress;

    let executor = PipelineExecutor::from_config(&config)?;
    let report = match executor.run() {
        Ok(report) => report,
        Err(PipelineError::Aborted(errors)) => {
            for e in &errors {
                error!("{}", e);
            }
            return Err(PipelineError::Aborted(errors).into());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(path) = &cli.report {
        report.write(path)?;
    }
    println!("{}", report.to_json()?);

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
