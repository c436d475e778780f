use anyhow::{bail, Context};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use reducecore::imageset::{ImagesetCache, LoadMode};

use scan::config::ScanConfig;
use scan::report;
use scan::runner::{ScanRunner, ToolchainAnalyzer};

mod scan;

/// Base directories that must be configured before any scan starts.
const REQUIRED_ENVIRONMENT: [&str; 2] = ["REDUCE_ROOT", "REDUCE_DATA_ROOT"];

#[derive(Parser)]
#[command(author, version, about = "Batch diffraction-strength scanner")]
struct Args {
    /// Image filename template, e.g. scan_####.img
    #[arg(long)]
    template: Option<String>,
    /// Directory holding the image files
    #[arg(long)]
    directory: Option<PathBuf>,
    /// Beam centre override as "x,y" in mm
    #[arg(long)]
    beam: Option<String>,
    /// First frame of the inclusive scan window
    #[arg(long)]
    first: Option<usize>,
    /// Last frame of the inclusive scan window
    #[arg(long)]
    last: Option<usize>,
    /// Omit zero-volume rows from the printed report
    #[arg(long, default_value_t = false)]
    omit: bool,
    /// Load the scan configuration from YAML instead of flags
    #[arg(long)]
    scan: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    check_environment()?;
    let args = Args::parse();

    let config = if let Some(path) = args.scan {
        ScanConfig::load(path)?
    } else {
        let template = args
            .template
            .context("either --scan or --template/--directory is required")?;
        let directory = args
            .directory
            .context("either --scan or --template/--directory is required")?;
        let beam = args.beam.as_deref().map(parse_beam).transpose()?;
        ScanConfig::from_args(template, directory, beam, args.first, args.last, args.omit)
    };

    let work_root = PathBuf::from(
        std::env::var_os("REDUCE_DATA_ROOT").context("REDUCE_DATA_ROOT is not defined")?,
    );
    let cache = ImagesetCache::new(LoadMode::TemplateImport);
    let runner = ScanRunner::new(config.clone());
    let mut analyzer = ToolchainAnalyzer::new(&config, work_root);

    let stdout = std::io::stdout();
    let mut progress = stdout.lock();
    let outcomes = runner.execute(&cache, &mut analyzer, &mut progress)?;

    let rendered = report::render(&outcomes, config.failed_rows, config.omit_empty);
    progress.write_all(rendered.as_bytes())?;

    let metrics = runner.metrics();
    log::info!(
        "scan finished: {} frames, {} failed, {} tool invocations",
        metrics.frames_processed,
        metrics.frames_failed,
        analyzer.metrics().invocations
    );
    Ok(())
}

fn check_environment() -> anyhow::Result<()> {
    for key in REQUIRED_ENVIRONMENT {
        if std::env::var_os(key).is_none() {
            bail!("{key} is not defined");
        }
    }
    Ok(())
}

fn parse_beam(value: &str) -> anyhow::Result<(f64, f64)> {
    let (x, y) = value
        .split_once(',')
        .with_context(|| format!("beam centre {value} is not of the form x,y"))?;
    Ok((
        x.trim()
            .parse()
            .with_context(|| format!("bad beam x coordinate in {value}"))?,
        y.trim()
            .parse()
            .with_context(|| format!("bad beam y coordinate in {value}"))?,
    ))
}
