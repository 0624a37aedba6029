//! Bottle-inspection pipeline CLI.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use vision::{DisplaySink, NullSink, PpmDirSink};
use workers::{PipelineConfig, PipelineManager};

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time bottle inspection pipeline")]
struct Args {
    /// JSON pipeline configuration; built-in defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run for this many seconds, then stop. Without it the pipeline runs
    /// until stdin closes or a line starting with 'q' arrives.
    #[arg(long)]
    duration: Option<u64>,

    /// Write every shown frame as a PPM file into this directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Worker join grace on shutdown, milliseconds
    #[arg(long, default_value_t = 1000)]
    grace_ms: u64,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    let sink = build_sink(args.out_dir.as_deref())?;

    let manager = PipelineManager::start(&config, sink).context("starting pipeline")?;
    let stop = manager.fabric().stop.clone();

    match args.duration {
        Some(secs) => {
            info!(secs, "running for a fixed duration");
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_secs(secs));
                stop.trigger();
            });
        }
        None => {
            info!("running until stdin closes (or a 'q' line)");
            std::thread::spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    match line {
                        Ok(line) if line.trim_start().starts_with('q') => break,
                        Ok(_) => continue,
                        Err(_) => break,
                    }
                }
                stop.trigger();
            });
        }
    }

    manager.wait();
    let clean = manager.shutdown(Duration::from_millis(args.grace_ms));
    if !clean {
        warn!("some worker tasks were detached at shutdown");
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn build_sink(out_dir: Option<&Path>) -> Result<Arc<dyn DisplaySink>> {
    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            Ok(Arc::new(PpmDirSink::new(dir)))
        }
        None => Ok(Arc::new(NullSink)),
    }
}
