use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use votegate::{config, EmbeddingExtractor, GateError, Pipeline, SectionMarker, Verifier};

#[derive(Parser)]
#[command(name = "votegate")]
#[command(
    version,
    about = "Voter face verification against a preloaded reference gallery"
)]
struct Cli {
    /// Config file (defaults to $VOTEGATE_CONFIG or the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the reference gallery and list its entries
    Gallery {
        /// Gallery directory (overrides the config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Verify an uploaded photo against the gallery
    Verify {
        /// Election section selected by the voter
        #[arg(short, long)]
        section: Option<String>,
        /// Photo to verify
        image: PathBuf,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare two photos directly
    Compare { first: PathBuf, second: PathBuf },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Gallery { dir } => {
            let mut cfg = config::load_config(config_path)?;
            if let Some(dir) = dir {
                cfg.gallery_dir = dir;
            }
            gallery(&cfg)
        }
        Commands::Verify {
            section,
            image,
            json,
        } => {
            let cfg = config::load_config(config_path)?;
            verify(&cfg, section.map(SectionMarker::new), &image, json)
        }
        Commands::Compare { first, second } => {
            let cfg = config::load_config(config_path)?;
            compare(&cfg, &first, &second)
        }
        // Not loaded here, so an invalid file can still be edited
        Commands::Config => open_config(config_path),
    }
}

fn extractor(cfg: &config::Config) -> Result<Arc<dyn EmbeddingExtractor>> {
    let pipeline = Pipeline::new(&cfg.model_paths(), cfg.detection_options())
        .context("Failed to initialize face recognition pipeline")?;
    Ok(Arc::new(pipeline))
}

fn gallery(cfg: &config::Config) -> Result<()> {
    let verifier = Verifier::new(cfg, extractor(cfg)?)?;

    for entry in verifier.gallery().entries() {
        let (w, h) = entry.thumbnail().dimensions();
        println!(
            "{}\tdim={}\tthumbnail={}x{}",
            entry.identity(),
            entry.embedding().dim(),
            w,
            h
        );
    }
    for (identity, reason) in &verifier.load_report().skipped {
        println!("{identity}\tskipped: {reason}");
    }

    info!(
        "{} reference image(s) in {}",
        verifier.gallery_size(),
        cfg.gallery_dir.display()
    );
    Ok(())
}

fn verify(
    cfg: &config::Config,
    section: Option<SectionMarker>,
    image: &Path,
    json: bool,
) -> Result<()> {
    let raw = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let verifier = Verifier::new(cfg, extractor(cfg)?)?;

    let outcome = match verifier.verify(section.as_ref(), &raw) {
        Ok(outcome) => outcome,
        Err(GateError::SectionRequired) => {
            anyhow::bail!("{}; pass --section", GateError::SectionRequired)
        }
        Err(GateError::Fault(e)) => return Err(e.context("Face verification failed")),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.message);
    }

    outcome.ensure_granted()
}

fn compare(cfg: &config::Config, first: &Path, second: &Path) -> Result<()> {
    let a = std::fs::read(first).with_context(|| format!("reading {}", first.display()))?;
    let b = std::fs::read(second).with_context(|| format!("reading {}", second.display()))?;

    // Pairwise comparison needs no reference photos
    let verifier = Verifier::with_gallery(
        votegate::Gallery::default(),
        extractor(cfg)?,
        cfg.threshold,
        cfg.thumbnail_options(),
    );
    let result = verifier.compare(&a, &b)?;
    println!("{}", result.message());
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = config::ensure_config_file(path)?;
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
