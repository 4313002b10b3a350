use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use faceid_core::{
    CropRegion, Decision, Gallery, ImageRole, Preprocessor, RawImage, SiameseModel, Verifier,
    VerifyError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{spawn_engine, EngineError, EngineHandle};

#[derive(Parser)]
#[command(name = "faceid", about = "Siamese face verification against a reference gallery")]
struct Cli {
    /// TOML config file (default: $FACEID_CONFIG, then ./faceid.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a probe image against the reference gallery
    Verify(VerifyArgs),
    /// Print the similarity score for one pair of images
    Score {
        /// Probe image
        probe: PathBuf,
        /// Reference image
        reference: PathBuf,
    },
    /// List gallery references in verification order
    Gallery {
        /// Gallery directory
        #[arg(long)]
        gallery: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct VerifyArgs {
    /// Probe image to verify
    #[arg(long)]
    probe: Option<PathBuf>,
    /// Directory of reference images
    #[arg(long)]
    gallery: Option<PathBuf>,
    /// Crop the probe to `x,y,width,height` before verification (e.g. 200,120,250,250)
    #[arg(long)]
    crop: Option<CropRegion>,
    /// Write the (cropped) probe to this path before verifying
    #[arg(long)]
    save_probe: Option<PathBuf>,
    /// Per-pair score a reference must exceed to count as a detection
    #[arg(long)]
    detection_threshold: Option<f32>,
    /// Fraction of detections the gallery must exceed to verify
    #[arg(long)]
    verification_threshold: Option<f32>,
    /// Threads used to score gallery pairs
    #[arg(long)]
    workers: Option<usize>,
    /// Print the decision as JSON
    #[arg(long)]
    json: bool,
}

impl VerifyArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(probe) = &self.probe {
            config.probe_path = probe.clone();
        }
        if let Some(gallery) = &self.gallery {
            config.gallery_dir = gallery.clone();
        }
        if let Some(crop) = self.crop {
            config.probe_crop = Some(crop);
        }
        if let Some(t) = self.detection_threshold {
            config.detection_threshold = t;
        }
        if let Some(t) = self.verification_threshold {
            config.verification_threshold = t;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
    }
}

/// JSON form of a verification: the decision plus reference ids in score order.
#[derive(Serialize)]
struct VerifyReport<'a> {
    #[serde(flatten)]
    decision: &'a Decision,
    references: &'a [String],
}

/// Exit status when the probe is not verified.
const EXIT_UNVERIFIED: u8 = 1;
/// Exit status when the command fails before reaching a decision.
const EXIT_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    ExitCode::from(exit_status(run(Cli::parse()).await))
}

/// Map a command outcome to a process status; errors never share the
/// "unverified" status.
fn exit_status(outcome: Result<u8>) -> u8 {
    match outcome {
        Ok(status) => status,
        Err(err) => {
            eprintln!("Error: {err:#}");
            EXIT_FAILURE
        }
    }
}

fn verdict_status(verified: bool) -> u8 {
    if verified {
        0
    } else {
        EXIT_UNVERIFIED
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Verify(args) => {
            args.apply(&mut config);
            run_verify(&config, args.save_probe.as_deref(), args.json).await
        }
        Commands::Score { probe, reference } => {
            let handle = start_engine(&config)?;
            let label = [reference.display().to_string()];
            let probe = read_image(&probe)?;
            let reference = read_image(&reference)?;
            let score = with_timeout(&config, handle.score(probe, reference))
                .await?
                .map_err(|e| explain(e, &label))?;
            println!("{score:.6}");
            Ok(0)
        }
        Commands::Gallery { gallery } => {
            let dir = gallery.unwrap_or(config.gallery_dir);
            let gallery = Gallery::load_dir(&dir)
                .with_context(|| format!("loading gallery {}", dir.display()))?;
            if gallery.is_empty() {
                println!("No reference images in {}", dir.display());
            }
            for (index, id) in gallery.ids().iter().enumerate() {
                println!("{index:>4}  {id}");
            }
            Ok(0)
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

async fn run_verify(config: &Config, save_probe: Option<&Path>, json: bool) -> Result<u8> {
    let mut probe = read_image(&config.probe_path)?;
    if let Some(region) = config.probe_crop {
        probe = Preprocessor::default()
            .crop(&probe, region)
            .map_err(|source| {
                explain(
                    EngineError::Verify(VerifyError::InvalidImage {
                        image: ImageRole::Probe,
                        source,
                    }),
                    &[],
                )
            })?;
    }
    if let Some(path) = save_probe {
        write_image(&probe, path)?;
        tracing::info!(path = %path.display(), "probe saved");
    }

    let gallery = Gallery::load_dir(&config.gallery_dir)
        .with_context(|| format!("loading gallery {}", config.gallery_dir.display()))?;
    let (ids, images) = gallery.into_parts();

    let handle = start_engine(config)?;
    let decision = with_timeout(config, handle.verify(probe, images, config.thresholds()))
        .await?
        .map_err(|e| explain(e, &ids))?;

    if json {
        let report = VerifyReport {
            decision: &decision,
            references: &ids,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}",
            if decision.verified { "Verified" } else { "Unverified" }
        );
        println!(
            "detections: {}/{}  ratio: {:.3}  (detection > {}, verification > {})",
            decision.detections,
            decision.scores.len(),
            decision.ratio,
            config.detection_threshold,
            config.verification_threshold,
        );
        for (id, score) in ids.iter().zip(&decision.scores) {
            println!("  {score:.6}  {id}");
        }
    }

    Ok(verdict_status(decision.verified))
}

fn start_engine(config: &Config) -> Result<EngineHandle> {
    let model_path = config.model_path.to_string_lossy();
    let model = SiameseModel::load(&model_path)
        .with_context(|| format!("loading siamese model {model_path}"))?;
    let verifier = Verifier::new(model).with_workers(config.workers);
    Ok(spawn_engine(verifier)?)
}

async fn with_timeout<T>(config: &Config, request: impl std::future::Future<Output = T>) -> Result<T> {
    let limit = Duration::from_secs(config.verify_timeout_secs);
    tokio::time::timeout(limit, request)
        .await
        .with_context(|| format!("request timed out after {}s", config.verify_timeout_secs))
}

fn read_image(path: &Path) -> Result<RawImage> {
    RawImage::open(path).with_context(|| format!("reading image {}", path.display()))
}

fn write_image(image: &RawImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match image {
        RawImage::Encoded(bytes) => std::fs::write(path, bytes)?,
        RawImage::Decoded(img) => img
            .save(path)
            .with_context(|| format!("saving probe {}", path.display()))?,
    }
    Ok(())
}

/// Attach a user-facing explanation to an engine error. `ids` names gallery
/// entries by position.
fn explain(err: EngineError, ids: &[String]) -> anyhow::Error {
    let name = |index: usize| {
        ids.get(index)
            .cloned()
            .unwrap_or_else(|| format!("#{index}"))
    };
    let message = match &err {
        EngineError::Verify(VerifyError::EmptyGallery) => {
            "no reference images in the gallery; add verification images and try again".to_string()
        }
        EngineError::Verify(VerifyError::InvalidImage {
            image: ImageRole::Probe,
            ..
        }) => "the probe image could not be used; recapture and try again".to_string(),
        EngineError::Verify(VerifyError::InvalidImage {
            image: ImageRole::Reference(index),
            ..
        }) => format!("gallery image {} could not be used", name(*index)),
        EngineError::Verify(VerifyError::ModelInference { index, .. }) => format!(
            "the similarity model failed on gallery image {}; retry or use a different gallery",
            name(*index)
        ),
        EngineError::ChannelClosed | EngineError::Spawn(_) => {
            "the verification engine stopped unexpectedly".to_string()
        }
    };
    anyhow::Error::new(err).context(message)
}
