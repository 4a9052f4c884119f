use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{similarity, select_best, BgrImage, FaceAnalyzer, InsightPack};
use facecheck_service::config::{acceptance_threshold, THRESHOLD_VAR};
use facecheck_service::{handle, Config, ModelProvider, S3ObjectStore, Verifier};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facecheck", about = "facecheck face verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Lambda handler locally on two S3 image locators
    Verify {
        /// s3://bucket/key or https://bucket.s3.amazonaws.com/key
        img1: String,
        img2: String,
    },
    /// Compare the largest faces of two local image files
    Compare {
        file1: PathBuf,
        file2: PathBuf,
        /// Acceptance threshold (defaults to COSINE_MIN_ACCEPT or 0.70)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List every face detected in a local image file
    Detect { file: PathBuf },
    /// Show configuration and model file status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Verify { img1, img2 } => {
            let store = Arc::new(S3ObjectStore::from_env().await);
            let models = Arc::new(ModelProvider::insight(config.pack_config()));
            let verifier = Arc::new(Verifier::new(store, models));

            let event = serde_json::json!({ "img1_url": img1, "img2_url": img2 });
            let response = handle(verifier, event).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Compare {
            file1,
            file2,
            threshold,
        } => {
            let mut pack = InsightPack::load(&config.pack_config())?;
            let (best1, faces1) = select_best(analyze_file(&mut pack, &file1)?);
            let (best2, faces2) = select_best(analyze_file(&mut pack, &file2)?);
            println!("detections: {}={} {}={}", file1.display(), faces1.len(), file2.display(), faces2.len());

            let (Some(e1), Some(e2)) = (best1, best2) else {
                println!("no face detected in at least one image");
                return Ok(());
            };
            let score = similarity::score(&e1, &e2)?;
            let threshold = threshold.unwrap_or_else(acceptance_threshold);
            println!("similarity: {score:.4}");
            println!("threshold:  {threshold:.2}");
            println!("verified:   {}", similarity::decide(score, threshold));
        }
        Commands::Detect { file } => {
            let mut pack = InsightPack::load(&config.pack_config())?;
            let faces = analyze_file(&mut pack, &file)?;
            if faces.is_empty() {
                println!("no faces detected");
            }
            for (i, f) in faces.iter().enumerate() {
                let b = &f.bbox;
                println!(
                    "#{i}: x={:.1} y={:.1} w={:.1} h={:.1} area={:.0} confidence={:.3}",
                    b.x,
                    b.y,
                    b.width,
                    b.height,
                    b.area(),
                    b.confidence
                );
            }
        }
        Commands::Status => {
            let pack = config.pack_config();
            println!("model root:  {}", config.model_root.display());
            println!("threads:     {}", config.intra_threads);
            println!("{THRESHOLD_VAR}: {:.2}", acceptance_threshold());
            print_model("detector", &pack.detector_path());
            print_model("recognizer", &pack.recognizer_path());
        }
    }

    Ok(())
}

fn analyze_file(
    pack: &mut InsightPack,
    path: &Path,
) -> Result<Vec<facecheck_core::FaceDetection>> {
    let image = BgrImage::open(path).with_context(|| format!("loading {}", path.display()))?;
    tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "image loaded");
    pack.analyze(&image)
        .with_context(|| format!("analyzing {}", path.display()))
}

fn print_model(label: &str, path: &Path) {
    let state = if path.exists() { "ok" } else { "MISSING" };
    println!("{label:<11} {} [{state}]", path.display());
}
