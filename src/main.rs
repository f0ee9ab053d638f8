use facekiosk::{
    cli::{self, ReplayOptions},
    common::{system_models_dir, Config, DevMode},
    core::{
        detector::select_candidate, AdmissionGate, FaceEmbedder, IdentityStore,
        KioskEngine, OnnxFaceDetector, OnnxFaceEmbedder,
    },
    storage::{FileIdentityStore, IdentityId, MemoryIdentityStore},
};

use clap::{Parser, Subcommand};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facekiosk")]
#[command(about = "Patron recognition kiosk")]
struct Cli {
    /// Enable development mode (keeps identities and debug output in ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a directory of frames through the engine in file name order
    Replay {
        #[arg(short, long)]
        frames: PathBuf,
        /// Keep identities in memory only
        #[arg(long)]
        ephemeral: bool,
        /// Complete the transaction after a session has been active N ticks
        #[arg(long)]
        complete_after: Option<u32>,
        /// Print one JSON object per tick
        #[arg(long)]
        json: bool,
    },
    /// Run detection and admission on a single image
    TestDetection {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// List enrolled identities
    Identities,
    /// Show one enrolled identity
    Show {
        #[arg(long)]
        id: String,
    },
    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config_path = cli.config.clone().unwrap_or_else(|| dev_mode.config_file());

    match cli.command {
        Commands::Replay { frames, ephemeral, complete_after, json } => {
            let config = Config::load_from_path(&config_path)?;
            let options = ReplayOptions { complete_after, json };
            let frame_paths = cli::list_frames(&frames)
                .with_context(|| format!("Failed to list frames in {}", frames.display()))?;
            if frame_paths.is_empty() {
                println!("No frames found in {}", frames.display());
                return Ok(());
            }

            let models_base = models_base(&dev_mode);
            let detector = OnnxFaceDetector::new_with_model_path(&config, models_base.as_deref())?;
            let embedder = OnnxFaceEmbedder::new_with_model_path(&config, models_base.as_deref())?;

            if ephemeral {
                run_replay(&config, &frame_paths, &detector, embedder, MemoryIdentityStore::new(), &options)?;
            } else {
                let store = FileIdentityStore::open_with_dev_mode(&dev_mode)?;
                println!("Using identity store at {} ({} identities)", store.data_dir().display(), store.len());
                run_replay(&config, &frame_paths, &detector, embedder, store, &options)?;
            }
        }
        Commands::TestDetection { image } => {
            let config = Config::load_from_path(&config_path)?;
            test_detection(&config, &dev_mode, &image)?;
        }
        Commands::Identities => {
            let store = FileIdentityStore::open_with_dev_mode(&dev_mode)?;
            if store.is_empty() {
                println!("No identities enrolled in {}", store.data_dir().display());
                return Ok(());
            }
            println!("{} identities in {}:", store.len(), store.data_dir().display());
            for record in store.records() {
                println!("  {}", cli::describe_identity(record));
            }
        }
        Commands::Show { id } => {
            let store = FileIdentityStore::open_with_dev_mode(&dev_mode)?;
            let identity_id = IdentityId::from(id.as_str());
            match store.get(&identity_id)? {
                Some(record) => {
                    println!("{}", cli::describe_identity(&record));
                    println!("  embedding dimension: {}", record.primary_embedding.len());
                    if let Some(path) = &record.face_image_path {
                        println!("  face image: {}", path.display());
                    }
                }
                None => println!("Identity {} not found", identity_id),
            }
        }
        Commands::CheckConfig => {
            let config = Config::load_from_path(&config_path)?;
            println!("Config OK: {}", config_path.display());
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn run_replay<E: FaceEmbedder, S: IdentityStore>(
    config: &Config,
    frames: &[PathBuf],
    detector: &OnnxFaceDetector,
    embedder: E,
    store: S,
    options: &ReplayOptions,
) -> Result<()> {
    let mut engine = KioskEngine::new(config, embedder, store);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let summary = cli::replay(frames, detector, &mut engine, options, &mut out)?;

    println!();
    println!(
        "Replayed {} frames: {} enrolled, {} recognized, {} transactions, {} failed ticks",
        summary.frames, summary.enrolled, summary.recognized, summary.transactions, summary.failed_ticks
    );
    Ok(())
}

fn test_detection(config: &Config, dev_mode: &DevMode, image_path: &Path) -> Result<()> {
    let models_base = models_base(dev_mode);
    let detector = OnnxFaceDetector::new_with_model_path(config, models_base.as_deref())?;
    let gate = AdmissionGate::new(config.admission.clone());

    let frame = image::open(image_path)
        .with_context(|| format!("Failed to open {}", image_path.display()))?;
    println!("Detecting faces in {} ({}x{})...", image_path.display(), frame.width(), frame.height());

    let candidates = detector.detect_all(&frame)?;
    println!("Found {} candidate(s)", candidates.len());
    for (i, face) in candidates.iter().enumerate() {
        println!(
            "  Face {}: {:.0}x{:.0} at ({:.0}, {:.0}) confidence {:.3}",
            i + 1, face.width(), face.height(), face.x1, face.y1, face.confidence
        );
    }

    let selected = select_candidate(&candidates, config.admission.min_face_area);
    let admitted = match &selected {
        Some(face) => match gate.evaluate((frame.width(), frame.height()), face, face.confidence) {
            Ok(()) => {
                println!("Selected face admitted");
                true
            }
            Err(rejection) => {
                println!("Selected face rejected: {}", rejection);
                false
            }
        },
        None => {
            println!("No face to admit");
            false
        }
    };

    let annotated = cli::annotate_detections(&frame, &candidates, selected.as_ref(), admitted);
    let debug_path = dev_mode.get_debug_path("detection_annotated");
    annotated.save(&debug_path)?;
    println!("\nSaved annotated image to: {:?}", debug_path);

    Ok(())
}

/// Relative model paths resolve against the working directory in dev mode
/// and against the system models directory otherwise.
fn models_base(dev_mode: &DevMode) -> Option<PathBuf> {
    if dev_mode.is_enabled() {
        None
    } else {
        Some(system_models_dir())
    }
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
