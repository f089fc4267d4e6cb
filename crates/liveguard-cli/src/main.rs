use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use liveguard_core::{
    classify, default_model_dir, EngineState, FaceSelection, FrameGate, InferencePipeline,
    LoadError, MiniFasLiveness, ModelConfigSet, ModelRegistry, PassOutcome, ScrfdDetector,
    REAL_THRESHOLD,
};
use liveguard_hw::{convert, Frame, PixelFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "liveguard", about = "Liveguard face liveness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and validate a liveness model config file
    CheckConfig {
        /// Path to the JSON config (array of model entries)
        path: PathBuf,
    },
    /// Print the status category for a raw liveness score
    Classify {
        /// Raw score; omit to classify "no face"
        #[arg(allow_negative_numbers = true)]
        score: Option<f32>,
    },
    /// Convert a tightly packed raw frame dump to another pixel layout
    Convert {
        #[arg(short, long)]
        input: PathBuf,
        /// Source layout (bgra or nv12)
        #[arg(short, long)]
        format: PixelFormat,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// Target layout (rgba or nv21)
        #[arg(short, long, default_value = "rgba")]
        target: PixelFormat,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run one frame through detection and liveness scoring
    Test {
        /// Raw frame dump (with --format/--width/--height) or a still image
        #[arg(short, long)]
        input: PathBuf,
        /// Raw source layout (bgra or nv12); omit to decode `input` as an image
        #[arg(short, long)]
        format: Option<PixelFormat>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Model directory [default: $XDG_DATA_HOME/liveguard/models]
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Detector model file name inside the model directory
        #[arg(long, default_value = "detector.onnx")]
        detector: String,
        /// Liveness config [default: <model-dir>/config.json]
        #[arg(long)]
        config: Option<PathBuf>,
        /// Primary face choice (first, confidence or largest)
        #[arg(long, default_value = "first")]
        selection: FaceSelection,
    },
    /// Show daemon status
    Status,
    /// Show the daemon's most recent verdict
    Last,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => {
            let set = ModelConfigSet::from_path(&path)
                .with_context(|| format!("checking {}", path.display()))?;
            println!("{}: {} model(s)", path.display(), set.len());
            for entry in &set {
                println!(
                    "  {:<20} {}x{}  scale={:.2}  shift=({:.2}, {:.2})  org_resize={}",
                    entry.name,
                    entry.width,
                    entry.height,
                    entry.scale,
                    entry.shift_x,
                    entry.shift_y,
                    entry.org_resize
                );
            }
        }
        Commands::Classify { score } => {
            let status = classify(score);
            match score {
                Some(s) => println!("{s} -> {status} (real threshold {REAL_THRESHOLD})"),
                None => println!("no score -> {status}"),
            }
        }
        Commands::Convert {
            input,
            format,
            width,
            height,
            target,
            output,
        } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let frame = Frame::from_packed(format, width, height, data)?;
            let converted = convert(&frame, target)?;
            std::fs::write(&output, converted.as_bytes())
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "{format} {width}x{height} -> {target}: {} bytes written to {}",
                converted.len(),
                output.display()
            );
        }
        Commands::Test {
            input,
            format,
            width,
            height,
            model_dir,
            detector,
            config,
            selection,
        } => {
            let frame = load_frame(&input, format, width, height)?;
            let model_dir = model_dir.unwrap_or_else(default_model_dir);
            let config = config.unwrap_or_else(|| model_dir.join("config.json"));
            run_test(frame, &model_dir, &detector, &config, selection)?;
        }
        Commands::Status => {
            println!("{}", call_daemon("Status").await?);
        }
        Commands::Last => {
            println!("{}", call_daemon("LastVerdict").await?);
        }
    }

    Ok(())
}

/// Build a frame from `input`. A raw dump needs its layout and dimensions;
/// anything else is decoded as an image and handed over as BGRA.
fn load_frame(
    input: &Path,
    format: Option<PixelFormat>,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<Frame> {
    if let Some(format) = format {
        let (Some(width), Some(height)) = (width, height) else {
            bail!("--format {format} needs --width and --height");
        };
        let data = std::fs::read(input)
            .with_context(|| format!("reading {}", input.display()))?;
        return Frame::from_packed(format, width, height, data)
            .with_context(|| format!("{} as {format} {width}x{height}", input.display()));
    }

    let image = image::open(input)
        .with_context(|| format!("decoding {}", input.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let mut data = image.into_raw();
    for px in data.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    tracing::debug!(path = %input.display(), width, height, "decoded still image");
    Ok(Frame::from_packed(PixelFormat::Bgra, width, height, data)?)
}

/// Load both engines and run a single pass, printing the verdict as JSON.
fn run_test(
    frame: Frame,
    model_dir: &Path,
    detector: &str,
    config: &Path,
    selection: FaceSelection,
) -> Result<()> {
    let registry = Arc::new(ModelRegistry::new());
    let mut pipeline = InferencePipeline::new(
        ScrfdDetector::new(model_dir.join(detector)),
        MiniFasLiveness::new(model_dir),
        Arc::clone(&registry),
        Arc::new(FrameGate::new()),
    )
    .with_selection(selection);

    let (det, live) = pipeline.load_models(
        || Ok(()),
        || ModelConfigSet::from_path(config).map_err(LoadError::from),
    );
    tracing::debug!(detector = ?det, liveness = ?live, "models loaded");
    for (engine, state) in [("detector", &det), ("liveness", &live)] {
        if let EngineState::Failed(failure) = state {
            bail!("{engine} failed to load [{:?}]: {}", failure.code, failure.message);
        }
    }

    match pipeline.process(frame) {
        PassOutcome::Verdict(verdict) => {
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        PassOutcome::Failed { sequence, error } => Err(anyhow!("frame {sequence}: {error}")),
        other => Err(anyhow!("frame not processed: {other:?}")),
    }
}

/// Call a no-argument method on the daemon over the session bus.
async fn call_daemon(method: &str) -> Result<String> {
    tracing::debug!(method, "calling daemon");
    let connection = zbus::Connection::session()
        .await
        .context("connecting to session bus")?;
    let reply = connection
        .call_method(
            Some("org.freedesktop.Liveguard1"),
            "/org/freedesktop/Liveguard1",
            Some("org.freedesktop.Liveguard1"),
            method,
            &(),
        )
        .await
        .with_context(|| format!("calling {method} (is liveguardd running?)"))?;
    let json: String = reply.body().deserialize()?;
    tracing::debug!(method, bytes = json.len(), "daemon replied");

    // Pretty-print when the daemon returned JSON.
    Ok(match serde_json::from_str::<serde_json::Value>(&json) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(json),
        Err(_) => json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("liveguard-cli-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_classify_accepts_negative_score() {
        let cli = Cli::try_parse_from(["liveguard", "classify", "-0.3"]).unwrap();
        match cli.command {
            Commands::Classify { score } => assert_eq!(score, Some(-0.3)),
            _ => panic!("expected classify"),
        }
    }

    #[test]
    fn test_test_command_args() {
        let cli = Cli::try_parse_from([
            "liveguard", "test", "-i", "frame.raw", "-f", "nv12", "--width", "640", "--height",
            "480", "--selection", "largest",
        ])
        .unwrap();
        match cli.command {
            Commands::Test {
                input,
                format,
                width,
                height,
                model_dir,
                detector,
                config,
                selection,
            } => {
                assert_eq!(input, PathBuf::from("frame.raw"));
                assert_eq!(format, Some(PixelFormat::Nv12));
                assert_eq!((width, height), (Some(640), Some(480)));
                assert_eq!(model_dir, None);
                assert_eq!(detector, "detector.onnx");
                assert_eq!(config, None);
                assert_eq!(selection, FaceSelection::Largest);
            }
            _ => panic!("expected test"),
        }
    }

    #[test]
    fn test_test_command_image_defaults() {
        let cli = Cli::try_parse_from(["liveguard", "test", "--input", "face.png"]).unwrap();
        match cli.command {
            Commands::Test { format, selection, .. } => {
                assert_eq!(format, None);
                assert_eq!(selection, FaceSelection::First);
            }
            _ => panic!("expected test"),
        }
        assert!(Cli::try_parse_from(["liveguard", "test"]).is_err());
    }

    #[test]
    fn test_load_frame_raw() {
        let path = temp_path("raw.bin");
        std::fs::write(&path, vec![7u8; 2 * 2 * 4]).unwrap();

        let frame = load_frame(&path, Some(PixelFormat::Bgra), Some(2), Some(2)).unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
        assert_eq!(frame.format(), PixelFormat::Bgra);

        assert!(load_frame(&path, Some(PixelFormat::Bgra), Some(3), Some(2)).is_err());
        assert!(load_frame(&path, Some(PixelFormat::Bgra), Some(2), None).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_frame_image_swaps_to_bgra() {
        let path = temp_path("still.png");
        let mut img = image::RgbaImage::new(3, 2);
        img.put_pixel(0, 0, image::Rgba([10, 20, 30, 255]));
        img.save(&path).unwrap();

        let frame = load_frame(&path, None, None, None).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.format(), PixelFormat::Bgra);
        assert_eq!(&frame.planes()[0].row(0, 4)[..4], &[30, 20, 10, 255]);
    }

    #[test]
    fn test_load_frame_missing_image() {
        assert!(load_frame(&temp_path("absent.png"), None, None, None).is_err());
    }
}
