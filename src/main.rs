use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::Parser;
use ppocr::{Config, OcrBuilder, PaddleOcr};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Run text detection and recognition over images.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// YAML pipeline configuration.
    #[arg(long, default_value = "config/conf.yaml")]
    config: PathBuf,

    /// A single image to read.
    #[arg(long, conflicts_with = "image_dir", required_unless_present = "image_dir")]
    image: Option<PathBuf>,

    /// Read every jpg/png file in this directory.
    #[arg(long)]
    image_dir: Option<PathBuf>,
}

fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|it| it.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png")
                    })
        })
        .collect::<Vec<_>>();
    images.sort();
    Ok(images)
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_file(&args.config)?;
    let ocr = OcrBuilder::new()
        .config(config)
        .observer(|stage, elapsed| log::info!("{stage} stage: {elapsed:?}"))
        .build()?;

    let images = match (args.image, args.image_dir) {
        (Some(image), _) => vec![image],
        (None, Some(dir)) => list_images(&dir)?,
        (None, None) => Vec::new(),
    };
    if images.is_empty() {
        log::warn!("No images to process");
    }

    for path in images {
        let image = PaddleOcr::read_image(&path)?;
        let start = Instant::now();
        let results = ocr.predict(&image)?;
        log::info!("{}: {} lines in {:?}", path.display(), results.len(), start.elapsed());
        for result in results {
            println!("{}", serde_json::to_string(&result)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
