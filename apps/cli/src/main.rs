use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use storyreel_core::{
    ArtifactStore, DirCatalog, Pipeline, PiperTts, RedditClient, RenderConfig, WhisperCliAligner,
};

#[derive(Parser)]
#[command(name = "storyreel")]
#[command(about = "Turn a social media post into a narrated short-form video with captions")]
struct Cli {
    /// Post URL
    url: String,

    /// Output video path
    #[arg(short, long, default_value = "reel.mp4")]
    output: PathBuf,

    /// Directory of downloaded background clips
    #[arg(short, long, default_value = "backgrounds")]
    backgrounds: PathBuf,

    /// Piper voice model path
    #[arg(long, default_value = "en_US-amy-medium.onnx")]
    voice: PathBuf,

    /// Whisper model used for caption alignment
    #[arg(long, default_value = "base")]
    whisper_model: String,

    /// Output width in pixels
    #[arg(long, default_value_t = 1080)]
    width: u32,

    /// Output height in pixels
    #[arg(long, default_value_t = 1920)]
    height: u32,

    /// Minimum video duration in seconds
    #[arg(long, default_value_t = 70.0)]
    min_duration: f64,

    /// Number of comments narrated after the post body
    #[arg(long, default_value_t = 3)]
    comments: usize,
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyreel_core=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    println!(
        "\n{}  {}\n",
        style("storyreel").cyan().bold(),
        style("post → reel").dim()
    );

    let config = RenderConfig {
        screen_width: cli.width,
        screen_height: cli.height,
        min_video_duration: cli.min_duration,
        voice: cli.voice.display().to_string(),
    };

    let pipeline = Pipeline::new(
        Arc::new(RedditClient::new(cli.comments)),
        Arc::new(PiperTts {
            model_path: cli.voice,
        }),
        Arc::new(WhisperCliAligner {
            model: cli.whisper_model,
        }),
        Arc::new(DirCatalog {
            root: cli.backgrounds,
        }),
        ArtifactStore::open_default(),
    );

    let spinner = create_spinner("Rendering reel (fetch → narrate → align → compose)...");
    match pipeline.run(&cli.url, &config, &cli.output).await {
        Ok(rendered) => {
            spinner.finish_with_message(format!(
                "{} Rendered {:.1}s reel",
                style("✓").green().bold(),
                rendered.duration_secs
            ));
            if rendered.used_proportional_fallback {
                println!(
                    "{} caption timing used the proportional fallback for at least one segment",
                    style("!").yellow().bold()
                );
            }
            println!(
                "\n{} {}",
                style("Saved:").dim(),
                style(rendered.output_path.display()).cyan()
            );
            if let Some(thumbnail) = &rendered.thumbnail_path {
                println!(
                    "{} {}\n",
                    style("Thumbnail:").dim(),
                    style(thumbnail.display()).cyan()
                );
            }
            Ok(())
        }
        Err(failure) => {
            spinner.finish_with_message(format!(
                "{} Failed at stage {}",
                style("✗").red().bold(),
                style(failure.stage.name()).yellow()
            ));
            eprintln!("{} {}", style("Error:").red().bold(), failure.error);
            std::process::exit(1);
        }
    }
}
