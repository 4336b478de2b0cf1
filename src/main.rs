use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelcard::card::{render_card, CardRequest, ProfileSpec};
use reelcard::encoding::Toolchain;
use reelcard::error_codes::{classify, CodedError, INPUT_ERROR};
use reelcard::layout::compute_layout;
use reelcard::pipeline::{ReelRenderer, RenderJob};
use reelcard::external::{LocalMedia, MediaFetcher};
use reelcard::probe::probe_source;
use reelcard::schema::{FfmpegMode, HeaderVariant, RenderConfig};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("REELCARD_GIT_HASH"), ")");

#[derive(Debug, Parser)]
#[command(name = "reelcard", version = VERSION)]
#[command(about = "Render a post card above a letterboxed clip as a 1080x1920 video")]
struct Cli {
    /// YAML file overriding canvas, card and encode defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    font_dir: Option<PathBuf>,
    /// Print results and errors as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct PostArgs {
    #[arg(long, conflicts_with = "text_file")]
    text: Option<String>,
    #[arg(long)]
    text_file: Option<PathBuf>,
    /// Display name; the profile header is drawn only when this is non-empty.
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    handle: Option<String>,
    #[arg(long)]
    avatar: Option<PathBuf>,
    /// Profile header size: compact or large.
    #[arg(long)]
    header: Option<String>,
    #[arg(long)]
    max_lines: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Produce the final video from a post and a local clip.
    Render {
        #[command(flatten)]
        post: PostArgs,
        #[arg(long)]
        video: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Clip duration in seconds, used when ffprobe reports none.
        #[arg(long)]
        duration_hint: Option<f64>,
        /// ffmpeg resolution: auto, system or sidecar.
        #[arg(long)]
        ffmpeg_mode: Option<String>,
        #[arg(long)]
        job_id: Option<String>,
        /// Link to the post the clip came from; twitter.com, x.com or a mirror.
        #[arg(long)]
        post_url: Option<String>,
    },
    /// Rasterize only the card and print its height.
    Card {
        #[command(flatten)]
        post: PostArgs,
        /// JSON card request; flags below override its fields.
        #[arg(long)]
        request: Option<PathBuf>,
        #[arg(long)]
        font_size: Option<u32>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Print the canvas geometry for a card height and source size.
    Layout {
        #[arg(long)]
        card_height: u32,
        #[arg(long)]
        source_width: u32,
        #[arg(long)]
        source_height: u32,
    },
    /// Print what ffprobe reports about a clip.
    Probe {
        video: PathBuf,
        #[arg(long)]
        duration_hint: Option<f64>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let json_output = cli.json;

    if let Err(error) = run(cli) {
        let coded = classify(&error);
        if json_output {
            match serde_json::to_string_pretty(&coded.envelope()) {
                Ok(text) => println!("{text}"),
                Err(_) => eprintln!("error: {error:#}"),
            }
        } else {
            eprintln!("error: {error:#}");
        }
        std::process::exit(coded.exit_code());
    }
}

/// Logs go to stderr so stdout carries only command results.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reelcard=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false),
            )
            .with(env_filter)
            .init();
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref(), cli.font_dir)?;
    match cli.command {
        Commands::Render {
            post,
            video,
            output,
            duration_hint,
            ffmpeg_mode,
            job_id,
            post_url,
        } => {
            if let Some(mode) = ffmpeg_mode {
                config.encode.ffmpeg_mode = FfmpegMode::from_keyword(&mode)?;
            }
            apply_post_style(&mut config, &post)?;
            let source = LocalMedia {
                video_path: video,
                text: read_post_text(&post)?.ok_or_else(|| {
                    anyhow!(CodedError::usage(INPUT_ERROR, "render needs --text or --text-file"))
                })?,
                author_name: post.name.clone(),
                duration_hint,
            };
            run_render(config, &post, &source, post_url.as_deref(), output, job_id, cli.json)
        }
        Commands::Card {
            post,
            request,
            font_size,
            width,
            output,
        } => {
            apply_post_style(&mut config, &post)?;
            run_card(&config, &post, request.as_deref(), font_size, width, output, cli.json)
        }
        Commands::Layout {
            card_height,
            source_width,
            source_height,
        } => {
            let geometry = compute_layout(card_height, source_width, source_height, &config.canvas);
            if cli.json {
                print_json(&json!({ "ok": true, "geometry": geometry }))?;
            } else {
                println!("{}", geometry.summary());
            }
            Ok(())
        }
        Commands::Probe {
            video,
            duration_hint,
        } => {
            let toolchain = Toolchain::resolve(&config.encode)?;
            let source = probe_source(
                &toolchain,
                &video,
                duration_hint,
                std::time::Duration::from_secs(config.encode.probe_timeout_secs),
            )
            .with_context(|| format!("failed to probe {}", video.display()))?;
            if cli.json {
                print_json(&json!({ "ok": true, "source": source }))?;
            } else {
                println!(
                    "{}x{} {:.3}s audio={}",
                    source.width, source.height, source.duration_seconds, source.has_audio
                );
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>, font_dir: Option<PathBuf>) -> Result<RenderConfig> {
    let mut config = match path {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RenderConfig::default(),
    };
    if font_dir.is_some() {
        config.font_dir = font_dir;
    }
    Ok(config)
}

fn apply_post_style(config: &mut RenderConfig, post: &PostArgs) -> Result<()> {
    if let Some(header) = &post.header {
        let variant = HeaderVariant::from_keyword(header)?;
        config.card = config.card.clone().with_header_variant(variant);
    }
    if post.max_lines.is_some() {
        config.card.max_lines = post.max_lines;
    }
    config.validate()?;
    Ok(())
}

fn read_post_text(post: &PostArgs) -> Result<Option<String>> {
    match (&post.text, &post.text_file) {
        (Some(text), _) => Ok(Some(text.clone())),
        (None, Some(path)) => fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("failed to read text file {}", path.display())),
        (None, None) => Ok(None),
    }
}

fn profile_spec(post: &PostArgs) -> Option<ProfileSpec> {
    let name = post.name.as_deref()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(ProfileSpec {
        display_name: name.to_owned(),
        handle: post.handle.clone(),
        avatar_path: post.avatar.clone(),
    })
}

fn run_render(
    config: RenderConfig,
    post: &PostArgs,
    source: &LocalMedia,
    post_url: Option<&str>,
    output: PathBuf,
    job_id: Option<String>,
    json_output: bool,
) -> Result<()> {
    let workdir = Path::new(".");
    let mut job = match post_url {
        Some(url) => RenderJob::fetch(source, url, workdir, output, None)?,
        None => RenderJob::from_fetched(source.fetch("", workdir)?, output, None)?,
    };
    if let Some(id) = job_id {
        job.id = id;
    }
    if let Some(profile) = profile_spec(post) {
        job = job.with_profile(profile);
    }

    let renderer = ReelRenderer::new(config)?;
    let report = renderer
        .render(&job)
        .with_context(|| format!("render job {} failed", job.id))?;

    if json_output {
        print_json(&json!({ "ok": true, "report": report }))?;
    } else {
        println!("Wrote {}", report.output.display());
        println!("{}", report.geometry.summary());
        for fallback in &report.fallbacks {
            println!("fallback: {fallback}");
        }
    }
    Ok(())
}

fn run_card(
    config: &RenderConfig,
    post: &PostArgs,
    request_path: Option<&Path>,
    font_size: Option<u32>,
    width: Option<u32>,
    output: Option<PathBuf>,
    json_output: bool,
) -> Result<()> {
    let mut request = match request_path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read card request {}", path.display()))?;
            serde_json::from_str::<CardRequest>(&raw)
                .map_err(|error| {
                    CodedError::usage(INPUT_ERROR, format!("invalid card request: {error}"))
                })
                .with_context(|| format!("failed to parse card request {}", path.display()))?
        }
        None => {
            let profile = profile_spec(post);
            CardRequest {
                text: String::new(),
                font_size: config.card.body_font_size(profile.is_some()),
                max_width: config.canvas.card_width(),
                output_path: None,
                bg_hex: "000000".to_owned(),
                profile,
            }
        }
    };
    if let Some(text) = read_post_text(post)? {
        request.text = text;
    }
    if let Some(size) = font_size {
        request.font_size = size;
    }
    if let Some(width) = width {
        request.max_width = width;
    }
    if output.is_some() {
        request.output_path = output;
    }
    let output_path = request.output_path.clone().ok_or_else(|| {
        anyhow!(CodedError::usage(INPUT_ERROR, "card needs --output or an output_path"))
    })?;

    let fonts = reelcard::font_assets::load_font_set(config.font_dir.as_deref());
    let card = render_card(&request, &fonts, &config.card)?;
    info!(output = %output_path.display(), height = card.height(), "card written");

    if json_output {
        print_json(&json!({
            "ok": true,
            "output": output_path,
            "height": card.height(),
            "lines": card.lines,
            "fallbacks": card.fallbacks,
        }))?;
    } else {
        println!("{}", card.height());
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}
