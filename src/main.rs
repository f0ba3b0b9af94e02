use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;

use logo_placer::config::{LogoConfig, PageSelection, Position, SampleRegion};
use logo_placer::logo::{parse_quality, Quality};
use logo_placer::sampler;
use logo_placer::session::{self, SessionError, Upload};

#[derive(Parser)]
#[command(
    name = "logo-placer",
    version,
    about = "Places a logo on a colour-matched panel on the pages of a PDF"
)]
struct Args {
    /// Input PDF
    input: PathBuf,

    /// Logo image (PNG or JPEG)
    #[arg(long)]
    logo: Option<PathBuf>,

    /// Output PDF [default: modified_<input> next to the input]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Logo configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// bottom-right, bottom-left, top-right, top-left, center or custom
    #[arg(long, value_parser = parse_position)]
    position: Option<Position>,

    /// Logo width in points
    #[arg(long)]
    width: Option<f64>,

    /// Logo height in points
    #[arg(long)]
    height: Option<f64>,

    /// Largest logo width when neither width nor height is given
    #[arg(long)]
    max_width: Option<f64>,

    /// Distance from the page edges
    #[arg(long)]
    padding: Option<f64>,

    /// Logo x position (custom position only)
    #[arg(long)]
    x: Option<f64>,

    /// Logo y position (custom position only)
    #[arg(long)]
    y: Option<f64>,

    /// Background panel width
    #[arg(long)]
    bg_width: Option<f64>,

    /// Background panel height
    #[arg(long)]
    bg_height: Option<f64>,

    /// Background panel opacity, 0 to 1
    #[arg(long)]
    opacity: Option<f64>,

    /// Logo rotation in degrees, counter-clockwise
    #[arg(long)]
    rotation: Option<f64>,

    /// Logo encoding: "lossless" or a JPEG quality 1-100
    #[arg(long, value_parser = parse_quality_arg)]
    quality: Option<Quality>,

    /// Colour sample region "x,y,width,height", measured from the top-left corner
    #[arg(long, value_parser = parse_region)]
    sample_region: Option<SampleRegion>,

    /// Pages to process: "all" or 0-indexed pages such as "0,2,5"
    #[arg(long, default_value = "all", value_parser = parse_pages)]
    pages: PageSelection,

    /// Print the sampled background colour of this 0-indexed page and exit
    #[arg(long)]
    sample_page: Option<usize>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_position(s: &str) -> Result<Position, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_quality_arg(s: &str) -> Result<Quality, String> {
    parse_quality(s).map_err(|e| e.to_string())
}

fn parse_region(s: &str) -> Result<SampleRegion, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_pages(s: &str) -> Result<PageSelection, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

/// Config file first, then any flag given on the command line.
fn effective_config(args: &Args) -> Result<LogoConfig> {
    let mut config = match &args.config {
        Some(path) => LogoConfig::load(path)?,
        None => LogoConfig::default(),
    };

    if let Some(position) = args.position {
        config.position = position;
    }
    if args.width.is_some() {
        config.width = args.width;
    }
    if args.height.is_some() {
        config.height = args.height;
    }
    if let Some(max_width) = args.max_width {
        config.max_width = max_width;
    }
    if let Some(padding) = args.padding {
        config.padding = padding;
    }
    if args.x.is_some() {
        config.x = args.x;
    }
    if args.y.is_some() {
        config.y = args.y;
    }
    if args.bg_width.is_some() {
        config.bg_width = args.bg_width;
    }
    if args.bg_height.is_some() {
        config.bg_height = args.bg_height;
    }
    if let Some(opacity) = args.opacity {
        config.opacity = opacity;
    }
    if let Some(rotation) = args.rotation {
        config.rotation = rotation;
    }
    if let Some(quality) = args.quality {
        config.quality = quality;
    }
    if args.sample_region.is_some() {
        config.sample_region = args.sample_region;
    }

    config.validate()?;
    Ok(config)
}

fn default_output(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());
    input.with_file_name(session::output_file_name(&name))
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = std::fs::read(path).map_err(|e| anyhow::anyhow!("could not read {}: {}", path.display(), e))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload { file_name, bytes })
}

fn run(args: &Args) -> Result<(), SessionError> {
    let config = effective_config(args)?;

    if args.dump_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    if let Some(page) = args.sample_page {
        let color = sampler::sample_background_color(&args.input, page, config.sample_region)?;
        println!(
            "page {}: {} (r={:.3} g={:.3} b={:.3})",
            page, color, color.r, color.g, color.b
        );
        return Ok(());
    }

    let pdf = read_upload(&args.input)?;
    let logo = args.logo.as_deref().map(read_upload).transpose()?;
    let output = args.output.clone().unwrap_or_else(|| default_output(&args.input));

    log::info!("Input:  {}", args.input.display());
    if let Some(logo_path) = &args.logo {
        log::info!("Logo:   {}", logo_path.display());
    }
    log::info!("Output: {}", output.display());

    let download = session::submit(Some(&pdf), logo.as_ref(), &args.pages, &config)?;
    std::fs::write(&output, &download.bytes)
        .map_err(|e| anyhow::anyhow!("could not write {}: {}", output.display(), e))?;
    log::info!("Done.");
    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
