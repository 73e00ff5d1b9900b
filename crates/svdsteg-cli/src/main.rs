//! svdsteg: hide one image inside another with SVD compression and LSB steganography.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueHint};
use tracing::info;
use tracing_subscriber::EnvFilter;

use svdsteg_core::{CapacityParameters, FitAxis, ParamUpdate, SvdStegConfig};
use svdsteg_runtime::Session;

mod images;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Hide an image inside another using SVD compression and LSB steganography"
)]
struct Cli {
    /// JSON configuration file (defaults to $SVDSTEG_CONFIG)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report cover capacity, hidden payload and the four auto-fit values
    Capacity(CapacityArgs),

    /// Hide HIDDEN inside COVER and write the result as PNG
    Encode(EncodeArgs),

    /// Recover the hidden image from an encoded PNG
    Decode(DecodeArgs),
}

/// Overrides for the session defaults.
#[derive(Args)]
struct Tuning {
    /// Scale applied to the hidden image before factorization
    #[arg(long)]
    hidden_scale: Option<f64>,

    /// Scale applied to the cover image
    #[arg(long)]
    cover_scale: Option<f64>,

    /// Number of singular values to keep
    #[arg(long)]
    rank: Option<u32>,

    /// Low-order bits used per colour byte (1-8)
    #[arg(long)]
    max_lsb: Option<u32>,
}

#[derive(Args)]
struct CapacityArgs {
    /// Cover size, WIDTHxHEIGHT
    #[arg(long, value_parser = images::parse_size)]
    cover: (u32, u32),

    /// Hidden image size, WIDTHxHEIGHT
    #[arg(long, value_parser = images::parse_size)]
    hidden: (u32, u32),

    #[command(flatten)]
    tuning: Tuning,
}

#[derive(Args)]
struct EncodeArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    cover: PathBuf,

    #[arg(value_hint = ValueHint::FilePath)]
    hidden: PathBuf,

    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,

    #[command(flatten)]
    tuning: Tuning,

    /// Auto-fit these axes, in order, before encoding
    /// (hidden-scale, cover-scale, rank, max-lsb)
    #[arg(long = "auto", value_name = "AXIS")]
    auto: Vec<FitAxis>,
}

#[derive(Args)]
struct DecodeArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    #[arg(value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SvdStegConfig> {
    let config = match path {
        Some(path) => {
            let mut config = SvdStegConfig::load(path);
            if let Ok(filter) = std::env::var("SVDSTEG_LOG") {
                config.log_filter = filter;
            }
            config
        }
        None => SvdStegConfig::from_env(),
    };
    config.validate()?;
    Ok(config)
}

/// Fold command-line overrides into the session, validating each one.
fn apply_tuning(session: &Session, tuning: &Tuning) -> anyhow::Result<()> {
    if let Some(scale) = tuning.hidden_scale {
        session.set_hidden_scale(scale)?;
    }
    if let Some(scale) = tuning.cover_scale {
        session.set_cover_scale(scale)?;
    }
    if let Some(rank) = tuning.rank {
        anyhow::ensure!(rank >= 1, "rank must be at least 1");
        session.params().apply(ParamUpdate::NumSvs(rank as f64));
    }
    if let Some(max_lsb) = tuning.max_lsb {
        session.set_max_lsb(max_lsb)?;
    }
    Ok(())
}

fn load_dimensions(session: &Session, cover: (u32, u32), hidden: (u32, u32)) {
    session.params().apply(ParamUpdate::CoverDimensions {
        width: cover.0,
        height: cover.1,
    });
    session.params().apply(ParamUpdate::HiddenDimensions {
        width: hidden.0,
        height: hidden.1,
    });
}

fn print_capacity(params: &CapacityParameters) {
    println!(
        "cover    {}x{} at {:.2} -> {}x{}, {} bits per byte",
        params.cover_width,
        params.cover_height,
        params.cover_scale,
        params.scaled_cover_width(),
        params.scaled_cover_height(),
        params.max_lsb
    );
    println!(
        "hidden   {}x{} at {:.2} -> {}x{}, rank {}",
        params.hidden_width,
        params.hidden_height,
        params.hidden_scale,
        params.scaled_hidden_width(),
        params.scaled_hidden_height(),
        params.rank
    );
    println!("capacity {} bytes", params.cover_capacity_bytes());
    println!("payload  {} bytes", params.hidden_payload_bytes());
    println!("fits     {}", if params.fits() { "yes" } else { "no" });
    println!(
        "resized  {} of {} bytes, {}",
        params.resized_payload_bytes(),
        params.resized_capacity_bytes(),
        if params.fits_resized() { "fits" } else { "too large" }
    );
}

fn run_capacity(session: &Session, args: CapacityArgs) -> anyhow::Result<()> {
    load_dimensions(session, args.cover, args.hidden);
    apply_tuning(session, &args.tuning)?;
    let params = session.capacity();
    print_capacity(&params);
    println!();
    println!("auto hidden-scale {:.2}", params.auto_hidden_scale());
    println!("auto cover-scale  {:.2}", params.auto_cover_scale());
    println!("auto rank         {}", params.auto_num_svs());
    println!("auto max-lsb      {}", params.auto_max_lsb());
    Ok(())
}

async fn run_encode(session: &Session, args: EncodeArgs) -> anyhow::Result<()> {
    let cover = images::load(&args.cover)?;
    let hidden = images::load(&args.hidden)?;
    load_dimensions(
        session,
        (cover.width, cover.height),
        (hidden.width, hidden.height),
    );
    apply_tuning(session, &args.tuning)?;
    for axis in &args.auto {
        session.auto_fit(*axis);
    }
    print_capacity(&session.capacity());

    let result = session.encode(cover, hidden).await?;
    if let Some(message) = &result.error {
        eprintln!("{}", message);
        std::process::exit(2);
    }
    images::save_png(&args.output, &result.to_image()?)?;
    info!("Encoded image written to {}", args.output.display());
    Ok(())
}

async fn run_decode(session: &Session, args: DecodeArgs) -> anyhow::Result<()> {
    let combined = images::load(&args.input)?;
    let result = session.decode(combined).await?;
    if let Some(message) = &result.error {
        eprintln!("{}", message);
        std::process::exit(2);
    }
    images::save_png(&args.output, &result.to_image()?)?;
    info!(
        "Recovered {}x{} image written to {}",
        result.width,
        result.height,
        args.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let session = Session::new(&config);
    match cli.command {
        Command::Capacity(args) => run_capacity(&session, args),
        Command::Encode(args) => run_encode(&session, args).await,
        Command::Decode(args) => run_decode(&session, args).await,
    }
}
