mod client;
mod draw;
mod logging;
mod template;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::canvas::{PixelsClient, DEFAULT_BASE_URL};
use crate::draw::diff::DiffPolicy;
use crate::draw::drawer::{Drawer, Target, TemplateSource};
use crate::draw::snapshot::FrameBuffer;
use crate::template::cache::TemplateCache;

#[derive(Parser)]
#[command(author, version, about = "Reconciles a remote pixel canvas against a local image or animation", long_about = None)]
struct Cli {
    /// Base URL of the pixels API
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Bearer token (falls back to the PIXELS_TOKEN environment variable)
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Draw a target onto the canvas and keep it reconciled
    Draw {
        /// Template directory (containing canvas.json) or a single image file
        target: PathBuf,
        /// Canvas x of the target's top-left corner (overrides the manifest)
        #[arg(long)]
        left: Option<u32>,
        /// Canvas y of the target's top-left corner (overrides the manifest)
        #[arg(long)]
        top: Option<u32>,
        /// Keep re-reconciling a static target after the first clean pass
        #[arg(long)]
        guard: bool,
        /// How canvas pixels are compared against the target
        #[arg(long, value_enum, default_value = "ranked")]
        policy: DiffPolicy,
    },
    /// Print the canvas dimensions
    Size,
    /// Read a single canvas pixel
    Pixel { x: u32, y: u32 },
    /// Rewrite a template's frames to absolute canvas coordinates
    Convert { directory: PathBuf },
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Draw {
            target,
            left,
            top,
            guard,
            policy,
        } => run_draw(&cli, target, *left, *top, *guard, *policy),
        Commands::Size => {
            let (width, height) = api_client(&cli)?.size()?;
            println!("{width}x{height}");
            Ok(())
        }
        Commands::Pixel { x, y } => {
            let color = api_client(&cli)?.pixel(*x, *y)?;
            println!("{}", color.hex());
            Ok(())
        }
        Commands::Convert { directory } => template::convert::convert_to_absolute(directory),
    }
}

fn api_client(cli: &Cli) -> Result<PixelsClient> {
    let token = match &cli.token {
        Some(token) => token.clone(),
        None => std::env::var("PIXELS_TOKEN")
            .context("no --token given and PIXELS_TOKEN is not set")?,
    };
    PixelsClient::new(&token, &cli.base_url)
}

fn run_draw(
    cli: &Cli,
    target_path: &Path,
    left: Option<u32>,
    top: Option<u32>,
    guard: bool,
    policy: DiffPolicy,
) -> Result<()> {
    let client = api_client(cli)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install the Ctrl-C handler")?;

    let (target, start_x, start_y) = if target_path.is_dir() {
        let mut cache = TemplateCache::new();
        let (manifest_left, manifest_top) = {
            let template = cache.get(target_path)?;
            (template.left(), template.top())
        };
        let source = TemplateSource::new(cache, target_path.to_path_buf());
        (
            Target::Animated(Box::new(source)),
            left.unwrap_or(manifest_left),
            top.unwrap_or(manifest_top),
        )
    } else {
        (
            Target::Static(FrameBuffer::open(target_path)?),
            left.unwrap_or(0),
            top.unwrap_or(0),
        )
    };

    let mut drawer = Drawer::new(client, target, start_x, start_y, policy, guard, cancel);
    drawer.draw()
}
