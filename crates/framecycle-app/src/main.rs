// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use framecycle_core::init_tracing;
use framecycle_platform::WinitSurface;
use framecycle_render::SurfaceProvider;
use framecycle_render_vk::PresentationEngine;
use tracing::info;

mod config;
mod demo;

use config::load_cfg;
use demo::ClearScreen;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Window width in pixels
    #[arg(long, default_value_t = 800, value_parser = clap::value_parser!(u32).range(1..))]
    width: u32,
    /// Window height in pixels
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u32).range(1..))]
    height: u32,
    /// Window title; overrides `[window] title`
    #[arg(long)]
    title: Option<String>,
    /// TOML settings file
    #[arg(long, default_value = "framecycle.toml")]
    config: PathBuf,
    /// Scene file; must exist when given
    #[arg(long)]
    path: Option<PathBuf>,
}

const DEFAULT_TITLE: &str = "framecycle";

fn run(args: Args) -> Result<()> {
    if let Some(scene) = &args.path {
        if !scene.is_file() {
            bail!("scene file {} does not exist", scene.display());
        }
        info!("scene file = {}", scene.display());
    }

    let cfg = load_cfg(&args.config);
    let title = args
        .title
        .or_else(|| cfg.window.title.clone())
        .unwrap_or_else(|| DEFAULT_TITLE.to_owned());

    let mut surface = WinitSurface::open(args.width, args.height, &title).context("open window")?;
    let size = surface.framebuffer_size();
    if size.is_empty() {
        bail!("window has no drawable area ({}x{})", size.width, size.height);
    }
    info!("framebuffer = {}x{}", size.width, size.height);

    let mut engine = PresentationEngine::new(&surface, &cfg.engine_config(&title))
        .context("start presentation engine")?;
    let extent = engine.extent();
    info!(
        "swapchain {}x{} {:?}, present mode = {:?}, {} buffers",
        extent.width,
        extent.height,
        engine.format(),
        engine.present_mode(),
        engine.buffer_count()
    );

    let mut demo = ClearScreen::new(cfg.render.clear_color);
    engine
        .execute(&mut surface, &mut demo)
        .context("presentation loop")?;
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
