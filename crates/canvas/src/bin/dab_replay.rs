use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canvas::{BlendBackendKind, GpuContext, SurfaceConfig, TileSurface};
use clap::Parser;
use replay_protocol::{ReplayRecord, read_jsonl_records, validate_records};

#[derive(Parser)]
#[command(author, version, about = "Replay a dab recording and export the surface")]
struct Arguments {
    /// JSON-lines recording to replay.
    input: PathBuf,
    /// PNG written once the replay finishes.
    #[arg(long, short = 'o', value_parser, default_value = "replay.png")]
    output: PathBuf,
    /// Surface config (TOML). The recording's tile size always wins.
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    /// Blend on a headless GPU instead of the software backend.
    #[arg(long)]
    gpu: bool,
}

fn main() -> Result<()> {
    canvas::init_logging();
    let arguments = Arguments::parse();

    let file = File::open(&arguments.input)
        .with_context(|| format!("open recording {}", arguments.input.display()))?;
    let records = read_jsonl_records(&mut BufReader::new(file))
        .with_context(|| format!("read recording {}", arguments.input.display()))?;
    let header = *validate_records(&records).context("validate recording")?;

    let mut config = match &arguments.config {
        Some(path) => SurfaceConfig::load(path)
            .with_context(|| format!("load surface config {}", path.display()))?,
        None => SurfaceConfig::default(),
    };
    config.tile_size = header.tile_size;
    let gpu = if arguments.gpu {
        let context = pollster::block_on(GpuContext::headless()).context("acquire headless gpu")?;
        Some(Arc::new(context))
    } else {
        config.backend = BlendBackendKind::Software;
        None
    };

    let surface = TileSurface::new(config, gpu).context("create tile surface")?;
    tracing::info!(
        records = records.len(),
        backend = ?surface.backend_kind(),
        tile_size = header.tile_size,
        "replaying recording"
    );

    let image = pollster::block_on(async {
        let mut dab_count = 0usize;
        for (index, record) in records.iter().enumerate().skip(1) {
            match record {
                ReplayRecord::Dab(dab) => {
                    surface
                        .add_dab(dab.center, dab.radius, dab.color)
                        .with_context(|| format!("add dab from record {index}"))?;
                    dab_count += 1;
                }
                ReplayRecord::Flush => {
                    surface
                        .flush()
                        .await
                        .with_context(|| format!("flush at record {index}"))?;
                }
                ReplayRecord::Clear => {
                    surface
                        .clear()
                        .with_context(|| format!("clear at record {index}"))?;
                }
                ReplayRecord::Header(_) => {}
            }
        }
        surface.flush().await.context("final flush")?;
        tracing::info!(dabs = dab_count, tiles = surface.tile_count(), "replay finished");
        surface
            .to_image(header.canvas_width, header.canvas_height)
            .await
            .context("export surface")
    })?;

    image
        .save(&arguments.output)
        .with_context(|| format!("write {}", arguments.output.display()))?;
    surface.dispose();
    println!(
        "[dab_replay] wrote {}x{} image to {}",
        image.width(),
        image.height(),
        arguments.output.display()
    );
    Ok(())
}
