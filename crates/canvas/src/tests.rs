use std::future::Future;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::task::noop_waker_ref;
use pollster::block_on;
use renderer::{BlendError, TileImage};

use super::*;

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const BLUE: [f32; 4] = [0.0, 0.0, 1.0, 1.0];
const PAPER_RGBA: [u8; 4] = [0xF4, 0xF3, 0xEF, 0xFF];

fn software_config(tile_size: u32) -> SurfaceConfig {
    SurfaceConfig {
        tile_size,
        backend: BlendBackendKind::Software,
        ..SurfaceConfig::default()
    }
}

fn software_surface(tile_size: u32) -> TileSurface {
    TileSurface::new(software_config(tile_size), None).expect("create surface")
}

fn pixel(image: &image::RgbaImage, x: u32, y: u32) -> [u8; 4] {
    image.get_pixel(x, y).0
}

/// Queues enough large overlapping dabs on tile (0, 0) of a 256 px grid that
/// rasterizing them outlasts a single poll.
fn queue_heavy_tile(surface: &TileSurface) -> usize {
    let dab_count = 2_000;
    for step in 0..dab_count {
        let offset = (step % 20) as f32;
        surface
            .add_dab([110.0 + offset, 120.0], 100.0, RED)
            .expect("add dab");
    }
    dab_count
}

fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
    future.poll(&mut Context::from_waker(noop_waker_ref()))
}

#[test]
fn dab_across_tile_corner_queues_four_tiles() {
    let surface = software_surface(256);
    let entries = surface.add_dab([250.0, 250.0], 10.0, RED).expect("add dab");
    assert_eq!(entries, 4);
    assert!(surface.has_pending_work());
    for (key, origin) in [
        (TileKey::new(0, 0), [0.0, 0.0]),
        (TileKey::new(1, 0), [256.0, 0.0]),
        (TileKey::new(0, 1), [0.0, 256.0]),
        (TileKey::new(1, 1), [256.0, 256.0]),
    ] {
        let pending = surface.pending_dabs(key);
        assert_eq!(pending.len(), 1, "tile {key}");
        assert_eq!(pending[0].tile_origin, origin);
    }
    assert!(surface.pending_dabs(TileKey::new(2, 2)).is_empty());
    // Nothing is allocated before a flush.
    assert_eq!(surface.tile_count(), 0);
}

#[test]
fn empty_flush_is_a_no_op() {
    let surface = software_surface(64);
    let report = block_on(surface.flush()).expect("flush");
    assert_eq!(report, FlushReport::default());
    assert_eq!(surface.tile_count(), 0);
}

#[test]
fn flush_commits_every_touched_tile() {
    let surface = software_surface(256);
    surface.add_dab([250.0, 250.0], 10.0, RED).expect("add dab");
    let report = block_on(surface.flush()).expect("flush");
    assert_eq!(report.tiles_committed, 4);
    assert_eq!(report.entries_flushed, 4);
    assert!(!surface.has_pending_work());
    assert_eq!(
        surface.tile_keys(),
        vec![
            TileKey::new(0, 0),
            TileKey::new(1, 0),
            TileKey::new(0, 1),
            TileKey::new(1, 1),
        ]
    );
}

#[test]
fn flushed_dab_reconstructs_across_tiles() {
    let surface = software_surface(16);
    surface.add_dab([16.0, 16.0], 5.0, RED).expect("add dab");
    block_on(surface.flush()).expect("flush");
    let image = block_on(surface.to_image(32, 32)).expect("export");
    for (x, y) in [(13, 13), (18, 13), (13, 18), (18, 18)] {
        assert_eq!(pixel(&image, x, y), [255, 0, 0, 255], "pixel ({x}, {y})");
    }
    assert_eq!(pixel(&image, 2, 2), PAPER_RGBA);
}

#[test]
fn overlapping_colors_composite_in_submission_order() {
    let surface = software_surface(64);
    surface.add_dab([20.0, 20.0], 8.0, RED).expect("red");
    surface.add_dab([20.0, 20.0], 8.0, BLUE).expect("blue");
    block_on(surface.flush()).expect("flush");
    let image = block_on(surface.to_image(64, 64)).expect("export");
    assert_eq!(pixel(&image, 20, 20), [0, 0, 255, 255]);
}

#[test]
fn later_flush_paints_over_committed_tile() {
    let surface = software_surface(64);
    surface.add_dab([20.0, 20.0], 8.0, BLUE).expect("blue");
    block_on(surface.flush()).expect("first flush");
    surface.add_dab([20.0, 20.0], 4.0, RED).expect("red");
    block_on(surface.flush()).expect("second flush");
    let image = block_on(surface.to_image(64, 64)).expect("export");
    assert_eq!(pixel(&image, 20, 20), [255, 0, 0, 255]);
    assert_eq!(pixel(&image, 20, 14), [0, 0, 255, 255]);
}

#[test]
fn clear_drops_tiles_and_pending_work() {
    let surface = software_surface(64);
    surface.add_dab([10.0, 10.0], 4.0, RED).expect("add dab");
    block_on(surface.flush()).expect("flush");
    surface.add_dab([40.0, 40.0], 4.0, RED).expect("add dab");

    assert_eq!(surface.clear().expect("clear"), 1);
    assert_eq!(surface.tile_count(), 0);
    assert!(!surface.has_pending_work());

    let image = block_on(surface.to_image(64, 64)).expect("export");
    assert!(image.pixels().all(|pixel| pixel.0 == PAPER_RGBA));

    // Clearing an empty surface is fine.
    assert_eq!(surface.clear().expect("clear again"), 0);
}

#[test]
fn invalid_dabs_are_rejected_without_queueing() {
    let surface = software_surface(64);
    assert!(matches!(
        surface.add_dab([1.0, 1.0], 0.0, RED),
        Err(SurfaceError::InvalidDab(_))
    ));
    assert!(matches!(
        surface.add_dab([f32::NAN, 1.0], 2.0, RED),
        Err(SurfaceError::InvalidDab(_))
    ));
    assert!(matches!(
        surface.add_dab([1.0, 1.0], 2.0, [1.2, 0.0, 0.0, 1.0]),
        Err(SurfaceError::InvalidDab(_))
    ));
    assert!(!surface.has_pending_work());
}

#[test]
fn unaddressable_dabs_are_rejected_without_queueing() {
    let surface = software_surface(256);
    assert!(matches!(
        surface.add_dab([0.0, 0.0], 1.0e7, RED),
        Err(SurfaceError::InvalidDab(tiles::DabError::TooManyTiles { .. }))
    ));
    assert!(matches!(
        surface.add_dab([0.0, 0.0], 1.0e30, RED),
        Err(SurfaceError::InvalidDab(tiles::DabError::OutOfAddressableRange { .. }))
    ));
    assert!(matches!(
        surface.add_dab([1.0e12, 10.0], 4.0, RED),
        Err(SurfaceError::InvalidDab(tiles::DabError::OutOfAddressableRange { .. }))
    ));
    assert!(matches!(
        surface.dab_sink().add_dab([-1.0e12, 10.0], 4.0, RED),
        Err(SurfaceError::InvalidDab(_))
    ));
    assert!(!surface.has_pending_work());
    assert_eq!(surface.pending_entries(), 0);

    // A large but bounded dab still routes.
    assert_eq!(surface.add_dab([0.0, 0.0], 1000.0, RED).expect("add dab"), 64);
}

#[test]
fn disposed_surface_rejects_operations() {
    let surface = software_surface(64);
    surface.add_dab([10.0, 10.0], 4.0, RED).expect("add dab");
    block_on(surface.flush()).expect("flush");
    surface.add_dab([30.0, 30.0], 4.0, RED).expect("add dab");
    let sink = surface.dab_sink();

    surface.dispose();
    assert!(surface.is_disposed());
    assert!(!surface.has_pending_work());
    assert_eq!(surface.tile_count(), 0);
    assert!(matches!(
        surface.add_dab([1.0, 1.0], 2.0, RED),
        Err(SurfaceError::Disposed)
    ));
    assert!(matches!(
        sink.add_dab([1.0, 1.0], 2.0, RED),
        Err(SurfaceError::Disposed)
    ));
    assert!(matches!(block_on(surface.flush()), Err(SurfaceError::Disposed)));
    assert!(matches!(
        block_on(surface.to_image(8, 8)),
        Err(SurfaceError::Disposed)
    ));
    assert!(matches!(surface.clear(), Err(SurfaceError::Disposed)));
    let mut target = tiny_skia::Pixmap::new(8, 8).expect("target");
    assert!(matches!(
        surface.draw(DrawTarget::Pixmap(target.as_mut())),
        Err(SurfaceError::Disposed)
    ));

    // Second dispose is a no-op.
    surface.dispose();
}

#[test]
fn dab_sink_feeds_from_another_thread() {
    let surface = software_surface(64);
    let sink = surface.dab_sink();
    let producer = std::thread::spawn(move || {
        for step in 0..10 {
            sink.add_dab([4.0 + step as f32 * 6.0, 8.0], 3.0, RED)
                .expect("add dab from producer");
        }
    });
    producer.join().expect("producer thread");
    assert!(surface.has_pending_work());
    block_on(surface.flush()).expect("flush");
    assert!(!surface.has_pending_work());
    assert_eq!(surface.tile_keys(), vec![TileKey::new(0, 0)]);
}

#[test]
fn abandoned_flush_keeps_dabs_queued() {
    let surface = software_surface(256);
    let dab_count = 2_000;
    for step in 0..dab_count {
        let offset = (step % 200) as f32;
        surface
            .add_dab([20.0 + offset, 40.0], 12.0, RED)
            .expect("add dab");
    }

    // Poll once and drop: if rasterization did not finish in that poll, the
    // batch must be back in the queue.
    match surface.flush().now_or_never() {
        Some(result) => {
            result.expect("flush completed on first poll");
            assert_eq!(surface.tile_count(), 1);
        }
        None => {
            assert!(surface.has_pending_work());
            assert_eq!(surface.pending_entries(), dab_count);
            assert_eq!(surface.tile_count(), 0);
        }
    }

    block_on(surface.flush()).expect("flush");
    assert!(!surface.has_pending_work());
    assert_eq!(surface.tile_keys(), vec![TileKey::new(0, 0)]);
}

#[test]
fn dabs_added_mid_flush_wait_for_the_next_flush() {
    let surface = software_surface(256);
    let dab_count = queue_heavy_tile(&surface);

    let mut flush = pin!(surface.flush());
    assert!(poll_once(flush.as_mut()).is_pending());
    // The running flush owns the batch; the queue starts over.
    assert!(!surface.has_pending_work());
    surface.add_dab([200.0, 200.0], 6.0, BLUE).expect("add dab");

    let report = block_on(flush).expect("flush");
    assert_eq!(report.tiles_committed, 1);
    assert_eq!(report.entries_flushed, dab_count);
    assert!(surface.has_pending_work());
    assert_eq!(surface.pending_entries(), 1);
    let deferred = surface.pending_dabs(TileKey::new(0, 0));
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].dab.color, BLUE);

    let report = block_on(surface.flush()).expect("second flush");
    assert_eq!(report.entries_flushed, 1);
    let image = block_on(surface.to_image(256, 256)).expect("export");
    assert_eq!(pixel(&image, 200, 200), [0, 0, 255, 255]);
    assert_eq!(pixel(&image, 120, 120), [255, 0, 0, 255]);
}

#[test]
fn dispose_during_flush_discards_its_results() {
    let surface = software_surface(256);
    queue_heavy_tile(&surface);

    let mut flush = pin!(surface.flush());
    assert!(poll_once(flush.as_mut()).is_pending());
    surface.dispose();

    let report = block_on(flush).expect("in-flight flush still resolves");
    assert_eq!(report.tiles_committed, 0);
    assert_eq!(report.tiles_discarded, 1);
    assert_eq!(surface.tile_count(), 0);
    assert!(!surface.has_pending_work());
}

#[test]
fn clear_during_flush_discards_results_but_keeps_newer_dabs() {
    let surface = software_surface(256);
    queue_heavy_tile(&surface);

    let mut flush = pin!(surface.flush());
    assert!(poll_once(flush.as_mut()).is_pending());
    assert_eq!(surface.clear().expect("clear"), 0);
    surface.add_dab([300.0, 40.0], 6.0, BLUE).expect("add dab");

    let report = block_on(flush).expect("flush");
    assert_eq!(report.tiles_discarded, 1);
    assert_eq!(report.tiles_committed, 0);
    assert_eq!(surface.tile_count(), 0);
    // Only the dab queued after the clear survives.
    assert_eq!(surface.pending_entries(), 1);
    assert_eq!(surface.pending_dabs(TileKey::new(1, 0)).len(), 1);
    assert!(surface.pending_dabs(TileKey::new(0, 0)).is_empty());
}

#[test]
fn overlay_is_baked_into_export() {
    let surface = software_surface(32);
    surface.add_dab([8.0, 8.0], 4.0, RED).expect("add dab");
    block_on(surface.flush()).expect("flush");
    let image = block_on(surface.to_image_with_overlay(32, 32, |pixmap| {
        let rect = tiny_skia::Rect::from_xywh(16.0, 16.0, 8.0, 8.0).expect("rect");
        let mut paint = tiny_skia::Paint::default();
        paint.set_color_rgba8(0, 255, 0, 255);
        pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), None);
    }))
    .expect("export");
    assert_eq!(pixel(&image, 8, 8), [255, 0, 0, 255]);
    assert_eq!(pixel(&image, 20, 20), [0, 255, 0, 255]);
    assert_eq!(pixel(&image, 28, 4), PAPER_RGBA);
}

#[test]
fn software_draw_blits_tiles_without_background() {
    let surface = software_surface(16);
    surface.add_dab([8.0, 8.0], 3.0, BLUE).expect("add dab");
    block_on(surface.flush()).expect("flush");
    let mut target = tiny_skia::Pixmap::new(32, 32).expect("target");
    let stats = surface
        .draw(DrawTarget::Pixmap(target.as_mut()))
        .expect("draw");
    assert_eq!(stats.tiles_drawn, 1);
    let center = target.pixel(8, 8).expect("pixel").demultiply();
    assert_eq!(
        [center.red(), center.green(), center.blue(), center.alpha()],
        [0, 0, 255, 255]
    );
    assert_eq!(target.pixel(24, 24).expect("pixel").alpha(), 0);
    // Drawing does not consume anything.
    assert_eq!(surface.tile_count(), 1);
}

#[test]
fn gpu_request_without_context_uses_software() {
    let config = SurfaceConfig {
        tile_size: 64,
        backend: BlendBackendKind::Instanced,
        ..SurfaceConfig::default()
    };
    let surface = TileSurface::new(config, None).expect("create surface");
    assert_eq!(surface.backend_kind(), BlendBackendKind::Software);
}

#[test]
fn missing_shaders_fall_back_to_software_on_gpu() {
    let Ok(gpu) = block_on(GpuContext::headless()) else {
        eprintln!("skipping gpu test: no adapter");
        return;
    };
    let config = SurfaceConfig {
        tile_size: 64,
        backend: BlendBackendKind::UniformArray,
        shader_dir: std::path::PathBuf::from("/nonexistent/shaders"),
        ..SurfaceConfig::default()
    };
    let surface = TileSurface::new(config, Some(Arc::new(gpu))).expect("create surface");
    assert_eq!(surface.backend_kind(), BlendBackendKind::Software);
    surface.add_dab([10.0, 10.0], 4.0, RED).expect("add dab");
    block_on(surface.flush()).expect("flush");
    let image = block_on(surface.to_image(32, 32)).expect("export");
    assert_eq!(pixel(&image, 10, 10), [255, 0, 0, 255]);
}

#[test]
fn failed_tiles_stay_queued_after_partial_flush() {
    let Ok(gpu) = block_on(GpuContext::headless()) else {
        eprintln!("skipping gpu test: no adapter");
        return;
    };
    let config = SurfaceConfig {
        tile_size: 64,
        backend: BlendBackendKind::UniformArray,
        ..SurfaceConfig::default()
    };
    let surface = TileSurface::new(config, Some(Arc::new(gpu))).expect("create surface");
    assert_eq!(surface.backend_kind(), BlendBackendKind::UniformArray);

    // A raster tile cannot be blended by a shader backend.
    let broken = TileKey::new(0, 0);
    let raster = tiny_skia::Pixmap::new(64, 64).expect("raster tile");
    surface.seed_tile(broken, TileImage::Raster(raster));
    surface.add_dab([10.0, 10.0], 4.0, RED).expect("add dab");
    surface.add_dab([138.0, 10.0], 4.0, RED).expect("add dab");

    match block_on(surface.flush()) {
        Err(SurfaceError::PartialFlush { committed, failed }) => {
            assert_eq!(committed, 1);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].key, broken);
            assert!(matches!(failed[0].error, BlendError::TileKindMismatch(_)));
        }
        other => panic!("expected a partial flush, got {other:?}"),
    }
    assert!(surface.has_pending_work());
    assert_eq!(surface.pending_entries(), 1);
    assert_eq!(surface.pending_dabs(broken).len(), 1);
    assert_eq!(surface.tile_keys(), vec![broken, TileKey::new(2, 0)]);
}

#[test]
fn gpu_surface_matches_software_surface() {
    let Ok(gpu) = block_on(GpuContext::headless()) else {
        eprintln!("skipping gpu test: no adapter");
        return;
    };
    let gpu = Arc::new(gpu);
    let software = software_surface(64);
    let shaded = TileSurface::new(
        SurfaceConfig {
            tile_size: 64,
            backend: BlendBackendKind::UniformArray,
            ..SurfaceConfig::default()
        },
        Some(gpu),
    )
    .expect("create gpu surface");
    assert_eq!(shaded.backend_kind(), BlendBackendKind::UniformArray);

    for surface in [&software, &shaded] {
        surface.add_dab([64.0, 64.0], 20.0, RED).expect("add dab");
        block_on(surface.flush()).expect("flush");
    }
    let expected = block_on(software.to_image(128, 128)).expect("software export");
    let actual = block_on(shaded.to_image(128, 128)).expect("gpu export");
    for (x, y) in [(64, 64), (50, 64), (64, 78), (5, 5), (120, 120)] {
        let left = pixel(&expected, x, y);
        let right = pixel(&actual, x, y);
        for channel in 0..4 {
            assert!(
                left[channel].abs_diff(right[channel]) <= 1,
                "pixel ({x}, {y}): software {left:?} gpu {right:?}"
            );
        }
    }
}

#[test]
fn config_defaults_and_toml_overrides() {
    let defaults = SurfaceConfig::default();
    assert_eq!(defaults.tile_size, DEFAULT_TILE_SIZE);
    assert_eq!(defaults.backend, BlendBackendKind::UniformArray);
    assert_eq!(defaults.paper_color, PaperColor::DEFAULT);
    assert_eq!(defaults.paper_color.to_string(), "#F4F3EF");

    let config = SurfaceConfig::from_toml_str(
        "tile_size = 128\nbackend = \"instanced\"\nhardness = 0.5\npaper_color = \"#102030\"\n",
    )
    .expect("parse config");
    assert_eq!(config.tile_size, 128);
    assert_eq!(config.backend, BlendBackendKind::Instanced);
    assert_eq!(config.hardness, 0.5);
    assert_eq!(
        config.paper_color,
        PaperColor {
            r: 0x10,
            g: 0x20,
            b: 0x30,
        }
    );
    assert_eq!(config.shader_dir, defaults.shader_dir);
}

#[test]
fn config_rejects_invalid_values() {
    assert!(matches!(
        SurfaceConfig::from_toml_str("tile_size = 100"),
        Err(ConfigError::TileSize(_))
    ));
    assert!(matches!(
        SurfaceConfig::from_toml_str("hardness = 1.5"),
        Err(ConfigError::Hardness(_))
    ));
    assert!(matches!(
        SurfaceConfig::from_toml_str("paper_color = \"#12345\""),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        SurfaceConfig::from_toml_str("unknown_key = 1"),
        Err(ConfigError::Parse(_))
    ));
    assert!(matches!(
        TileSurface::new(software_config(0), None),
        Err(SurfaceError::Config(ConfigError::TileSize(_)))
    ));
}
