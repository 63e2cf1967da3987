//! Lighting pipeline tests against the software backend.
//!
//! A small configuration keeps every pass cheap: a 32x32 screen target,
//! a 16x16 ray atlas and a 10x5 tile room.

use std::sync::{Arc, Mutex};

use gloam_engine::prelude::*;
use gloam_engine::render::gfx::FramebufferId;
use gloam_engine::render::software::Surface;
use image::{Rgba, RgbaImage};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const FRAME: f64 = 1.0 / 60.0;
const STONE: Rgba<u8> = Rgba([90, 90, 100, 255]);
const GLASS: Rgba<u8> = Rgba([160, 220, 255, 255]);
const RUG: Rgba<u8> = Rgba([140, 40, 40, 255]);

/// `#` blocks everything, `~` only blocks light, `=` blocks nothing.
const ROWS: [&str; 5] = [
    "##########",
    "#.....~..#",
    "#.....~..#",
    "#=....~..#",
    "##########",
];

const TILES: &str = "tile 0 untextured blocking\n\
                     tile 1 untextured nlblocking\n\
                     tile 2 untextured nonblocking\n";

fn tilemap() -> RgbaImage {
    let mut map = RgbaImage::from_pixel(10, ROWS.len() as u32 + 1, Rgba([0, 0, 0, 0]));
    for (i, color) in [STONE, GLASS, RUG].into_iter().enumerate() {
        map.put_pixel(i as u32, 0, color);
    }
    for (row, line) in ROWS.iter().enumerate() {
        for (x, c) in line.chars().enumerate() {
            let color = match c {
                '#' => STONE,
                '~' => GLASS,
                '=' => RUG,
                _ => continue,
            };
            map.put_pixel(x as u32, row as u32 + 1, color);
        }
    }
    map
}

fn small_lighting() -> LightingConfig {
    LightingConfig {
        screen_pixels_per_tile: 8,
        scale: 2.0,
        ..LightingConfig::default()
    }
}

struct Scene {
    world: GameWorld,
    clock: ManualClock,
    ctx: SoftwareContext,
}

impl Scene {
    /// The lab room with the player at tile (3, 1) and the given extra
    /// descriptor lines.
    fn new(extra: &str) -> Self {
        let descriptor = format!("{TILES}spawn player hero 3 1\n{extra}");
        let assets = MemoryAssets::new().with_room("lab", &descriptor, tilemap());
        let clock = ManualClock::new();
        let config = EngineConfig {
            lighting: small_lighting(),
            ..EngineConfig::default()
        };
        let mut world = GameWorld::new(
            config,
            Arc::new(assets),
            Arc::new(Registry::new()),
            Arc::new(clock.clone()),
        );
        world.load_room("lab").unwrap();
        world.set_visible(true);
        Self {
            world,
            clock,
            ctx: SoftwareContext::new(16, 16),
        }
    }

    fn frame(&mut self) {
        self.clock.advance(FRAME);
        self.world
            .update(Some(&mut self.ctx), &InputState::default())
            .unwrap();
    }

    fn stats(&self) -> &PassStats {
        self.world.lighting().last_stats()
    }

    fn surface(&self, fb: Option<FramebufferId>, index: usize) -> &Surface {
        self.ctx.attachment_surface(fb.unwrap(), index).unwrap()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn frame_issues_passes_in_order() {
    let mut scene = Scene::new("light 3 1.5 1 1 1\n");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    scene
        .world
        .lighting_mut()
        .set_pass_hook(move |kind| sink.lock().unwrap().push(kind));

    scene.frame();

    assert!(scene.world.last_diagnostics().rendered);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            PassKind::WorldMask,
            PassKind::PresentedCopy,
            PassKind::RayTrace,
            PassKind::Shadow,
            PassKind::Composite,
            PassKind::Present,
        ]
    );
    let stats = scene.stats();
    assert_eq!(stats.lit_lights, 1);
    assert_eq!(stats.culled_lights, 0);
    assert_eq!(stats.composite_blend, Some(BlendMode::Multiply));
}

#[test]
fn distant_lights_are_culled() {
    let mut scene = Scene::new("light 3 1.5 1 1 1\nlight 40 40 1 0 0\n");
    scene.frame();

    let stats = scene.stats();
    assert_eq!(stats.lit_lights, 1);
    assert_eq!(stats.culled_lights, 1);
    assert_eq!(stats.count(PassKind::RayTrace), 1);
    assert_eq!(stats.count(PassKind::Shadow), 1);
}

#[test]
fn only_culled_lights_trace_nothing_but_still_multiply() {
    let mut scene = Scene::new("light 40 40 1 1 1\n");
    scene.frame();

    let stats = scene.stats();
    assert_eq!(stats.culled_lights, 1);
    assert_eq!(stats.ray_trace + stats.shadow, 0);
    assert_eq!(stats.composite_blend, Some(BlendMode::Multiply));

    // Nothing lit and no ambient: the composite is black.
    let composite = scene.surface(scene.world.lighting().composite_framebuffer(), 0);
    assert!(composite.pixels().iter().all(|p| p[..3] == [0.0; 3]));
}

#[test]
fn unlit_room_composites_to_the_presented_copy() {
    let mut scene = Scene::new("");
    scene.frame();

    let stats = scene.stats();
    assert_eq!(stats.composite_blend, Some(BlendMode::Alpha));
    assert_eq!(stats.total(), 4);

    let lighting = scene.world.lighting();
    let presented = scene.surface(lighting.screen_framebuffer(), 0);
    let composite = scene.surface(lighting.composite_framebuffer(), 0);
    assert_eq!((composite.width(), composite.height()), (32, 32));
    assert_eq!(composite.pixels(), presented.pixels());

    // The camera centers on the player, drawn as a white box.
    assert_eq!(composite.get(16, 16), [1.0; 4]);
    assert_eq!(scene.ctx.window().get(8, 8), [1.0; 4]);
}

#[test]
fn nearby_light_brightens_but_never_exceeds_the_presented_copy() {
    let mut scene = Scene::new("light 3 1.5 1 1 1\n");
    scene.frame();

    let lighting = scene.world.lighting();
    let presented = scene.surface(lighting.screen_framebuffer(), 0);
    let composite = scene.surface(lighting.composite_framebuffer(), 0);

    let lit = composite.pixels().iter().filter(|p| p[0] > 0.0).count();
    assert!(lit > 0, "no pixel received light");
    for (c, p) in composite.pixels().iter().zip(presented.pixels()) {
        for channel in 0..3 {
            assert!(c[channel] <= p[channel]);
        }
    }
}

#[test]
fn world_mask_marks_light_blockers_only() {
    let mut scene = Scene::new("");
    scene.frame();

    let world_fb = scene.world.lighting().world_framebuffer();
    let color = scene.surface(world_fb, 0);
    let mask = scene.surface(world_fb, 1);
    // 16 px per tile; sample tile centers.
    let center = |x: u32, y: u32| (x * 16 + 8, y * 16 + 8);

    let (gx, gy) = center(6, 2);
    assert_eq!(mask.get(gx, gy)[3], 1.0, "light-only tile casts shadow");
    let (wx, wy) = center(0, 0);
    assert_eq!(mask.get(wx, wy)[3], 1.0);
    let (rx, ry) = center(1, 1);
    assert_eq!(mask.get(rx, ry)[3], 0.0, "passable tile is see-through");
    assert!(color.get(rx, ry)[3] > 0.0, "but still drawn");
    let (ex, ey) = center(4, 3);
    assert_eq!(color.get(ex, ey), [0.0; 4]);
}

#[test]
fn light_only_tiles_do_not_stop_movement() {
    let mut scene = Scene::new("");
    let start = scene.world.player().unwrap().position();
    let right = InputState {
        right: true,
        ..InputState::default()
    };
    for _ in 0..60 {
        scene.clock.advance(FRAME);
        scene.world.update(None, &right).unwrap();
    }
    // One second at walk speed carries the player past the glass column.
    let x = scene.world.player().unwrap().position().x;
    assert!((x - start.x - 0.75).abs() < 1e-6, "stopped at {x}");
}

#[test]
fn screen_targets_follow_resolution_changes() {
    let mut scene = Scene::new("light 3 1.5 1 1 1\n");
    scene.frame();
    assert_eq!(scene.ctx.stats().framebuffers_created, 5);

    scene.frame();
    assert_eq!(scene.ctx.stats().framebuffers_created, 5);
    assert_eq!(scene.ctx.stats().framebuffers_deleted, 0);

    scene.world.lighting_mut().set_screen_pixels_per_tile(16);
    scene.frame();
    assert_eq!(scene.ctx.stats().framebuffers_created, 8);
    assert_eq!(scene.ctx.stats().framebuffers_deleted, 3);
    let composite = scene.surface(scene.world.lighting().composite_framebuffer(), 0);
    assert_eq!((composite.width(), composite.height()), (64, 64));
}

#[test]
fn programs_are_only_switched_when_they_change() {
    let mut scene = Scene::new("light 3 1.5 1 1 1\n");
    scene.frame();
    let stats = scene.ctx.stats().clone();
    assert!(stats.shader_switches < stats.shader_uses);

    scene.ctx.reset_stats();
    // The frame ended on the copy program.
    scene.ctx.use_shader(ShaderKind::Standard);
    scene.ctx.use_shader(ShaderKind::Standard);
    assert_eq!(scene.ctx.stats().shader_uses, 2);
    assert_eq!(scene.ctx.stats().shader_switches, 1);
}
