//! Headless walkthrough: load a generated hub, walk the player into a portal,
//! and report per-frame diagnostics and the final state hash.
//!
//! Run with:
//!   cargo run --example headless_hub -p gloam-engine [-- out.png]
//!
//! With a path argument the last lit frame is written there as a PNG.
//! Set `RUST_LOG=gloam_engine=debug` to watch room loads and transitions.

use std::sync::Arc;

use glam::DVec2;
use gloam_engine::prelude::*;
use image::{Rgba, RgbaImage};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Generated rooms
// ---------------------------------------------------------------------------

const STONE: Rgba<u8> = Rgba([80, 80, 92, 255]);
const GLASS: Rgba<u8> = Rgba([150, 210, 240, 255]);

const HUB: &str = "\
# generated hub
game_type top_down
tile 0 untextured blocking
tile 1 untextured nlblocking
spawn player hero 5 5
spawn character slime 10 6 wander
portal cellar 14 1 1 1
light 5 8 1.0 0.9 0.7
run_macro lanterns
";

const CELLAR: &str = "\
game_type side_scroller
tile 0 untextured blocking
spawn player hero 2 1
spawn entity platform 4 3 3
light 6 5 0.6 0.6 1.0
";

/// A walled room with an optional light-only column at `glass_x`.
fn walled(w: u32, h: u32, glass_x: Option<u32>) -> RgbaImage {
    let mut map = RgbaImage::from_pixel(w, h + 1, Rgba([0, 0, 0, 0]));
    map.put_pixel(0, 0, STONE);
    map.put_pixel(1, 0, GLASS);
    for row in 1..=h {
        for x in 0..w {
            let edge = row == 1 || row == h || x == 0 || x == w - 1;
            if edge {
                map.put_pixel(x, row, STONE);
            } else if glass_x == Some(x) && row > h / 2 {
                map.put_pixel(x, row, GLASS);
            }
        }
    }
    map
}

// ---------------------------------------------------------------------------
// Behaviors & macros
// ---------------------------------------------------------------------------

/// Picks a new random heading every half second.
struct Wander {
    rng: Pcg32,
}

impl Behavior for Wander {
    fn update(&mut self, entity: &mut Entity, ctx: &BehaviorContext<'_>) {
        if ctx.frame % 30 == 1 {
            let heading = DVec2::new(self.rng.gen_range(-1.0..1.0), self.rng.gen_range(-1.0..1.0));
            entity.set_velocity(heading.normalize_or_zero() * 0.3);
        }
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register_behavior("wander", || -> Box<dyn Behavior> {
            Box::new(Wander {
                rng: Pcg32::seed_from_u64(7),
            })
        })
        .register_macro("lanterns", |world: &mut GameWorld| {
            let width = world
                .room()
                .map(|room| room.width())
                .ok_or_else(|| anyhow::anyhow!("lanterns need a room"))?;
            for x in (3..width).step_by(5) {
                world.add_light(Light {
                    x: x as f64 + 0.5,
                    y: 2.5,
                    color: [0.5, 0.4, 0.3],
                });
            }
            Ok(())
        });
    registry
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn input_for(frame: usize) -> InputState {
    match frame {
        0..=59 => InputState::default(),
        60..=149 => InputState {
            right: true,
            down: true,
            attack: frame % 40 == 0,
            ..InputState::default()
        },
        _ => InputState {
            right: true,
            ..InputState::default()
        },
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let assets = MemoryAssets::new()
        .with_room("main_hub", HUB, walled(16, 10, Some(8)))
        .with_room("cellar", CELLAR, walled(12, 8, None));
    let clock = ManualClock::new();
    let mut world = GameWorld::new(
        EngineConfig::default(),
        Arc::new(assets),
        Arc::new(registry()),
        Arc::new(clock.clone()),
    );
    let mut ctx = SoftwareContext::new(160, 120);

    world.load_room("main_hub")?;
    world.set_visible(true);
    println!(
        "loaded main_hub: {} entities, {} lights, hash {}",
        world.entities().len(),
        world.lights().len(),
        world.state_hash()
    );

    let mut room = String::from("main_hub");
    for frame in 0..300 {
        clock.advance(1.0 / 60.0);
        world.update(Some(&mut ctx), &input_for(frame))?;

        let current = world.room().map(|r| r.name().to_string()).unwrap_or_default();
        if current != room {
            println!("frame {frame}: {room} -> {current}");
            room = current;
        }
        if frame % 60 == 0 {
            let diag = world.last_diagnostics();
            let stats = world.lighting().last_stats();
            println!(
                "frame {frame}: lighting {:?} physics {:?} total {:?} | pairs {} | lit {} culled {}",
                diag.lighting,
                diag.physics,
                diag.total,
                diag.collision_pairs,
                stats.lit_lights,
                stats.culled_lights,
            );
        }
    }

    let snapshot = world.capture_snapshot();
    println!(
        "final room {}, {} entities, hash {}",
        room,
        snapshot.entities.len(),
        snapshot.hash
    );

    if let Some(path) = std::env::args().nth(1) {
        ctx.window().to_image().save(&path)?;
        println!("wrote {path}");
    }
    Ok(())
}
