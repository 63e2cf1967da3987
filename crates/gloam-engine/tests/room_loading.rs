//! Integration tests for room loading: descriptor handling, transactional
//! replacement, macros, behaviors and assets.

use std::sync::Arc;

use gloam_engine::prelude::*;
use image::{Rgba, RgbaImage};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const STONE: Rgba<u8> = Rgba([90, 90, 100, 255]);
const GLASS: Rgba<u8> = Rgba([160, 220, 255, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Build a tile map from grid rows, top row first. `#` is palette index 0,
/// `~` is index 1, anything else is empty.
fn tilemap(rows: &[&str]) -> RgbaImage {
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0).max(2) as u32;
    let mut map = RgbaImage::from_pixel(width, rows.len() as u32 + 1, CLEAR);
    map.put_pixel(0, 0, STONE);
    map.put_pixel(1, 0, GLASS);
    for (row, line) in rows.iter().enumerate() {
        for (x, c) in line.chars().enumerate() {
            let color = match c {
                '#' => STONE,
                '~' => GLASS,
                _ => continue,
            };
            map.put_pixel(x as u32, row as u32 + 1, color);
        }
    }
    map
}

fn hall_map() -> RgbaImage {
    tilemap(&["#....#", "#....#", "######"])
}

fn world(assets: MemoryAssets, registry: Registry) -> GameWorld {
    GameWorld::new(
        EngineConfig::default(),
        Arc::new(assets),
        Arc::new(registry),
        Arc::new(ManualClock::new()),
    )
}

struct Patrol;

impl Behavior for Patrol {
    fn update(&mut self, entity: &mut Entity, _ctx: &BehaviorContext<'_>) {
        entity.set_velocity(glam::DVec2::new(0.3, 0.0));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn hall_populates_tiles_entities_and_lights() {
    let assets = MemoryAssets::new().with_room(
        "hall",
        "game_type side_scroller\n\
         # the hall\n\
         tile 0 untextured blocking\n\
         spawn player hero 2 1\n\
         spawn character guard 4 1\n\
         spawn entity platform 1 2 2\n\
         portal cellar 5 1 1 1\n\
         light 2 2 1.0 0.9 0.7\n",
        hall_map(),
    );
    let mut world = world(assets, Registry::new());
    world.load_room("hall").unwrap();

    let room = world.room().unwrap();
    assert_eq!((room.width(), room.height()), (6, 3));
    assert!(room.is_side_scroller());
    assert!(room.is_blocking(0, 0));
    assert!(room.is_blocking(0, 2));
    assert!(!room.is_blocking(2, 1));

    assert_eq!(world.entities().len(), 3);
    assert!(world.player().is_some());
    let platform = world
        .entities()
        .iter()
        .find(|e| matches!(e.kind(), EntityKind::Platform { .. }))
        .unwrap();
    assert!(platform.is_static());
    assert!((platform.size().x - 0.4).abs() < 1e-12);

    let portal = &world.portals()[0];
    assert_eq!(portal.destination, "cellar");
    assert!((portal.bounds.x - 1.0).abs() < 1e-12);
    assert!((portal.bounds.width - 0.2).abs() < 1e-12);

    assert_eq!(world.lights().len(), 1);
    assert_eq!(world.lights()[0].color, [1.0, 0.9, 0.7]);
    assert!(!world.is_visible());
}

#[test]
fn failed_load_leaves_previous_room_intact() {
    let assets = MemoryAssets::new()
        .with_room(
            "hall",
            "tile 0 untextured blocking\nspawn player hero 2 1\n",
            hall_map(),
        )
        .with_room(
            "broken",
            "tile 0 untextured blocking\nlight 1 1 bright 0 0\n",
            hall_map(),
        );
    let mut world = world(assets, Registry::new());
    world.load_room("hall").unwrap();
    world.set_visible(true);
    let before = world.capture_snapshot();

    let err = world.load_room("broken").unwrap_err();
    assert!(matches!(err, LoadError::Parse { line: 2, .. }), "got {err}");

    assert_eq!(world.room().unwrap().name(), "hall");
    assert!(world.is_visible());
    assert_eq!(world.capture_snapshot(), before);
}

#[test]
fn malformed_directive_values_leave_previous_room_intact() {
    let huge_index = format!("tile {} untextured blocking\n", usize::MAX);
    let cases: &[(&str, &str, usize)] = &[
        ("beyond_palette", "tile 0 untextured blocking\ntile 6 untextured blocking\n", 2),
        ("overflowing_index", huge_index.as_str(), 1),
        ("allocating_index", "tile 100000000000 untextured blocking\n", 1),
        ("negative_index", "tile -1 untextured blocking\n", 1),
        ("negative_spawn", "spawn player hero -2 1\n", 1),
        ("infinite_spawn", "spawn character guard 1 inf\n", 1),
        ("negative_portal", "portal hall 1 -1 1 1\n", 1),
        ("empty_portal", "portal hall 1 1 0 1\n", 1),
        ("nan_portal", "portal hall 1 1 1 NaN\n", 1),
    ];

    let mut assets = MemoryAssets::new().with_room(
        "hall",
        "tile 0 untextured blocking\nspawn player hero 2 1\n",
        hall_map(),
    );
    for &(room, descriptor, _) in cases {
        assets = assets.with_room(room, descriptor, hall_map());
    }
    let mut world = world(assets, Registry::new());
    world.load_room("hall").unwrap();
    world.set_visible(true);
    let before = world.capture_snapshot();

    for &(room, _, line) in cases {
        match world.load_room(room) {
            Err(LoadError::Parse { line: got, .. }) => assert_eq!(got, line, "{room}"),
            other => panic!("{room}: expected a parse error, got {other:?}"),
        }
        assert_eq!(world.room().unwrap().name(), "hall", "{room}");
        assert!(world.is_visible(), "{room}");
        assert_eq!(world.capture_snapshot(), before, "{room}");
    }
}

#[test]
fn unknown_enum_tokens_are_fatal() {
    let assets = MemoryAssets::new()
        .with_room("a", "game_type isometric\n", hall_map())
        .with_room("b", "tile 0 untextured sometimes\n", hall_map());
    let mut world = world(assets, Registry::new());
    assert!(matches!(
        world.load_room("a"),
        Err(LoadError::UnknownGameType { ref token, .. }) if token == "isometric"
    ));
    assert!(matches!(
        world.load_room("b"),
        Err(LoadError::UnknownBlockingState { ref token, .. }) if token == "sometimes"
    ));
    assert!(world.room().is_none());
}

#[test]
fn missing_room_files_surface_as_asset_errors() {
    let mut world = world(MemoryAssets::new(), Registry::new());
    let err = world.load_room("nowhere").unwrap_err();
    assert!(matches!(
        err,
        LoadError::Asset {
            source: AssetError::NotFound { .. },
            ..
        }
    ));
}

#[test]
fn unknown_directives_are_skipped() {
    let assets = MemoryAssets::new().with_room(
        "hall",
        "tile 0 untextured blocking\nweather rain\nspawn dragon smaug 1 1\nspawn entity crate 1 1 1\n",
        hall_map(),
    );
    let mut world = world(assets, Registry::new());
    world.load_room("hall").unwrap();
    assert!(world.entities().is_empty());
}

#[test]
fn failing_macro_does_not_abort_load() {
    let mut registry = Registry::new();
    registry
        .register_macro("explode", |_world: &mut GameWorld| {
            Err(anyhow::anyhow!("fuse was lit"))
        })
        .register_macro("lamp", |world: &mut GameWorld| {
            world.add_light(Light {
                x: 3.0,
                y: 2.0,
                color: [1.0, 1.0, 1.0],
            });
            Ok(())
        });
    let assets = MemoryAssets::new().with_room(
        "hall",
        "tile 0 untextured blocking\nrun_macro explode\nrun_macro missing\nrun_macro lamp\n",
        hall_map(),
    );
    let mut world = world(assets, registry);

    world.load_room("hall").unwrap();
    assert_eq!(world.room().unwrap().name(), "hall");
    assert_eq!(world.lights().len(), 1);
}

#[test]
fn unknown_behaviors_are_skipped_and_known_ones_attach() {
    let mut registry = Registry::new();
    registry.register_behavior("patrol", || -> Box<dyn Behavior> { Box::new(Patrol) });
    let assets = MemoryAssets::new().with_room(
        "hall",
        "tile 0 untextured blocking\n\
         spawn character guard 1 1 patrol\n\
         spawn character slime 3 1 wander\n",
        hall_map(),
    );
    let mut world = world(assets, registry);
    world.load_room("hall").unwrap();

    let names: Vec<_> = world.entities().iter().map(Entity::behavior_name).collect();
    assert_eq!(names, vec![Some("patrol"), None]);
}

#[test]
fn load_reset_load_hashes_identically() {
    let assets = MemoryAssets::new().with_room(
        "hall",
        "game_type side_scroller\n\
         tile 0 untextured blocking\n\
         tile 1 untextured nlblocking\n\
         spawn player hero 2 1\n\
         spawn character guard 4 1\n\
         light 2 2 1 1 1\n",
        tilemap(&["#..~.#", "#....#", "######"]),
    );
    let mut world = world(assets, Registry::new());

    world.load_room("hall").unwrap();
    let first = world.capture_snapshot();
    world.reset();
    assert!(world.room().is_none());
    assert!(world.entities().is_empty());
    world.load_room("hall").unwrap();
    let second = world.capture_snapshot();

    assert_eq!(first.hash, second.hash);
    assert_eq!(first, second);
}

#[test]
fn light_only_tiles_are_passable_and_light_blocking() {
    let assets = MemoryAssets::new().with_room(
        "hall",
        "tile 0 untextured blocking\ntile 1 untextured nlblocking\n",
        tilemap(&["#.~.#", "#####"]),
    );
    let mut world = world(assets, Registry::new());
    world.load_room("hall").unwrap();
    let room = world.room().unwrap();
    assert!(!room.is_blocking(2, 1));
    assert!(room.is_light_blocking(2, 1));
    assert!(room.is_blocking(0, 1) && room.is_light_blocking(0, 1));
}

#[test]
fn textures_and_character_sprites_resolve_through_assets() {
    let assets = MemoryAssets::new()
        .with_room(
            "hall",
            "tile 0 tiles/stone.png blocking\n\
             tile 1 tiles/missing.png nonblocking\n\
             spawn player hero 2 1\n",
            tilemap(&["#.~.#", "#####"]),
        )
        .with_texture("tiles/stone.png", RgbaImage::from_pixel(4, 4, STONE))
        .with_texture(
            "characters/hero/hero_stand_right.png",
            RgbaImage::from_pixel(4, 8, GLASS),
        );
    let mut world = world(assets, Registry::new());
    world.load_room("hall").unwrap();

    let room = world.room().unwrap();
    let stone = room.tile(0, 0).unwrap();
    assert_eq!(stone.texture.as_ref().map(Texture::key), Some("tiles/stone.png"));
    let glass = room.tile(2, 1).unwrap();
    assert!(glass.texture.is_none());
    assert!(!glass.blocking && !glass.light_blocking);

    let sprites = world
        .player()
        .and_then(Entity::character)
        .and_then(Character::sprites)
        .unwrap();
    assert!(!sprites.stand_right.flipped_horizontally());
    assert!(sprites.stand_left.flipped_horizontally());
    assert_eq!(sprites.walk_right, sprites.stand_right);
}
