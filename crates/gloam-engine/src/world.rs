//! The per-room runtime: loading, the frame loop and entity bookkeeping.
//!
//! A [`GameWorld`] holds at most one room at a time. Loading a room parses
//! its files into a [`RoomBlueprint`] first and only then replaces the
//! current room, so a broken room never leaves the world half-populated.
//! A freshly loaded room is invisible; [`GameWorld::set_visible`] starts its
//! clock.
//!
//! Each visible [`update`](GameWorld::update) runs six phases in a fixed
//! order: lighting, per-entity update, physics against the tile grid,
//! entity-entity collision, post-collision settling with behaviors, and the
//! portal check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::DVec2;
use gloam_spatial::{Bounded, BoundingBox, QuadTree};

use crate::assets::Assets;
use crate::clock::TimeSource;
use crate::config::EngineConfig;
use crate::descriptor::{RoomBlueprint, SpawnSpec};
use crate::entity::{
    AttackHit, BehaviorContext, Character, CharacterSprites, Entity, EntityId, EntityKind,
    InputState,
};
use crate::physics::{integrate, resolve_against, resolve_tiles, sanitize_dt, settle};
use crate::registry::Registry;
use crate::render::gfx::GraphicsContext;
use crate::render::lighting::{FrameInputs, LightingPipeline};
use crate::render::renderer::ScenePass;
use crate::render::scene::{draw_entity, draw_order, draw_room};
use crate::room::{Light, Portal, Room, Tile};
use crate::{FrameError, GfxError, LoadError};

// ---------------------------------------------------------------------------
// FrameDiagnostics
// ---------------------------------------------------------------------------

/// Timing and counts for the most recent frame.
#[derive(Debug, Clone, Default)]
pub struct FrameDiagnostics {
    /// Lighting pipeline, zero for headless frames.
    pub lighting: Duration,
    /// Input handling and attack timers.
    pub entity_update: Duration,
    /// Integration and tile resolution.
    pub physics: Duration,
    /// Quad-tree maintenance and entity-entity resolution.
    pub collisions: Duration,
    /// Settling, behaviors and removal of defeated characters.
    pub post_collision: Duration,
    /// Portal check, including any room transition.
    pub portals: Duration,
    /// Whole frame.
    pub total: Duration,
    /// Overlapping entity pairs the broad phase produced.
    pub collision_pairs: usize,
    /// Entity pairs that needed a push.
    pub resolved_pairs: usize,
    /// Characters removed at zero health.
    pub removed: usize,
    /// Whether the lighting pipeline ran.
    pub rendered: bool,
}

/// An entity's slot in the broad phase.
#[derive(Debug, Clone, Copy)]
struct Slot {
    index: usize,
    bounds: BoundingBox,
}

impl Bounded for Slot {
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }
}

// ---------------------------------------------------------------------------
// GameWorld
// ---------------------------------------------------------------------------

/// A game instance: one room, its entities, and the lighting pipeline.
pub struct GameWorld {
    config: EngineConfig,
    assets: Arc<dyn Assets>,
    registry: Arc<Registry>,
    clock: Arc<dyn TimeSource>,

    room: Option<Room>,
    entities: Vec<Entity>,
    portals: Vec<Portal>,
    lights: Vec<Light>,
    tree: Option<QuadTree<Slot>>,
    tree_dirty: bool,
    player: Option<EntityId>,
    next_id: u64,

    visible: bool,
    frame: u64,
    lighting: LightingPipeline,
    diagnostics: FrameDiagnostics,
}

impl std::fmt::Debug for GameWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameWorld")
            .field("room", &self.room.as_ref().map(Room::name))
            .field("entities", &self.entities.len())
            .field("portals", &self.portals.len())
            .field("lights", &self.lights.len())
            .field("player", &self.player)
            .field("visible", &self.visible)
            .field("frame", &self.frame)
            .finish()
    }
}

impl GameWorld {
    /// Create an empty world. Nothing runs until a room is loaded and made
    /// visible.
    pub fn new(
        config: EngineConfig,
        assets: Arc<dyn Assets>,
        registry: Arc<Registry>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let lighting = LightingPipeline::new(config.lighting.clone());
        Self {
            config,
            assets,
            registry,
            clock,
            room: None,
            entities: Vec::new(),
            portals: Vec::new(),
            lights: Vec::new(),
            tree: None,
            tree_dirty: false,
            player: None,
            next_id: 0,
            visible: false,
            frame: 0,
            lighting,
            diagnostics: FrameDiagnostics::default(),
        }
    }

    // -- configuration & collaborators --------------------------------------

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The asset source rooms are loaded from.
    pub fn assets(&self) -> &Arc<dyn Assets> {
        &self.assets
    }

    /// The behavior and macro registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The lighting pipeline.
    pub fn lighting(&self) -> &LightingPipeline {
        &self.lighting
    }

    /// Mutable access to the lighting pipeline, e.g. to install a pass hook.
    pub fn lighting_mut(&mut self) -> &mut LightingPipeline {
        &mut self.lighting
    }

    // -- room lifecycle -------------------------------------------------------

    /// Load `name`, replacing the current room.
    ///
    /// The room's files are fetched and parsed, and every texture, sprite
    /// and behavior it needs is resolved, before anything is replaced. On
    /// error the current room is left exactly as it was. On success the
    /// world is reset, populated, and left invisible; then the room's macros
    /// run in order. A failing or unknown macro is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the room files are missing or malformed or
    /// a referenced texture cannot be decoded.
    pub fn load_room(&mut self, name: &str) -> Result<(), LoadError> {
        let span = tracing::info_span!("load_room", room = %name);
        let _enter = span.enter();

        let blueprint = RoomBlueprint::fetch(self.assets.as_ref(), name)?;
        let staged = self.stage(&blueprint)?;

        self.reset();
        self.room = Some(staged.room);
        self.portals = staged.portals;
        self.lights = blueprint.descriptor.lights.clone();
        self.tree = Some(staged.tree);
        for entity in staged.entities {
            self.spawn(entity);
        }
        tracing::info!(
            entities = self.entities.len(),
            portals = self.portals.len(),
            lights = self.lights.len(),
            "room loaded"
        );

        let registry = Arc::clone(&self.registry);
        for macro_name in &blueprint.descriptor.macros {
            let run = match registry.room_macro(macro_name) {
                Ok(run) => run,
                Err(e) => {
                    tracing::error!(macro_name = %macro_name, error = %e, "skipping macro");
                    continue;
                }
            };
            match run(self) {
                Ok(()) => tracing::debug!(macro_name = %macro_name, "macro ran"),
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::error!(macro_name = %macro_name, error = %error, "macro failed");
                }
            }
        }
        Ok(())
    }

    /// Build everything a blueprint needs without touching the world.
    fn stage(&self, blueprint: &RoomBlueprint) -> Result<StagedRoom, LoadError> {
        let name = blueprint.name.as_str();
        let ts = self.config.tile_size;
        let asset_error = |source| LoadError::Asset {
            room: name.to_string(),
            source,
        };

        // Tile types, one shared instance per palette index.
        let mut tile_types: HashMap<usize, Arc<Tile>> = HashMap::new();
        for spec in &blueprint.descriptor.tiles {
            let texture = match &spec.texture {
                Some(path) => {
                    let texture = self.assets.texture(path).map_err(asset_error)?;
                    if texture.is_none() {
                        tracing::warn!(tile = spec.index, texture = %path, "tile texture missing; drawing untextured");
                    }
                    texture
                }
                None => None,
            };
            tile_types.insert(
                spec.index,
                Arc::new(Tile {
                    texture,
                    blocking: spec.blocking.is_blocking(),
                    light_blocking: spec.blocking.is_light_blocking(),
                }),
            );
        }

        let grid = &blueprint.grid;
        let side_scroller = blueprint.descriptor.game_type.is_side_scroller();
        let mut room = Room::new(name, grid.width(), grid.height(), ts, side_scroller);
        for x in 0..grid.width() {
            for y in 0..grid.height() {
                let tile = grid
                    .get(x, y)
                    .and_then(|index| tile_types.get(&index).cloned());
                room.set_tile(x, y, tile);
            }
        }

        let mut entities = Vec::with_capacity(blueprint.descriptor.spawns.len());
        for spawn in &blueprint.descriptor.spawns {
            let entity = match spawn {
                SpawnSpec::Player { name, x, y } => {
                    let character = self.character(name).map_err(asset_error)?;
                    Entity::player(character, spawn_position(*x, *y, ts))
                }
                SpawnSpec::Character { name, x, y, behavior } => {
                    let character = self.character(name).map_err(asset_error)?;
                    let entity = Entity::npc(character, spawn_position(*x, *y, ts));
                    self.attach_behavior(entity, behavior.as_deref())
                }
                SpawnSpec::Platform {
                    x,
                    y,
                    length,
                    behavior,
                } => {
                    let entity = Entity::platform(DVec2::new(x * ts, y * ts), *length, ts);
                    self.attach_behavior(entity, behavior.as_deref())
                }
            };
            entities.push(entity);
        }

        let portals = blueprint
            .descriptor
            .portals
            .iter()
            .map(|p| Portal {
                bounds: BoundingBox::new(p.x * ts, p.y * ts, p.width * ts, p.height * ts),
                destination: p.destination.clone(),
            })
            .collect();

        let tree = QuadTree::new(room.extent()).map_err(|source| LoadError::Spatial {
            room: name.to_string(),
            source,
        })?;

        Ok(StagedRoom {
            room,
            entities,
            portals,
            tree,
        })
    }

    fn character(&self, name: &str) -> Result<Character, crate::AssetError> {
        let sprites = CharacterSprites::load(self.assets.as_ref(), name)?;
        Ok(Character::new(name, sprites))
    }

    fn attach_behavior(&self, entity: Entity, behavior: Option<&str>) -> Entity {
        let Some(name) = behavior else {
            return entity;
        };
        match self.registry.create_behavior(name) {
            Ok(behavior) => entity.with_behavior(name, behavior),
            Err(e) => {
                tracing::error!(behavior = name, kind = entity.kind().label(), error = %e, "skipping behavior");
                entity
            }
        }
    }

    /// Drop the room and everything in it. The world becomes invisible and
    /// entity ids start again from zero.
    pub fn reset(&mut self) {
        self.room = None;
        self.entities.clear();
        self.portals.clear();
        self.lights.clear();
        self.tree = None;
        self.tree_dirty = false;
        self.player = None;
        self.next_id = 0;
        self.visible = false;
        self.frame = 0;
        self.diagnostics = FrameDiagnostics::default();
    }

    /// Whether frames run.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Start or stop running frames. Becoming visible restarts every
    /// entity's delta timer, so time spent invisible is never simulated.
    pub fn set_visible(&mut self, visible: bool) {
        if visible && !self.visible {
            let now = self.clock.now();
            for entity in &mut self.entities {
                entity.timer.reset(now);
            }
            tracing::debug!(now, "world visible");
        }
        self.visible = visible;
    }

    /// The loaded room.
    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    /// Mutable access to the loaded room's tiles.
    pub fn room_mut(&mut self) -> Option<&mut Room> {
        self.room.as_mut()
    }

    /// Lights in the current room.
    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Add a light to the current room.
    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    /// Portals in the current room.
    pub fn portals(&self) -> &[Portal] {
        &self.portals
    }

    /// Add a portal to the current room.
    pub fn add_portal(&mut self, portal: Portal) {
        self.portals.push(portal);
    }

    // -- entities -------------------------------------------------------------

    /// Add an entity and return its id. A player entity replaces the current
    /// player. When the world is visible the entity's clock starts now.
    pub fn spawn(&mut self, mut entity: Entity) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        entity.set_id(id);
        if self.visible {
            entity.timer.reset(self.clock.now());
        }
        if entity.is_player() {
            if let Some(old) = self.player.take() {
                self.despawn(old);
            }
            self.player = Some(id);
        }
        tracing::debug!(entity = %id, kind = entity.kind().label(), "spawned");
        self.entities.push(entity);
        self.tree_dirty = true;
        id
    }

    /// Install `entity` as the player, replacing any current player.
    pub fn set_player(&mut self, entity: Entity) -> EntityId {
        if let Some(old) = self.player.take() {
            self.despawn(old);
        }
        let id = self.spawn(entity);
        self.player = Some(id);
        id
    }

    /// Remove an entity. Returns it, or `None` if no such entity exists.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let index = self.entities.iter().position(|e| e.id() == id)?;
        let entity = self.entities.remove(index);
        if self.player == Some(id) {
            self.player = None;
        }
        self.tree_dirty = true;
        tracing::debug!(entity = %id, "despawned");
        Some(entity)
    }

    /// An entity by id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id() == id)
    }

    /// Mutable access to an entity by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.id() == id)
    }

    /// All entities in spawn order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The player entity.
    pub fn player(&self) -> Option<&Entity> {
        self.entity(self.player?)
    }

    /// Mutable access to the player entity.
    pub fn player_mut(&mut self) -> Option<&mut Entity> {
        let id = self.player?;
        self.entity_mut(id)
    }

    /// The player's id.
    pub fn player_id(&self) -> Option<EntityId> {
        self.player
    }

    // -- frame loop -----------------------------------------------------------

    /// Frames run since the room was loaded.
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Timings of the most recent frame.
    pub fn last_diagnostics(&self) -> &FrameDiagnostics {
        &self.diagnostics
    }

    /// Run one frame. Does nothing until a room is loaded and visible.
    ///
    /// With a graphics context (and `headless` off) the frame is lit and
    /// drawn first, showing the state the previous frame produced.
    ///
    /// # Errors
    ///
    /// [`FrameError::Gfx`] when the graphics context rejects a pass, and
    /// [`FrameError::Load`] when a portal's destination cannot be loaded;
    /// the current room is kept in that case.
    pub fn update(
        &mut self,
        gfx: Option<&mut dyn GraphicsContext>,
        input: &InputState,
    ) -> Result<(), FrameError> {
        if !self.visible || self.room.is_none() {
            return Ok(());
        }
        let frame_start = Instant::now();
        let mut diag = FrameDiagnostics::default();
        self.frame += 1;

        // 1. Lighting.
        let start = Instant::now();
        if let Some(gfx) = gfx {
            if !self.config.headless {
                self.render(gfx)?;
                diag.rendered = true;
            }
        }
        diag.lighting = start.elapsed();

        let Some(room) = self.room.as_ref() else {
            return Ok(());
        };
        let side_scroller = room.is_side_scroller();
        let physics = &self.config.physics;
        let now = self.clock.now();
        for entity in &mut self.entities {
            entity.frame_dt = sanitize_dt(entity.timer.tick(now));
        }

        // 2. Entity updates.
        let start = Instant::now();
        let mut hits = Vec::new();
        for entity in &mut self.entities {
            if let Some(hit) = entity.update_self(input, &self.config.player, side_scroller) {
                hits.push(hit);
            }
        }
        apply_hits(&mut self.entities, &hits);
        diag.entity_update = start.elapsed();

        // 3. Physics against the tile grid.
        let start = Instant::now();
        for entity in &mut self.entities {
            let dt = entity.frame_dt;
            integrate(entity, dt, side_scroller, physics);
            resolve_tiles(entity, room, physics);
        }
        diag.physics = start.elapsed();

        // 4. Entity-entity collisions.
        let start = Instant::now();
        if let Some(tree) = self.tree.as_mut() {
            sync_tree(tree, &self.entities, self.tree_dirty);
            self.tree_dirty = false;
            let mut pairs = Vec::new();
            tree.iterate_pairs(|a, b| {
                if a.bounds.overlaps(&b.bounds) {
                    pairs.push((a.index, b.index));
                }
            });
            diag.collision_pairs = pairs.len();
            for (a, b) in pairs {
                let first = resolve_pair(&mut self.entities, a, b);
                let second = resolve_pair(&mut self.entities, b, a);
                if first || second {
                    diag.resolved_pairs += 1;
                }
            }
        }
        diag.collisions = start.elapsed();

        // 5. Settle, behaviors, cleanup.
        let start = Instant::now();
        let frame = self.frame;
        for entity in &mut self.entities {
            let dt = entity.frame_dt;
            settle(entity, dt, side_scroller, physics);
            let ctx = BehaviorContext { dt, room, frame };
            entity.run_behavior(&ctx);
            *entity.delta_mut() = DVec2::ZERO;
        }
        let before = self.entities.len();
        self.entities.retain(|e| match e.kind() {
            EntityKind::Character(c) => {
                let defeated = c.is_defeated();
                if defeated {
                    tracing::info!(entity = %e.id(), character = c.name(), "character defeated");
                }
                !defeated
            }
            _ => true,
        });
        diag.removed = before - self.entities.len();
        if diag.removed > 0 {
            self.tree_dirty = true;
        }
        diag.post_collision = start.elapsed();

        // 6. Portals.
        let start = Instant::now();
        let destination = self.player().and_then(|player| {
            let bounds = player.bounding_box();
            self.portals
                .iter()
                .find(|portal| portal.bounds.overlaps(&bounds))
                .map(|portal| portal.destination.clone())
        });
        let transition = match destination {
            Some(destination) => self.enter_portal(&destination),
            None => Ok(()),
        };
        diag.portals = start.elapsed();

        diag.total = frame_start.elapsed();
        tracing::trace!(
            frame = self.frame,
            entities = self.entities.len(),
            pairs = diag.collision_pairs,
            total_us = diag.total.as_micros() as u64,
            "frame complete"
        );
        self.diagnostics = diag;
        transition.map_err(FrameError::from)
    }

    /// Draw the current state through the lighting pipeline.
    fn render(&mut self, gfx: &mut dyn GraphicsContext) -> Result<(), GfxError> {
        let focus = match (self.player(), self.room.as_ref()) {
            (Some(player), _) => player.bounding_box().center(),
            (None, Some(room)) => room.extent().center(),
            (None, None) => return Ok(()),
        };
        let Some(room) = self.room.as_ref() else {
            return Ok(());
        };
        let tile_size = room.tile_size();
        let entities = &self.entities;
        let order = draw_order(entities);
        let frame = FrameInputs {
            room_tiles: (room.width(), room.height()),
            tile_size,
            focus,
            lights: &self.lights,
        };
        let mut draw = |pass: &mut ScenePass<'_>| {
            draw_room(pass, room);
            for &index in &order {
                draw_entity(pass, &entities[index], tile_size);
            }
        };
        self.lighting.perform(gfx, &frame, &mut draw)
    }

    /// Move the player through a portal, carrying their attack along.
    fn enter_portal(&mut self, destination: &str) -> Result<(), LoadError> {
        let from = self.room.as_ref().map(|r| r.name().to_string()).unwrap_or_default();
        let attack = self
            .player_mut()
            .and_then(Entity::character_mut)
            .and_then(|c| c.set_attack(None));

        match self.load_room(destination) {
            Ok(()) => {
                if attack.is_some() {
                    if let Some(character) = self.player_mut().and_then(Entity::character_mut) {
                        character.set_attack(attack);
                    }
                }
                self.set_visible(true);
                tracing::info!(from = %from, to = %destination, "portal transition");
                Ok(())
            }
            Err(e) => {
                if let Some(character) = self.player_mut().and_then(Entity::character_mut) {
                    character.set_attack(attack);
                }
                tracing::error!(from = %from, to = %destination, error = %e, "portal destination failed to load");
                Err(e)
            }
        }
    }
}

/// A room built from a blueprint, not yet committed.
struct StagedRoom {
    room: Room,
    entities: Vec<Entity>,
    portals: Vec<Portal>,
    tree: QuadTree<Slot>,
}

/// World position of a character spawned at tile `(x, y)`: centered on the
/// tile horizontally, standing on its bottom edge.
fn spawn_position(x: f64, y: f64, tile_size: f64) -> DVec2 {
    let width = crate::entity::CHARACTER_SIZE.x;
    DVec2::new(x * tile_size + (tile_size - width) / 2.0, y * tile_size)
}

/// Bring the broad phase in line with the entity list.
fn sync_tree(tree: &mut QuadTree<Slot>, entities: &[Entity], dirty: bool) {
    if dirty || tree.len() != entities.len() {
        tree.clear();
        for (index, entity) in entities.iter().enumerate() {
            let slot = Slot {
                index,
                bounds: entity.bounding_box(),
            };
            if let Err(e) = tree.place(slot) {
                tracing::warn!(entity = %entity.id(), error = %e, "entity left out of collision");
            }
        }
        return;
    }
    for slot in tree.objects_mut() {
        slot.bounds = entities[slot.index].bounding_box();
    }
    tree.reevaluate();
}

/// Push `mover` out of `obstacle`. Skipped when neither is blocking or the
/// mover is static.
fn resolve_pair(entities: &mut [Entity], mover: usize, obstacle: usize) -> bool {
    let (m, o) = (&entities[mover], &entities[obstacle]);
    if !(m.is_blocking() || o.is_blocking()) || m.is_static() {
        return false;
    }
    let obstacle_box = o.bounding_box();
    resolve_against(&mut entities[mover], &obstacle_box).is_some()
}

/// Damage every other character with health that a hitbox overlaps.
fn apply_hits(entities: &mut [Entity], hits: &[AttackHit]) {
    for hit in hits {
        for entity in entities.iter_mut() {
            if entity.id() == hit.attacker || !entity.bounding_box().overlaps(&hit.hitbox) {
                continue;
            }
            let id = entity.id();
            if let Some(character) = entity.character_mut() {
                if character.health().is_some() {
                    character.apply_damage(hit.damage);
                    tracing::debug!(
                        attacker = %hit.attacker,
                        target = %id,
                        damage = hit.damage,
                        "attack hit"
                    );
                }
            }
        }
    }
}
