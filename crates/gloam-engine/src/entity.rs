//! The entity model: players, characters and platforms.
//!
//! An [`Entity`] is a box in world space with a velocity, a per-frame
//! displacement accumulator and the movement restrictions the collision
//! resolver reported this frame. What it *is* lives in its [`EntityKind`];
//! optional scripted logic is attached as a [`Behavior`].

use std::fmt;

use glam::DVec2;
use gloam_spatial::{BoundingBox, Direction, MovementRestrictions, Resolvable};
use serde::{Deserialize, Serialize};

use crate::assets::{Assets, Texture};
use crate::clock::DeltaTimer;
use crate::config::PlayerConfig;
use crate::room::Room;
use crate::AssetError;

/// Collision box of a character: its feet, not the drawn sprite.
pub const CHARACTER_SIZE: DVec2 = DVec2::new(0.12, 0.1);

// ---------------------------------------------------------------------------
// Identifiers and input
// ---------------------------------------------------------------------------

/// Stable identifier of an entity within a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// The input buttons held during a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputState {
    /// Move left.
    pub left: bool,
    /// Move right.
    pub right: bool,
    /// Move up (top-down) or jump (side-scroller).
    pub up: bool,
    /// Move down (top-down only).
    pub down: bool,
    /// Jump (side-scroller only).
    pub jump: bool,
    /// Start an attack.
    pub attack: bool,
}

/// Which way a character looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facing {
    /// Toward +x.
    #[default]
    Right,
    /// Toward -x.
    Left,
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// What a behavior can see besides its own entity.
pub struct BehaviorContext<'a> {
    /// Seconds since the entity's previous update.
    pub dt: f64,
    /// The active room.
    pub room: &'a Room,
    /// Index of the frame being run.
    pub frame: u64,
}

/// Scripted per-frame logic attached to an entity.
///
/// Behaviors run after collision resolution, so any velocity they set is
/// integrated on the next frame.
pub trait Behavior: Send {
    /// Advance the behavior by one frame.
    fn update(&mut self, entity: &mut Entity, ctx: &BehaviorContext<'_>);
}

// ---------------------------------------------------------------------------
// Sprites
// ---------------------------------------------------------------------------

/// The four poses of a character.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacterSprites {
    /// Standing, facing right.
    pub stand_right: Texture,
    /// Standing, facing left.
    pub stand_left: Texture,
    /// Walking, facing right.
    pub walk_right: Texture,
    /// Walking, facing left.
    pub walk_left: Texture,
}

fn sprite_path(name: &str, pose: &str, side: &str) -> String {
    format!("characters/{name}/{name}_{pose}_{side}.png")
}

/// Fill a missing side of a pose by mirroring the other side.
fn mirror_pair(
    name: &str,
    pose: &str,
    right: Option<Texture>,
    left: Option<Texture>,
) -> Option<(Texture, Texture)> {
    match (right, left) {
        (Some(r), Some(l)) => Some((r, l)),
        (Some(r), None) => {
            tracing::debug!(character = name, pose, "left sprite missing; mirroring right");
            let l = r.flip(true, false);
            Some((r, l))
        }
        (None, Some(l)) => {
            tracing::debug!(character = name, pose, "right sprite missing; mirroring left");
            Some((l.flip(true, false), l))
        }
        (None, None) => None,
    }
}

impl CharacterSprites {
    /// Resolve a character's sprites from
    /// `characters/<name>/<name>_{stand,walk}_{right,left}.png`.
    ///
    /// A missing side is the mirror of the other side, and missing walk
    /// sprites reuse the standing ones. Returns `Ok(None)` when the character
    /// has no standing sprite at all.
    pub fn load(assets: &dyn Assets, name: &str) -> Result<Option<Self>, AssetError> {
        let fetch = |pose: &str, side: &str| assets.texture(&sprite_path(name, pose, side));
        let stand = mirror_pair(name, "stand", fetch("stand", "right")?, fetch("stand", "left")?);
        let Some((stand_right, stand_left)) = stand else {
            tracing::debug!(character = name, "no standing sprite; drawing a flat box");
            return Ok(None);
        };
        let walk = mirror_pair(name, "walk", fetch("walk", "right")?, fetch("walk", "left")?);
        let (walk_right, walk_left) = walk.unwrap_or_else(|| {
            tracing::debug!(character = name, "no walking sprite; reusing standing sprite");
            (stand_right.clone(), stand_left.clone())
        });
        Ok(Some(Self {
            stand_right,
            stand_left,
            walk_right,
            walk_left,
        }))
    }

    /// The sprite for a pose.
    pub fn pick(&self, facing: Facing, walking: bool) -> &Texture {
        match (facing, walking) {
            (Facing::Right, false) => &self.stand_right,
            (Facing::Left, false) => &self.stand_left,
            (Facing::Right, true) => &self.walk_right,
            (Facing::Left, true) => &self.walk_left,
        }
    }
}

// ---------------------------------------------------------------------------
// Attack
// ---------------------------------------------------------------------------

/// A timed melee attack a character can perform.
///
/// Once started the attack animates for `animation_secs`, then cools down for
/// `cooldown_secs` before it can start again (unless `always_reset`, which
/// restarts it on every press).
#[derive(Debug, Clone, PartialEq)]
pub struct Attack {
    /// Sprite drawn while animating, facing right.
    pub right: Option<Texture>,
    /// Sprite drawn while animating, facing left.
    pub left: Option<Texture>,
    /// Length of the attack animation.
    pub animation_secs: f64,
    /// Wait after the animation before another attack may start.
    pub cooldown_secs: f64,
    /// Restart on every press, ignoring the cooldown.
    pub always_reset: bool,
    /// Health removed from each character the hitbox overlaps.
    pub damage: f64,
    /// Movement speed multiplier while animating.
    pub movement_scale: f64,
    elapsed: Option<f64>,
}

impl Attack {
    /// An attack with one point of damage and no movement penalty.
    pub fn new(animation_secs: f64, cooldown_secs: f64) -> Self {
        Self {
            right: None,
            left: None,
            animation_secs,
            cooldown_secs,
            always_reset: false,
            damage: 1.0,
            movement_scale: 1.0,
            elapsed: None,
        }
    }

    /// Set the attack sprites. A missing left sprite mirrors the right one.
    pub fn with_sprites(mut self, right: Option<Texture>, left: Option<Texture>) -> Self {
        self.left = left.or_else(|| right.as_ref().map(|r| r.flip(true, false)));
        self.right = right;
        self
    }

    /// Set the damage dealt per hit.
    pub fn with_damage(mut self, damage: f64) -> Self {
        self.damage = damage;
        self
    }

    /// Set the movement multiplier while animating.
    pub fn with_movement_scale(mut self, scale: f64) -> Self {
        self.movement_scale = scale;
        self
    }

    /// Restart on every press.
    pub fn with_always_reset(mut self, always_reset: bool) -> Self {
        self.always_reset = always_reset;
        self
    }

    /// Whether the animation is playing.
    pub fn is_animating(&self) -> bool {
        matches!(self.elapsed, Some(t) if t < self.animation_secs)
    }

    /// Whether a press would start the attack now.
    pub fn is_ready(&self) -> bool {
        self.always_reset || self.elapsed.is_none()
    }

    /// Start the attack if it is ready. Returns whether it started.
    pub fn trigger(&mut self) -> bool {
        if self.is_ready() {
            self.elapsed = Some(0.0);
            true
        } else {
            false
        }
    }

    /// Advance the animation and cooldown timers.
    pub fn advance(&mut self, dt: f64) {
        if let Some(t) = self.elapsed.as_mut() {
            *t += dt;
            if *t >= self.animation_secs + self.cooldown_secs {
                self.elapsed = None;
            }
        }
    }

    /// The sprite to draw for a facing while animating.
    pub fn sprite(&self, facing: Facing) -> Option<&Texture> {
        match facing {
            Facing::Right => self.right.as_ref(),
            Facing::Left => self.left.as_ref(),
        }
    }
}

/// An attack that started this frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AttackHit {
    pub attacker: EntityId,
    pub hitbox: BoundingBox,
    pub damage: f64,
}

// ---------------------------------------------------------------------------
// Character
// ---------------------------------------------------------------------------

/// A sprite-drawn actor: the player or a non-player character.
#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    name: String,
    sprites: Option<CharacterSprites>,
    facing: Facing,
    walking: bool,
    attack: Option<Attack>,
    attack_held: bool,
    health: Option<f64>,
}

impl Character {
    /// A character facing right, standing, without attack or health.
    pub fn new(name: impl Into<String>, sprites: Option<CharacterSprites>) -> Self {
        Self {
            name: name.into(),
            sprites,
            facing: Facing::Right,
            walking: false,
            attack: None,
            attack_held: false,
            health: None,
        }
    }

    /// Give the character health points, making it damageable.
    pub fn with_health(mut self, health: f64) -> Self {
        self.health = Some(health);
        self
    }

    /// Character name, as used for sprite lookup.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved sprites, if any.
    pub fn sprites(&self) -> Option<&CharacterSprites> {
        self.sprites.as_ref()
    }

    /// Current facing.
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Whether the walking pose is shown.
    pub fn is_walking(&self) -> bool {
        self.walking
    }

    /// The attached attack.
    pub fn attack(&self) -> Option<&Attack> {
        self.attack.as_ref()
    }

    /// Replace the attached attack, returning the previous one.
    pub fn set_attack(&mut self, attack: Option<Attack>) -> Option<Attack> {
        std::mem::replace(&mut self.attack, attack)
    }

    /// Remaining health, `None` for characters that cannot be damaged.
    pub fn health(&self) -> Option<f64> {
        self.health
    }

    /// Set or clear health.
    pub fn set_health(&mut self, health: Option<f64>) {
        self.health = health;
    }

    /// Remove health. Characters without health are unaffected.
    pub fn apply_damage(&mut self, amount: f64) {
        if let Some(h) = self.health.as_mut() {
            *h -= amount;
        }
    }

    /// Whether health has run out.
    pub fn is_defeated(&self) -> bool {
        self.health.is_some_and(|h| h <= 0.0)
    }

    /// The sprite for the current state.
    pub fn sprite(&self) -> Option<&Texture> {
        if let Some(attack) = self.attack.as_ref().filter(|a| a.is_animating()) {
            if let Some(sprite) = attack.sprite(self.facing) {
                return Some(sprite);
            }
        }
        self.sprites
            .as_ref()
            .map(|s| s.pick(self.facing, self.walking))
    }

    fn face_toward(&mut self, dx: f64) {
        if dx > 0.0 {
            self.facing = Facing::Right;
        } else if dx < 0.0 {
            self.facing = Facing::Left;
        }
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// What an entity is.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// The input-driven character.
    Player(Character),
    /// A non-player character.
    Character(Character),
    /// A static slab, `length` tiles wide and one tile tall.
    Platform {
        /// Width in tiles.
        length: f64,
    },
}

impl EntityKind {
    /// Short label used in logs and snapshots.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Player(_) => "player",
            EntityKind::Character(_) => "character",
            EntityKind::Platform { .. } => "platform",
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A dynamic or static body in the world.
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    position: DVec2,
    velocity: DVec2,
    delta: DVec2,
    size: DVec2,
    blocking: bool,
    is_static: bool,
    light_blocking: bool,
    render_behind: bool,
    restrictions: MovementRestrictions,
    behavior: Option<Box<dyn Behavior>>,
    behavior_name: Option<String>,
    pub(crate) timer: DeltaTimer,
    pub(crate) frame_dt: f64,
}

impl Entity {
    /// A blocking, non-static entity of the given kind and box.
    pub fn new(kind: EntityKind, position: DVec2, size: DVec2) -> Self {
        Self {
            id: EntityId(0),
            kind,
            position,
            velocity: DVec2::ZERO,
            delta: DVec2::ZERO,
            size,
            blocking: true,
            is_static: false,
            light_blocking: false,
            render_behind: false,
            restrictions: MovementRestrictions::default(),
            behavior: None,
            behavior_name: None,
            timer: DeltaTimer::new(),
            frame_dt: 0.0,
        }
    }

    /// The input-driven character.
    pub fn player(character: Character, position: DVec2) -> Self {
        Self::new(EntityKind::Player(character), position, CHARACTER_SIZE)
    }

    /// A non-player character.
    pub fn npc(character: Character, position: DVec2) -> Self {
        Self::new(EntityKind::Character(character), position, CHARACTER_SIZE)
    }

    /// A static, light-blocking slab `length` tiles wide and one tile tall.
    pub fn platform(position: DVec2, length: f64, tile_size: f64) -> Self {
        let mut entity = Self::new(
            EntityKind::Platform { length },
            position,
            DVec2::new(length * tile_size, tile_size),
        );
        entity.is_static = true;
        entity.light_blocking = true;
        entity
    }

    /// Attach a named behavior.
    pub fn with_behavior(mut self, name: impl Into<String>, behavior: Box<dyn Behavior>) -> Self {
        self.set_behavior(name, behavior);
        self
    }

    /// Set whether the entity takes part in collision resolution.
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Set whether the entity is exempt from gravity, friction and pushes.
    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    /// Set whether the entity casts shadow.
    pub fn with_light_blocking(mut self, light_blocking: bool) -> Self {
        self.light_blocking = light_blocking;
        self
    }

    /// Draw the entity before others at the same depth.
    pub fn with_render_behind(mut self, render_behind: bool) -> Self {
        self.render_behind = render_behind;
        self
    }

    // -- accessors ----------------------------------------------------------

    /// Identifier assigned when the entity joined a world.
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    /// What the entity is.
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    /// Mutable access to what the entity is.
    pub fn kind_mut(&mut self) -> &mut EntityKind {
        &mut self.kind
    }

    /// Whether this is the player.
    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_))
    }

    /// The character data of a player or character.
    pub fn character(&self) -> Option<&Character> {
        match &self.kind {
            EntityKind::Player(c) | EntityKind::Character(c) => Some(c),
            EntityKind::Platform { .. } => None,
        }
    }

    /// Mutable character data of a player or character.
    pub fn character_mut(&mut self) -> Option<&mut Character> {
        match &mut self.kind {
            EntityKind::Player(c) | EntityKind::Character(c) => Some(c),
            EntityKind::Platform { .. } => None,
        }
    }

    /// Bottom-left corner, world units.
    pub fn position(&self) -> DVec2 {
        self.position
    }

    /// Move the entity without collision.
    pub fn set_position(&mut self, position: DVec2) {
        self.position = position;
    }

    /// Velocity, world units per second.
    pub fn velocity(&self) -> DVec2 {
        self.velocity
    }

    /// Set the velocity.
    pub fn set_velocity(&mut self, velocity: DVec2) {
        self.velocity = velocity;
    }

    pub(crate) fn velocity_mut(&mut self) -> &mut DVec2 {
        &mut self.velocity
    }

    /// Displacement applied so far this frame.
    pub fn delta(&self) -> DVec2 {
        self.delta
    }

    pub(crate) fn delta_mut(&mut self) -> &mut DVec2 {
        &mut self.delta
    }

    /// Collision box size.
    pub fn size(&self) -> DVec2 {
        self.size
    }

    /// Collision box in world space.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::new(self.position.x, self.position.y, self.size.x, self.size.y)
    }

    /// Sides blocked during the current frame's resolution.
    pub fn restrictions(&self) -> MovementRestrictions {
        self.restrictions
    }

    pub(crate) fn restrictions_mut(&mut self) -> &mut MovementRestrictions {
        &mut self.restrictions
    }

    /// Takes part in collision resolution.
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Exempt from gravity, friction and pushes.
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Casts shadow.
    pub fn is_light_blocking(&self) -> bool {
        self.light_blocking
    }

    /// Drawn before others at the same depth.
    pub fn renders_behind(&self) -> bool {
        self.render_behind
    }

    /// Name of the attached behavior.
    pub fn behavior_name(&self) -> Option<&str> {
        self.behavior_name.as_deref()
    }

    /// Attach (or replace) a named behavior.
    pub fn set_behavior(&mut self, name: impl Into<String>, behavior: Box<dyn Behavior>) {
        self.behavior_name = Some(name.into());
        self.behavior = Some(behavior);
    }

    /// Seconds measured for the current frame.
    pub fn frame_dt(&self) -> f64 {
        self.frame_dt
    }

    // -- drawing ------------------------------------------------------------

    /// The texture to draw, if any.
    pub fn sprite(&self) -> Option<&Texture> {
        self.character().and_then(Character::sprite)
    }

    /// Where the sprite is drawn: characters stand one tile wide on the
    /// bottom edge of their box, keeping the sprite's aspect ratio.
    pub fn sprite_bounds(&self, tile_size: f64) -> BoundingBox {
        if self.character().is_none() {
            return self.bounding_box();
        }
        let width = tile_size;
        let height = match self.sprite() {
            Some(tex) if tex.width() > 0 => width * tex.height() as f64 / tex.width() as f64,
            _ => tile_size * 2.0,
        };
        let center = self.bounding_box().center();
        BoundingBox::new(center.x - width / 2.0, self.position.y, width, height)
    }

    // -- frame hooks --------------------------------------------------------

    /// Per-kind update ahead of physics: player input and attack timers.
    pub(crate) fn update_self(
        &mut self,
        input: &InputState,
        player: &PlayerConfig,
        side_scroller: bool,
    ) -> Option<AttackHit> {
        let dt = self.frame_dt;
        let id = self.id;
        let bounds = self.bounding_box();
        let grounded = self.restrictions.down;
        match &mut self.kind {
            EntityKind::Player(character) => {
                let scale = advance_attack(character, dt);
                let dx = f64::from(i8::from(input.right) - i8::from(input.left));
                let speed = player.walk_speed * scale;
                if side_scroller {
                    if dx != 0.0 {
                        self.velocity.x = dx * speed;
                    }
                    if (input.jump || input.up) && grounded {
                        self.velocity.y = player.jump_velocity;
                    }
                    character.walking = dx != 0.0;
                } else {
                    let dy = f64::from(i8::from(input.up) - i8::from(input.down));
                    let dir = DVec2::new(dx, dy);
                    self.velocity = dir.normalize_or_zero() * speed;
                    character.walking = dir != DVec2::ZERO;
                }
                character.face_toward(dx);

                let pressed = input.attack && !character.attack_held;
                character.attack_held = input.attack;
                if !pressed {
                    return None;
                }
                let attack = character.attack.as_mut()?;
                if !attack.trigger() {
                    return None;
                }
                let reach = bounds.width;
                let x = match character.facing {
                    Facing::Right => bounds.right(),
                    Facing::Left => bounds.left() - reach,
                };
                Some(AttackHit {
                    attacker: id,
                    hitbox: BoundingBox::new(x, bounds.y, reach, bounds.height),
                    damage: attack.damage,
                })
            }
            EntityKind::Character(character) => {
                advance_attack(character, dt);
                character.walking = self.velocity.x != 0.0;
                character.face_toward(self.velocity.x);
                None
            }
            EntityKind::Platform { .. } => None,
        }
    }

    /// Run the attached behavior, if any.
    pub(crate) fn run_behavior(&mut self, ctx: &BehaviorContext<'_>) {
        if let Some(mut behavior) = self.behavior.take() {
            behavior.update(self, ctx);
            // A behavior may have replaced itself.
            if self.behavior.is_none() {
                self.behavior = Some(behavior);
            }
        }
    }
}

/// Advance a character's attack; returns the current movement multiplier.
fn advance_attack(character: &mut Character, dt: f64) -> f64 {
    match character.attack.as_mut() {
        Some(attack) => {
            attack.advance(dt);
            if attack.is_animating() {
                attack.movement_scale
            } else {
                1.0
            }
        }
        None => 1.0,
    }
}

impl Resolvable for Entity {
    fn push(&mut self, correction: DVec2) {
        self.position += correction;
        self.delta += correction;
    }

    fn restrict(&mut self, direction: Direction) {
        self.restrictions.set(direction);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("velocity", &self.velocity)
            .field("size", &self.size)
            .field("blocking", &self.blocking)
            .field("is_static", &self.is_static)
            .field("behavior", &self.behavior_name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
