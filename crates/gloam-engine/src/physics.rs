//! The per-entity physics step.
//!
//! A frame moves each entity in two halves around collision resolution:
//!
//! 1. [`integrate`]: gravity, velocity into the displacement accumulator,
//!    per-axis clamp, apply to position, reset restrictions.
//! 2. [`resolve_tiles`] against the room, then entity pairs (driven by the
//!    world through the quad-tree, using [`resolve_against`]).
//! 3. [`settle`]: cancel velocity into contacts and apply friction.
//!
//! Static entities keep whatever velocity they are given: they never gain
//! gravity, friction or contact corrections.

use glam::DVec2;
use gloam_spatial::{BoundingBox, Direction};

use crate::config::PhysicsConfig;
use crate::entity::Entity;
use crate::room::Room;

/// Treat NaN and negative frame times as zero. Infinity passes through; the
/// step clamp bounds what it can do.
pub fn sanitize_dt(dt: f64) -> f64 {
    if dt.is_nan() || dt < 0.0 {
        0.0
    } else {
        dt
    }
}

fn clamp_axis(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-max, max)
    }
}

/// Clamp each axis of a displacement to `[-max, max]`. NaN becomes zero.
pub fn clamp_step(delta: DVec2, max: f64) -> DVec2 {
    DVec2::new(clamp_axis(delta.x, max), clamp_axis(delta.y, max))
}

/// Decay a horizontal speed toward zero by `friction * dt`, snapping to
/// exactly zero below `friction_snap`.
pub fn apply_friction(vx: f64, dt: f64, cfg: &PhysicsConfig) -> f64 {
    if vx == 0.0 {
        return 0.0;
    }
    let reduced = vx.abs() - cfg.friction * dt;
    if reduced < cfg.friction_snap {
        0.0
    } else {
        reduced.copysign(vx)
    }
}

/// Gravity, integration, clamp and position update for one entity.
pub fn integrate(entity: &mut Entity, dt: f64, side_scroller: bool, cfg: &PhysicsConfig) {
    let dt = sanitize_dt(dt);
    let grounded = entity.restrictions().down;
    let is_static = entity.is_static();

    let velocity = entity.velocity_mut();
    if !velocity.x.is_finite() {
        velocity.x = 0.0;
    }
    if !velocity.y.is_finite() {
        velocity.y = 0.0;
    }
    if side_scroller && !grounded && !is_static {
        velocity.y -= cfg.gravity * dt;
    }
    let step = *velocity * dt;

    let delta = entity.delta_mut();
    *delta = clamp_step(*delta + clamp_step(step, cfg.max_step), cfg.max_step);
    let applied = *delta;

    entity.set_position(entity.position() + applied);
    entity.restrictions_mut().reset();
}

/// Resolve one entity against an obstacle box with its current displacement.
pub fn resolve_against(mover: &mut Entity, obstacle: &BoundingBox) -> Option<Direction> {
    let bounds = mover.bounding_box();
    let delta = mover.delta();
    bounds.resolve(obstacle, delta, mover)
}

/// Push an entity out of the blocking tiles around it. Returns the number of
/// contacts resolved.
///
/// Cells within one tile of the entity's box are candidates. Each blocking
/// tile's box is inset horizontally by `cfg.tile_inset` on both sides, and
/// candidates are resolved in order of decreasing overlap so that the tile an
/// entity stands on is handled before the seam to its neighbour.
pub fn resolve_tiles(entity: &mut Entity, room: &Room, cfg: &PhysicsConfig) -> usize {
    if entity.is_static() {
        return 0;
    }
    let ts = room.tile_size();
    let bounds = entity.bounding_box();
    let region = bounds.expanded(ts, ts);

    let mut candidates: Vec<(f64, BoundingBox)> = room
        .cells_touching(&region)
        .filter(|&(x, y)| room.is_blocking(x, y))
        .map(|(x, y)| {
            let cell = room.tile_bounds(x, y);
            let inset = BoundingBox::new(
                cell.x + cfg.tile_inset,
                cell.y,
                cell.width - 2.0 * cfg.tile_inset,
                cell.height,
            );
            (bounds.intersection_area(&inset), inset)
        })
        .collect();
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    candidates
        .iter()
        .filter(|(_, tile)| resolve_against(entity, tile).is_some())
        .count()
}

/// Post-collision velocity handling: cancel motion into contacts, then
/// friction.
///
/// A grounded side-scroller mover keeps a resting velocity of
/// `-gravity * dt` so it presses into the floor next frame and stays
/// grounded. Friction applies to grounded movers and to every mover in a
/// top-down room.
pub fn settle(entity: &mut Entity, dt: f64, side_scroller: bool, cfg: &PhysicsConfig) {
    if entity.is_static() {
        return;
    }
    let dt = sanitize_dt(dt);
    let r = entity.restrictions();
    let velocity = entity.velocity_mut();

    if r.down && velocity.y < 0.0 {
        velocity.y = if side_scroller {
            -cfg.gravity * dt
        } else {
            0.0
        };
    }
    if r.up && velocity.y > 0.0 {
        velocity.y = 0.0;
    }
    if (r.left && velocity.x < 0.0) || (r.right && velocity.x > 0.0) {
        velocity.x = 0.0;
    }
    if r.down || !side_scroller {
        velocity.x = apply_friction(velocity.x, dt, cfg);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
