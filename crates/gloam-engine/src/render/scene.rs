//! Drawing rooms and entities through a [`ScenePass`].

use gloam_spatial::BoundingBox;

use super::renderer::ScenePass;
use crate::entity::{Entity, EntityKind};
use crate::room::Room;

/// Flat fill for tiles without a texture.
pub const UNTEXTURED_TILE_TINT: [f32; 4] = [0.35, 0.35, 0.4, 1.0];

/// Flat fill for platforms.
pub const PLATFORM_TINT: [f32; 4] = [0.45, 0.4, 0.35, 1.0];

const WHITE: [f32; 4] = [1.0; 4];

/// Draw every filled cell of a room.
pub fn draw_room(pass: &mut ScenePass<'_>, room: &Room) {
    for (x, y, tile) in room.filled_cells() {
        let tint = if tile.texture.is_some() {
            WHITE
        } else {
            UNTEXTURED_TILE_TINT
        };
        pass.draw_sprite(
            tile.texture.as_ref(),
            room.tile_bounds(x, y),
            tile.light_blocking,
            tint,
        );
    }
}

/// Draw one entity. Characters without sprites are drawn as their box.
pub fn draw_entity(pass: &mut ScenePass<'_>, entity: &Entity, tile_size: f64) {
    match entity.kind() {
        EntityKind::Platform { .. } => {
            pass.draw_sprite(
                None,
                entity.bounding_box(),
                entity.is_light_blocking(),
                PLATFORM_TINT,
            );
        }
        EntityKind::Player(_) | EntityKind::Character(_) => {
            let bounds: BoundingBox = match entity.sprite() {
                Some(_) => entity.sprite_bounds(tile_size),
                None => entity.bounding_box(),
            };
            pass.draw_sprite(entity.sprite(), bounds, entity.is_light_blocking(), WHITE);
        }
    }
}

/// Back-to-front draw order: entities marked `render_behind` first, then
/// higher `y` before lower.
pub fn draw_order(entities: &[Entity]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..entities.len()).collect();
    order.sort_by(|&a, &b| {
        let (ea, eb) = (&entities[a], &entities[b]);
        eb.renders_behind()
            .cmp(&ea.renders_behind())
            .then_with(|| eb.position().y.total_cmp(&ea.position().y))
    });
    order
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::DVec2;

    use super::*;
    use crate::entity::Character;
    use crate::render::gfx::GraphicsContext;
    use crate::render::renderer::{Matrices, RenderState};
    use crate::render::software::SoftwareContext;
    use crate::room::{Tile, TILE_SIZE};

    #[test]
    fn order_is_behind_first_then_top_down() {
        let low = Entity::npc(Character::new("a", None), DVec2::new(0.0, 0.1));
        let high = Entity::npc(Character::new("b", None), DVec2::new(0.0, 0.9));
        let back = Entity::platform(DVec2::new(0.0, 0.0), 1.0, TILE_SIZE).with_render_behind(true);
        let entities = vec![low, high, back];
        assert_eq!(draw_order(&entities), vec![2, 1, 0]);
    }

    #[test]
    fn room_draws_one_quad_per_filled_cell() {
        let mut room = Room::new("r", 2, 2, TILE_SIZE, false);
        let tile = Arc::new(Tile {
            texture: None,
            blocking: true,
            light_blocking: true,
        });
        room.set_tile(0, 0, Some(Arc::clone(&tile)));
        room.set_tile(1, 1, Some(tile));

        let mut ctx = SoftwareContext::new(4, 4);
        let mut matrices = Matrices::new();
        matrices.projection = Matrices::orthographic(0.0, 0.4, 0.0, 0.4);
        let mut state = RenderState::new();
        let mut pass = ScenePass::new(&mut ctx, &mut matrices, &mut state);
        draw_room(&mut pass, &room);
        assert_eq!(pass.draw_count(), 2);
        drop(pass);

        let w = ctx.window();
        assert_eq!(w.get(0, 0), UNTEXTURED_TILE_TINT);
        assert_eq!(w.get(3, 3), UNTEXTURED_TILE_TINT);
        assert_eq!(w.get(3, 0), [0.0; 4]);
        assert_eq!(ctx.window_size(), (4, 4));
    }
}
