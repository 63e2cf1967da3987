//! Matrices, texture bind state, and the draw API handed to scene callbacks.

use std::collections::HashMap;

use glam::{Mat4, Vec3};
use gloam_spatial::BoundingBox;

use super::gfx::{DeviceRect, GraphicsContext, ShaderKind, TextureBinding, TextureId, Uniform, UvRect};
use super::programs::names;
use crate::assets::Texture;

// ---------------------------------------------------------------------------
// Matrices
// ---------------------------------------------------------------------------

/// Projection and model matrices with save/restore stacks.
#[derive(Debug, Clone)]
pub struct Matrices {
    /// World to clip space.
    pub projection: Mat4,
    /// Object to world space.
    pub model: Mat4,
    projection_stack: Vec<Mat4>,
    model_stack: Vec<Mat4>,
}

impl Default for Matrices {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            projection_stack: Vec::new(),
            model_stack: Vec::new(),
        }
    }
}

impl Matrices {
    /// Identity matrices and empty stacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// An orthographic projection of a world rectangle onto the target.
    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32) -> Mat4 {
        Mat4::orthographic_rh_gl(left, right, bottom, top, -1.0, 1.0)
    }

    /// Save the projection.
    pub fn push_projection(&mut self) {
        self.projection_stack.push(self.projection);
    }

    /// Restore the last saved projection. Popping an empty stack resets to
    /// identity.
    pub fn pop_projection(&mut self) {
        self.projection = self.projection_stack.pop().unwrap_or(Mat4::IDENTITY);
    }

    /// Save the model matrix.
    pub fn push_model(&mut self) {
        self.model_stack.push(self.model);
    }

    /// Restore the last saved model matrix. Popping an empty stack resets to
    /// identity.
    pub fn pop_model(&mut self) {
        self.model = self.model_stack.pop().unwrap_or(Mat4::IDENTITY);
    }

    /// Post-multiply a translation onto the model matrix.
    pub fn translate(&mut self, x: f32, y: f32) {
        self.model *= Mat4::from_translation(Vec3::new(x, y, 0.0));
    }

    /// Post-multiply a scale onto the model matrix.
    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.model *= Mat4::from_scale(Vec3::new(sx, sy, 1.0));
    }

    /// Combined object-to-clip transform.
    pub fn transform(&self) -> Mat4 {
        self.projection * self.model
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Issues rectangle draws through the current matrices.
pub struct Renderer;

impl Renderer {
    /// Draw an object-space rectangle with the current program and bound
    /// texture.
    pub fn draw_rectangle(
        gfx: &mut dyn GraphicsContext,
        matrices: &Matrices,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        uv: UvRect,
    ) {
        let m = matrices.transform();
        let a = m.transform_point3(Vec3::new(x, y, 0.0));
        let b = m.transform_point3(Vec3::new(x + width, y + height, 0.0));
        gfx.draw_quad(
            DeviceRect {
                x0: a.x,
                y0: a.y,
                x1: b.x,
                y1: b.y,
            },
            uv,
        );
    }
}

// ---------------------------------------------------------------------------
// RenderState
// ---------------------------------------------------------------------------

/// Texture uploads and bind state for one graphics context.
#[derive(Debug, Default)]
pub struct RenderState {
    uploads: HashMap<String, TextureId>,
    bound: Option<TextureBinding>,
    light_block_override: bool,
}

impl RenderState {
    /// No uploads, nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// The binding for a texture view, uploading its image on first use.
    /// `None` when the upload fails; the caller draws untextured.
    pub fn binding(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        texture: &Texture,
    ) -> Option<TextureBinding> {
        let id = match self.uploads.get(texture.key()) {
            Some(&id) => id,
            None => match gfx.upload_texture(texture.image()) {
                Ok(id) => {
                    tracing::debug!(texture = texture.key(), "uploaded texture");
                    self.uploads.insert(texture.key().to_string(), id);
                    id
                }
                Err(e) => {
                    tracing::warn!(texture = texture.key(), error = %e, "texture upload failed");
                    return None;
                }
            },
        };
        Some(TextureBinding::new(id).flip(texture.flipped_horizontally(), texture.flipped_vertically()))
    }

    /// Bind to unit 0, skipping the call when it is already bound.
    pub fn bind(&mut self, gfx: &mut dyn GraphicsContext, binding: Option<TextureBinding>) {
        if self.bound != binding {
            gfx.bind_texture(0, binding);
            self.bound = binding;
        }
    }

    /// Forget what unit 0 holds, after other code rebinds it.
    pub fn invalidate_binding(&mut self) {
        self.bound = None;
    }

    /// Number of distinct images uploaded.
    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    /// Drop all uploads, e.g. when the context is replaced.
    pub fn forget_uploads(&mut self) {
        self.uploads.clear();
        self.bound = None;
    }

    /// Whether non-light-blocking draws are masked as blocking.
    pub fn light_block_override(&self) -> bool {
        self.light_block_override
    }

    /// Set the override.
    pub fn set_light_block_override(&mut self, on: bool) {
        self.light_block_override = on;
    }
}

// ---------------------------------------------------------------------------
// ScenePass
// ---------------------------------------------------------------------------

/// Draw API for scene callbacks during a lighting pass.
///
/// Every draw uses the standard program and writes color plus the
/// light-blocking mask.
pub struct ScenePass<'a> {
    gfx: &'a mut dyn GraphicsContext,
    matrices: &'a mut Matrices,
    state: &'a mut RenderState,
    draws: u32,
}

impl<'a> ScenePass<'a> {
    pub(crate) fn new(
        gfx: &'a mut dyn GraphicsContext,
        matrices: &'a mut Matrices,
        state: &'a mut RenderState,
    ) -> Self {
        gfx.use_shader(ShaderKind::Standard);
        Self {
            gfx,
            matrices,
            state,
            draws: 0,
        }
    }

    /// Draw a world-space box with a texture, or a flat `tint` without one.
    pub fn draw_sprite(
        &mut self,
        texture: Option<&Texture>,
        bounds: BoundingBox,
        light_blocking: bool,
        tint: [f32; 4],
    ) {
        let binding = texture.and_then(|t| self.state.binding(&mut *self.gfx, t));
        self.state.bind(&mut *self.gfx, binding);
        let blocks = light_blocking || self.state.light_block_override();
        self.gfx.uniform(names::TEXTURED, Uniform::Int(i32::from(binding.is_some())));
        self.gfx.uniform(names::TINT, Uniform::Vec4(tint));
        self.gfx.uniform(names::LIGHT_BLOCKING, Uniform::Int(i32::from(blocks)));
        Renderer::draw_rectangle(
            &mut *self.gfx,
            self.matrices,
            bounds.x as f32,
            bounds.y as f32,
            bounds.width as f32,
            bounds.height as f32,
            UvRect::FULL,
        );
        self.draws += 1;
    }

    /// Whether this pass masks every draw as light-blocking.
    pub fn light_block_override(&self) -> bool {
        self.state.light_block_override()
    }

    /// Current matrices.
    pub fn matrices(&mut self) -> &mut Matrices {
        &mut *self.matrices
    }

    /// Draws issued so far.
    pub fn draw_count(&self) -> u32 {
        self.draws
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::software::SoftwareContext;

    #[test]
    fn stacks_restore_matrices() {
        let mut m = Matrices::new();
        m.push_model();
        m.translate(2.0, 3.0);
        assert_ne!(m.model, Mat4::IDENTITY);
        m.pop_model();
        assert_eq!(m.model, Mat4::IDENTITY);

        m.projection = Matrices::orthographic(0.0, 4.0, 0.0, 2.0);
        m.push_projection();
        m.projection = Mat4::IDENTITY;
        m.pop_projection();
        assert_eq!(m.projection, Matrices::orthographic(0.0, 4.0, 0.0, 2.0));
    }

    #[test]
    fn orthographic_maps_rectangle_to_device() {
        let p = Matrices::orthographic(0.0, 4.0, 0.0, 2.0);
        let lo = p.transform_point3(Vec3::new(0.0, 0.0, 0.0));
        let hi = p.transform_point3(Vec3::new(4.0, 2.0, 0.0));
        assert!((lo.x + 1.0).abs() < 1e-6 && (lo.y + 1.0).abs() < 1e-6);
        assert!((hi.x - 1.0).abs() < 1e-6 && (hi.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn textures_upload_once_and_bind_lazily() {
        let mut ctx = SoftwareContext::new(4, 4);
        let mut state = RenderState::new();
        let tex = Texture::new("a.png", image::RgbaImage::new(2, 2));
        let a = state.binding(&mut ctx, &tex).unwrap();
        let b = state.binding(&mut ctx, &tex.flip(true, false)).unwrap();
        assert_eq!(a.id, b.id);
        assert!(b.flip_h);
        assert_eq!(state.upload_count(), 1);
        assert_eq!(ctx.stats().textures_uploaded, 1);
    }

    #[test]
    fn override_masks_non_blockers() {
        let mut ctx = SoftwareContext::new(4, 4);
        let fb = ctx.create_framebuffer(4, 4, 2).unwrap();
        ctx.bind_framebuffer(fb).unwrap();
        let mut matrices = Matrices::new();
        let mut state = RenderState::new();
        state.set_light_block_override(true);
        {
            let mut pass = ScenePass::new(&mut ctx, &mut matrices, &mut state);
            pass.draw_sprite(
                None,
                BoundingBox::new(-1.0, -1.0, 2.0, 2.0),
                false,
                [1.0; 4],
            );
            assert_eq!(pass.draw_count(), 1);
        }
        let mask = ctx.attachment_surface(fb, 1).unwrap();
        assert!(mask.pixels().iter().all(|p| p[3] == 1.0));
    }
}
