//! A CPU implementation of [`GraphicsContext`].
//!
//! Surfaces hold linear `f32` RGBA with row 0 at the bottom, matching device
//! coordinates. Draws rasterize pixel centers inside the quad, run the
//! current [`ShaderKind`]'s program per pixel, and blend into every color
//! attachment the program writes. Results are clamped to `[0, 1]` like a
//! normalized fixed-point target.

use std::collections::HashMap;

use glam::Vec2;
use image::RgbaImage;

use super::gfx::{
    BlendMode, DeviceRect, FramebufferId, GraphicsContext, ShaderKind, TextureBinding, TextureId,
    Uniform, UvRect,
};
use super::programs::{Fragment, Program, Sampler};
use crate::GfxError;

/// Number of texture units.
pub const TEXTURE_UNITS: usize = 4;

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// A grid of RGBA pixels, row 0 at the bottom.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 4]>,
}

impl Surface {
    /// A transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    /// Convert an image whose row 0 is the top.
    pub fn from_image(image: &RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        let mut surface = Self::new(width, height);
        for (x, y, px) in image.enumerate_pixels() {
            let color = px.0.map(|c| f32::from(c) / 255.0);
            surface.set(x, height - 1 - y, color);
        }
        surface
    }

    /// Quantize to an image whose row 0 is the top.
    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let color = self.get(x, self.height - 1 - y);
            image::Rgba(color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at `(x, y)`, transparent when out of range.
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize]
        } else {
            [0.0; 4]
        }
    }

    /// Write a pixel. Out-of-range writes are dropped.
    pub fn set(&mut self, x: u32, y: u32, color: [f32; 4]) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = color;
        }
    }

    /// Fill every pixel.
    pub fn fill(&mut self, color: [f32; 4]) {
        self.pixels.fill(color);
    }

    /// All pixels, bottom row first.
    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    /// Nearest-texel lookup with clamp-to-edge addressing.
    pub fn sample(&self, uv: Vec2, flip_h: bool, flip_v: bool) -> [f32; 4] {
        if self.width == 0 || self.height == 0 {
            return [0.0; 4];
        }
        let u = if flip_h { 1.0 - uv.x } else { uv.x };
        let v = if flip_v { 1.0 - uv.y } else { uv.y };
        let x = (u * self.width as f32).floor().clamp(0.0, (self.width - 1) as f32) as u32;
        let y = (v * self.height as f32).floor().clamp(0.0, (self.height - 1) as f32) as u32;
        self.get(x, y)
    }
}

// ---------------------------------------------------------------------------
// Blending
// ---------------------------------------------------------------------------

/// Combine a fragment with the pixel under it.
pub fn blend(mode: BlendMode, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let sa = src[3];
    let mut out = [0.0; 4];
    for i in 0..4 {
        out[i] = match mode {
            BlendMode::Replace => src[i],
            BlendMode::Alpha => src[i] * sa + dst[i] * (1.0 - sa),
            BlendMode::Additive => src[i] + dst[i],
            BlendMode::Multiply => src[i] * dst[i] + dst[i] * (1.0 - sa),
        }
        .clamp(0.0, 1.0);
    }
    out
}

// ---------------------------------------------------------------------------
// SoftwareContext
// ---------------------------------------------------------------------------

/// Counters of work issued to a [`SoftwareContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// `draw_quad` calls that ran a program.
    pub draw_calls: u64,
    /// `use_shader` calls.
    pub shader_uses: u64,
    /// `use_shader` calls that changed the current program.
    pub shader_switches: u64,
    /// `clear` calls.
    pub clears: u64,
    /// Framebuffers allocated.
    pub framebuffers_created: u64,
    /// Framebuffers freed.
    pub framebuffers_deleted: u64,
    /// Images uploaded.
    pub textures_uploaded: u64,
}

#[derive(Debug, Clone)]
struct FramebufferSlot {
    width: u32,
    height: u32,
    attachments: Vec<TextureId>,
}

struct Samplers<'a> {
    textures: &'a [Surface],
    units: &'a [Option<TextureBinding>; TEXTURE_UNITS],
}

impl Sampler for Samplers<'_> {
    fn sample(&self, unit: u32, uv: Vec2) -> [f32; 4] {
        let Some(Some(binding)) = self.units.get(unit as usize) else {
            return [0.0; 4];
        };
        match self.textures.get(binding.id.0 as usize) {
            Some(surface) => surface.sample(uv, binding.flip_h, binding.flip_v),
            None => [0.0; 4],
        }
    }
}

/// The CPU graphics backend.
pub struct SoftwareContext {
    window: Surface,
    textures: Vec<Surface>,
    free_textures: Vec<TextureId>,
    framebuffers: Vec<Option<FramebufferSlot>>,
    bound: Option<FramebufferId>,
    blend: BlendMode,
    shader: Option<ShaderKind>,
    uniforms: HashMap<ShaderKind, HashMap<String, Uniform>>,
    units: [Option<TextureBinding>; TEXTURE_UNITS],
    stats: BackendStats,
}

impl SoftwareContext {
    /// A context with a transparent window of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            window: Surface::new(width, height),
            textures: Vec::new(),
            free_textures: Vec::new(),
            framebuffers: Vec::new(),
            bound: None,
            blend: BlendMode::Replace,
            shader: None,
            uniforms: HashMap::new(),
            units: [None; TEXTURE_UNITS],
            stats: BackendStats::default(),
        }
    }

    /// Resize the window surface, discarding its contents.
    pub fn resize_window(&mut self, width: u32, height: u32) {
        self.window = Surface::new(width, height);
    }

    /// The window's pixels.
    pub fn window(&self) -> &Surface {
        &self.window
    }

    /// An uploaded texture or attachment.
    pub fn texture(&self, id: TextureId) -> Option<&Surface> {
        self.textures.get(id.0 as usize)
    }

    /// A framebuffer attachment's pixels.
    pub fn attachment_surface(&self, id: FramebufferId, index: usize) -> Result<&Surface, GfxError> {
        let binding = self.attachment(id, index)?;
        self.texture(binding.id)
            .ok_or(GfxError::UnknownFramebuffer(id))
    }

    /// Work counters since construction or [`reset_stats`](Self::reset_stats).
    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Zero the work counters.
    pub fn reset_stats(&mut self) {
        self.stats = BackendStats::default();
    }

    /// The current program.
    pub fn current_shader(&self) -> Option<ShaderKind> {
        self.shader
    }

    /// The current blend mode.
    pub fn current_blend(&self) -> BlendMode {
        self.blend
    }

    /// The current render target, `None` for the window.
    pub fn bound_framebuffer(&self) -> Option<FramebufferId> {
        self.bound
    }

    /// A uniform as last set on a program.
    pub fn uniform_value(&self, shader: ShaderKind, name: &str) -> Option<Uniform> {
        self.uniforms.get(&shader)?.get(name).copied()
    }

    /// Number of live framebuffers.
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.iter().flatten().count()
    }

    /// Number of texture slots ever allocated, live or free.
    pub fn texture_capacity(&self) -> usize {
        self.textures.len()
    }

    /// Store a surface in a freed slot, or a new one.
    fn alloc_texture(&mut self, surface: Surface) -> Result<TextureId, GfxError> {
        if let Some(id) = self.free_textures.pop() {
            self.textures[id.0 as usize] = surface;
            return Ok(id);
        }
        let id = u32::try_from(self.textures.len()).map_err(|_| GfxError::ResourcesExhausted)?;
        self.textures.push(surface);
        Ok(TextureId(id))
    }

    fn slot(&self, id: FramebufferId) -> Result<&FramebufferSlot, GfxError> {
        self.framebuffers
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GfxError::UnknownFramebuffer(id))
    }

    fn target_ids(&self) -> Option<Vec<TextureId>> {
        let id = self.bound?;
        self.slot(id).ok().map(|slot| slot.attachments.clone())
    }

    fn take_targets(&mut self) -> (Option<Vec<TextureId>>, Vec<Surface>) {
        match self.target_ids() {
            Some(ids) => {
                let surfaces = ids
                    .iter()
                    .map(|id| std::mem::take(&mut self.textures[id.0 as usize]))
                    .collect();
                (Some(ids), surfaces)
            }
            None => (None, vec![std::mem::take(&mut self.window)]),
        }
    }

    fn restore_targets(&mut self, ids: Option<Vec<TextureId>>, surfaces: Vec<Surface>) {
        match ids {
            Some(ids) => {
                for (id, surface) in ids.into_iter().zip(surfaces) {
                    self.textures[id.0 as usize] = surface;
                }
            }
            None => {
                if let Some(window) = surfaces.into_iter().next() {
                    self.window = window;
                }
            }
        }
    }
}

/// Half-open pixel range whose centers fall inside `[lo, hi)` device units.
fn pixel_span(lo: f32, hi: f32, size: u32) -> (u32, u32) {
    let to_px = |d: f32| (d + 1.0) * 0.5 * size as f32;
    let first = (to_px(lo) - 0.5).ceil().max(0.0);
    let last = (to_px(hi) - 0.5).ceil().min(size as f32);
    if last <= first {
        (0, 0)
    } else {
        (first as u32, last as u32)
    }
}

impl GraphicsContext for SoftwareContext {
    fn window_size(&self) -> (u32, u32) {
        (self.window.width, self.window.height)
    }

    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        attachments: usize,
    ) -> Result<FramebufferId, GfxError> {
        if width == 0 || height == 0 || attachments == 0 {
            return Err(GfxError::InvalidFramebuffer {
                width,
                height,
                attachments,
            });
        }
        let slot = match self.framebuffers.iter().position(Option::is_none) {
            Some(free) => free,
            None => self.framebuffers.len(),
        };
        let id = FramebufferId(u32::try_from(slot).map_err(|_| GfxError::ResourcesExhausted)?);

        let mut ids = Vec::with_capacity(attachments);
        for _ in 0..attachments {
            match self.alloc_texture(Surface::new(width, height)) {
                Ok(texture) => ids.push(texture),
                Err(e) => {
                    self.free_textures.extend(ids);
                    return Err(e);
                }
            }
        }
        let framebuffer = Some(FramebufferSlot {
            width,
            height,
            attachments: ids,
        });
        if slot == self.framebuffers.len() {
            self.framebuffers.push(framebuffer);
        } else {
            self.framebuffers[slot] = framebuffer;
        }
        self.stats.framebuffers_created += 1;
        Ok(id)
    }

    fn delete_framebuffer(&mut self, id: FramebufferId) {
        let Some(slot) = self.framebuffers.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        for texture in slot.attachments {
            self.textures[texture.0 as usize] = Surface::default();
            self.free_textures.push(texture);
        }
        if self.bound == Some(id) {
            self.bound = None;
        }
        self.stats.framebuffers_deleted += 1;
    }

    fn framebuffer_size(&self, id: FramebufferId) -> Result<(u32, u32), GfxError> {
        self.slot(id).map(|s| (s.width, s.height))
    }

    fn attachment(&self, id: FramebufferId, index: usize) -> Result<TextureBinding, GfxError> {
        let slot = self.slot(id)?;
        slot.attachments
            .get(index)
            .map(|&t| TextureBinding::new(t))
            .ok_or(GfxError::AttachmentOutOfRange {
                framebuffer: id,
                index,
                count: slot.attachments.len(),
            })
    }

    fn bind_framebuffer(&mut self, id: FramebufferId) -> Result<(), GfxError> {
        self.slot(id)?;
        self.bound = Some(id);
        Ok(())
    }

    fn release_framebuffer(&mut self) {
        self.bound = None;
    }

    fn upload_texture(&mut self, image: &RgbaImage) -> Result<TextureId, GfxError> {
        let id = self.alloc_texture(Surface::from_image(image))?;
        self.stats.textures_uploaded += 1;
        Ok(id)
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.stats.clears += 1;
        match self.target_ids() {
            Some(ids) => {
                for id in ids {
                    self.textures[id.0 as usize].fill(color);
                }
            }
            None => self.window.fill(color),
        }
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn use_shader(&mut self, shader: ShaderKind) {
        self.stats.shader_uses += 1;
        if self.shader != Some(shader) {
            self.shader = Some(shader);
            self.stats.shader_switches += 1;
        }
    }

    fn uniform(&mut self, name: &str, value: Uniform) {
        let Some(shader) = self.shader else {
            tracing::warn!(uniform = name, "uniform set with no program in use; ignored");
            return;
        };
        self.uniforms
            .entry(shader)
            .or_default()
            .insert(name.to_string(), value);
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureBinding>) {
        if let Some(slot) = self.units.get_mut(unit as usize) {
            *slot = texture;
        }
    }

    fn draw_quad(&mut self, rect: DeviceRect, uv: UvRect) {
        let Some(kind) = self.shader else {
            tracing::warn!("draw with no program in use; ignored");
            return;
        };
        self.stats.draw_calls += 1;
        let program = Program::prepare(kind, self.uniforms.get(&kind));

        let (xa, xb, ua, ub) = if rect.x0 <= rect.x1 {
            (rect.x0, rect.x1, uv.u0, uv.u1)
        } else {
            (rect.x1, rect.x0, uv.u1, uv.u0)
        };
        let (ya, yb, va, vb) = if rect.y0 <= rect.y1 {
            (rect.y0, rect.y1, uv.v0, uv.v1)
        } else {
            (rect.y1, rect.y0, uv.v1, uv.v0)
        };
        if xb <= xa || yb <= ya {
            return;
        }

        let (ids, mut surfaces) = self.take_targets();
        let (width, height) = surfaces
            .first()
            .map_or((0, 0), |s| (s.width, s.height));
        let (x0, x1) = pixel_span(xa, xb, width);
        let (y0, y1) = pixel_span(ya, yb, height);

        let sampler = Samplers {
            textures: &self.textures,
            units: &self.units,
        };
        let mode = self.blend;
        for j in y0..y1 {
            let cy = (j as f32 + 0.5) / height as f32 * 2.0 - 1.0;
            let v = va + (cy - ya) / (yb - ya) * (vb - va);
            for i in x0..x1 {
                let cx = (i as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                let u = ua + (cx - xa) / (xb - xa) * (ub - ua);
                let frag = Fragment {
                    uv: Vec2::new(u, v),
                    coord: (i, j),
                };
                let outputs = program.shade(&frag, &sampler);
                for (surface, output) in surfaces.iter_mut().zip(outputs) {
                    if let Some(src) = output {
                        let dst = surface.get(i, j);
                        surface.set(i, j, blend(mode, src, dst));
                    }
                }
            }
        }

        self.restore_targets(ids, surfaces);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
