//! The graphics service interface.
//!
//! Modeled on a GL-style immediate API: framebuffers with color
//! attachments, a current shader program with named uniforms, texture units,
//! a blend mode, and full-quad draws in device coordinates (`[-1, 1]` on
//! both axes, `+y` up).

use std::fmt;

use glam::Mat4;
use image::RgbaImage;

use crate::GfxError;

/// Handle to an off-screen render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u32);

/// Handle to an uploaded texture or framebuffer attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// A texture as bound to a unit: which texture, and how it is mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    /// The texture.
    pub id: TextureId,
    /// Sample mirrored left-to-right.
    pub flip_h: bool,
    /// Sample mirrored top-to-bottom.
    pub flip_v: bool,
}

impl TextureBinding {
    /// An unflipped binding.
    pub fn new(id: TextureId) -> Self {
        Self {
            id,
            flip_h: false,
            flip_v: false,
        }
    }

    /// Mirror on top of the current orientation.
    pub fn flip(self, horizontal: bool, vertical: bool) -> Self {
        Self {
            id: self.id,
            flip_h: self.flip_h ^ horizontal,
            flip_v: self.flip_v ^ vertical,
        }
    }
}

/// How a draw's output combines with the target.
///
/// Factors follow GL naming: `Alpha` is `SRC_ALPHA, ONE_MINUS_SRC_ALPHA`,
/// `Additive` is `ONE, ONE`, `Multiply` is `DST_COLOR, ONE_MINUS_SRC_ALPHA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BlendMode {
    /// Overwrite.
    Replace,
    /// Standard transparency.
    Alpha,
    /// Sum.
    Additive,
    /// Modulate by the destination.
    Multiply,
}

/// The shader programs the lighting pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Textured or flat sprite with a light-blocking mask output.
    Standard,
    /// Per-light ray march through the mask into the ray atlas.
    RayTrace,
    /// Per-light shadow lookup against the ray atlas.
    Shadow,
    /// Plain texture copy.
    Copy,
}

impl fmt::Display for ShaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderKind::Standard => "standard",
            ShaderKind::RayTrace => "ray_trace",
            ShaderKind::Shadow => "shadow",
            ShaderKind::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// A uniform value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Uniform {
    /// `int` / `bool`.
    Int(i32),
    /// `float`.
    Float(f32),
    /// `vec2`.
    Vec2([f32; 2]),
    /// `vec3`.
    Vec3([f32; 3]),
    /// `vec4`.
    Vec4([f32; 4]),
    /// `mat4`.
    Mat4(Mat4),
}

/// A rectangle in device coordinates. Corners may be given in any order;
/// the UV rectangle is mapped from `(x0, y0)` to `(x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceRect {
    /// First corner x.
    pub x0: f32,
    /// First corner y.
    pub y0: f32,
    /// Opposite corner x.
    pub x1: f32,
    /// Opposite corner y.
    pub y1: f32,
}

impl DeviceRect {
    /// The whole target.
    pub const FULL: DeviceRect = DeviceRect {
        x0: -1.0,
        y0: -1.0,
        x1: 1.0,
        y1: 1.0,
    };

    /// The whole target grown by `margin` on every side.
    pub fn overscan(margin: f32) -> Self {
        DeviceRect {
            x0: -1.0 - margin,
            y0: -1.0 - margin,
            x1: 1.0 + margin,
            y1: 1.0 + margin,
        }
    }
}

/// Texture coordinates of a quad's `(x0, y0)` and `(x1, y1)` corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvRect {
    /// u at the first corner.
    pub u0: f32,
    /// v at the first corner.
    pub v0: f32,
    /// u at the opposite corner.
    pub u1: f32,
    /// v at the opposite corner.
    pub v1: f32,
}

impl UvRect {
    /// The whole texture, `v = 0` at the bottom.
    pub const FULL: UvRect = UvRect {
        u0: 0.0,
        v0: 0.0,
        u1: 1.0,
        v1: 1.0,
    };
}

/// A graphics device.
///
/// `use_shader` is idempotent: selecting the program that is already current
/// is free. Uniforms are stored per program and persist across `use` calls.
pub trait GraphicsContext {
    /// Size of the default (window) target in pixels.
    fn window_size(&self) -> (u32, u32);

    /// Allocate a render target with `attachments` color attachments,
    /// cleared to transparent.
    fn create_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        attachments: usize,
    ) -> Result<FramebufferId, GfxError>;

    /// Free a render target. Unknown ids are ignored.
    fn delete_framebuffer(&mut self, id: FramebufferId);

    /// Pixel size of a render target.
    fn framebuffer_size(&self, id: FramebufferId) -> Result<(u32, u32), GfxError>;

    /// A color attachment as a sampleable texture.
    fn attachment(&self, id: FramebufferId, index: usize) -> Result<TextureBinding, GfxError>;

    /// Direct draws and clears to a render target.
    fn bind_framebuffer(&mut self, id: FramebufferId) -> Result<(), GfxError>;

    /// Direct draws and clears back to the window.
    fn release_framebuffer(&mut self);

    /// Upload an image. Row 0 of the image is the top of the texture.
    fn upload_texture(&mut self, image: &RgbaImage) -> Result<TextureId, GfxError>;

    /// Fill every attachment of the current target.
    fn clear(&mut self, color: [f32; 4]);

    /// Set the blend mode for subsequent draws.
    fn set_blend(&mut self, mode: BlendMode);

    /// Make a program current.
    fn use_shader(&mut self, shader: ShaderKind);

    /// Set a uniform on the current program.
    fn uniform(&mut self, name: &str, value: Uniform);

    /// Bind a texture to a unit, or unbind it.
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureBinding>);

    /// Run the current program over a quad.
    fn draw_quad(&mut self, rect: DeviceRect, uv: UvRect);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_flips_compose() {
        let b = TextureBinding::new(TextureId(3));
        let v = b.flip(false, true);
        assert!(v.flip_v && !v.flip_h);
        assert_eq!(v.flip(false, true), b);
    }

    #[test]
    fn overscan_grows_every_edge() {
        let r = DeviceRect::overscan(0.1);
        assert_eq!((r.x0, r.y0, r.x1, r.y1), (-1.1, -1.1, 1.1, 1.1));
    }
}
