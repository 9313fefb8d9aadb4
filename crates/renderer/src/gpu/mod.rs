//! Graphics-device seam.
//!
//! The model loader and textures talk to the GPU through [`GraphicsDevice`],
//! a handle-based interface in the shape of a classic immediate-mode graphics
//! API. Two texture families exist side by side:
//! - bind-to-edit: `gen_texture` / `bind_texture` / `tex_image_2d`, which act
//!   on whatever is bound to the active unit;
//! - direct-state-access: `create_texture` / `texture_storage_2d` /
//!   `texture_sub_image_2d`, which address a texture by handle.
//!
//! Implementations:
//! - [`HeadlessDevice`]: records everything, no GPU needed (tests, `--headless`)
//! - [`WgpuDevice`]: real GPU through wgpu
//!
//! Devices are single-threaded; share them as `Rc<dyn GraphicsDevice>`.

pub mod headless;
pub mod wgpu_device;

pub use headless::{DrawRecord, HeadlessDevice, TextureApi, TextureRecord};
pub use wgpu_device::WgpuDevice;

use crate::error::GpuError;

/// Handle to a GPU buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a vertex array (attribute bindings + index buffer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexArrayHandle(pub(crate) u64);

/// Handle to a GPU texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

impl BufferHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl VertexArrayHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl TextureHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Texture unit a shader samples from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(pub u32);

/// Kind of texture object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    #[default]
    D2,
}

/// Texel layout of uploaded pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Rgba32Float,
}

impl PixelFormat {
    /// 8-bit-per-channel format for a decoded image's bit depth.
    pub fn from_bits_per_pixel(bits_per_pixel: u32) -> Option<Self> {
        match bits_per_pixel {
            8 => Some(Self::R8),
            16 => Some(Self::Rg8),
            24 => Some(Self::Rgb8),
            32 => Some(Self::Rgba8),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rg8 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 => 4,
            Self::Rgba32Float => 16,
        }
    }

    pub fn bits_per_pixel(self) -> u32 {
        self.bytes_per_pixel() * 8
    }
}

/// Full-image pixel upload.
#[derive(Clone, Copy, Debug)]
pub struct TextureImage<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl TextureImage<'_> {
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel() as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wrap {
    Repeat,
    ClampToEdge,
}

/// Sampling state attached to a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerParams {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub wrap: Wrap,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            min_filter: Filter::Linear,
            mag_filter: Filter::Linear,
            wrap: Wrap::Repeat,
        }
    }
}

/// Element type of one vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float32x2,
    Float32x3,
    /// Column-major 4x4 matrix spanning four consecutive locations.
    Mat4,
}

impl AttributeFormat {
    pub fn byte_size(self) -> usize {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Mat4 => 64,
        }
    }

    pub fn locations(self) -> u32 {
        match self {
            Self::Mat4 => 4,
            _ => 1,
        }
    }
}

/// Whether an attribute advances per vertex or per instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepMode {
    Vertex,
    Instance,
}

/// Update frequency hint for buffer contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Uploaded once, drawn many times.
    Static,
    /// Rewritten every frame.
    Dynamic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: AttributeFormat,
    pub step: StepMode,
}

impl VertexAttribute {
    pub const fn per_vertex(location: u32, format: AttributeFormat) -> Self {
        Self {
            location,
            format,
            step: StepMode::Vertex,
        }
    }

    pub const fn per_instance(location: u32, format: AttributeFormat) -> Self {
        Self {
            location,
            format,
            step: StepMode::Instance,
        }
    }
}

/// Indexed triangle-list draw of a range of the bound index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawElements {
    pub index_count: u32,
    pub first_index: u32,
    /// Added to every index before fetching vertices.
    pub base_vertex: i32,
    pub instance_count: u32,
}

/// What the driver supports, queried once per device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub direct_state_access: bool,
    pub max_texture_dimension: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            direct_state_access: true,
            max_texture_dimension: 8192,
        }
    }
}

/// Handle-based graphics API shared by the model loader and textures.
///
/// Misuse (unknown handles, nothing bound, size mismatches) never panics:
/// the call is ignored and an error is recorded for [`take_error`].
/// Deleting an unknown handle is a silent no-op.
///
/// [`take_error`]: GraphicsDevice::take_error
pub trait GraphicsDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    fn create_vertex_array(&self) -> VertexArrayHandle;
    fn delete_vertex_array(&self, vao: VertexArrayHandle);
    fn create_buffer(&self) -> BufferHandle;
    fn delete_buffer(&self, buffer: BufferHandle);

    /// Replace `buffer`'s contents and attach it to `vao` at `attribute.location`.
    fn upload_vertex_attribute(
        &self,
        vao: VertexArrayHandle,
        buffer: BufferHandle,
        attribute: VertexAttribute,
        data: &[u8],
        usage: BufferUsage,
    );
    /// Replace `buffer`'s contents and make it `vao`'s index buffer.
    fn upload_index_buffer(&self, vao: VertexArrayHandle, buffer: BufferHandle, indices: &[u32]);

    // Bind-to-edit texture path.
    fn gen_texture(&self) -> TextureHandle;
    /// Bind (or unbind with `None`) a texture on the active unit.
    fn bind_texture(&self, target: TextureTarget, texture: Option<TextureHandle>);
    /// Allocate and fill the texture bound on the active unit.
    fn tex_image_2d(&self, target: TextureTarget, image: &TextureImage<'_>);
    fn tex_parameters(&self, target: TextureTarget, params: &SamplerParams);
    fn active_texture(&self, unit: TextureUnit);

    // Direct-state-access texture path.
    fn create_texture(&self, target: TextureTarget) -> TextureHandle;
    /// Allocate immutable storage; may only be called once per texture.
    fn texture_storage_2d(&self, texture: TextureHandle, width: u32, height: u32, format: PixelFormat);
    fn texture_sub_image_2d(&self, texture: TextureHandle, image: &TextureImage<'_>);
    fn texture_parameters(&self, texture: TextureHandle, params: &SamplerParams);
    fn bind_texture_unit(&self, unit: TextureUnit, texture: TextureHandle);

    fn delete_texture(&self, texture: TextureHandle);

    fn draw_elements(&self, vao: VertexArrayHandle, draw: &DrawElements);

    /// Return and clear the first error recorded since the last call.
    fn take_error(&self) -> Option<GpuError>;
}

/// Checks shared by both texture paths before anything is allocated.
pub(crate) fn validate_image(
    image: &TextureImage<'_>,
    capabilities: &DeviceCapabilities,
) -> Result<(), GpuError> {
    let max = capabilities.max_texture_dimension;
    if image.width == 0 || image.height == 0 || image.width > max || image.height > max {
        return Err(GpuError::InvalidValue(format!(
            "texture size {}x{} outside 1..={max}",
            image.width, image.height
        )));
    }
    if image.data.len() != image.expected_len() {
        return Err(GpuError::InvalidValue(format!(
            "pixel data is {} bytes, expected {}",
            image.data.len(),
            image.expected_len()
        )));
    }
    Ok(())
}

/// Checks a vertex upload is a whole number of elements.
pub(crate) fn validate_attribute_data(attribute: &VertexAttribute, data: &[u8]) -> Result<(), GpuError> {
    if data.is_empty() || data.len() % attribute.format.byte_size() != 0 {
        return Err(GpuError::InvalidValue(format!(
            "{} bytes is not a whole number of {:?} elements",
            data.len(),
            attribute.format
        )));
    }
    Ok(())
}
