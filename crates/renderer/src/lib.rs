//! Renderer: graphics-device seam, textures, model loading.
//! wgpu = 23.x

pub mod error;
pub mod gpu;
pub mod model;
pub mod texture;

pub use error::{GeometryError, GpuError, ModelError, TextureError};
pub use gpu::{DeviceCapabilities, GraphicsDevice, HeadlessDevice, TextureTarget, TextureUnit, WgpuDevice};
pub use model::{BufferLayout, MaterialSlot, ModelLoader, SubMeshRange};
pub use texture::{Texture, TextureSubsystem};
