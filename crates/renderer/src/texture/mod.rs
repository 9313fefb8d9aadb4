//! GPU textures.
//!
//! A [`TextureSubsystem`] pairs a device with the binding strategy it
//! supports; every [`Texture`] made from it uploads and binds through that
//! strategy. A texture owns its GPU object and deletes it on drop.

pub mod backend;

use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use asset::DecodedImage;

use crate::error::TextureError;
use crate::gpu::{GraphicsDevice, PixelFormat, SamplerParams, TextureHandle, TextureImage, TextureTarget, TextureUnit};

use self::backend::TextureBackend;

/// Device plus the binding strategy chosen for it.
#[derive(Clone)]
pub struct TextureSubsystem {
    device: Rc<dyn GraphicsDevice>,
    backend: &'static dyn TextureBackend,
    sampler: SamplerParams,
}

impl TextureSubsystem {
    /// Detect the binding strategy from the device capabilities.
    pub fn new(device: Rc<dyn GraphicsDevice>) -> Self {
        let backend = backend::select(&device.capabilities());
        log::info!("Texture binding strategy: {}", backend.name());
        Self::with_backend(device, backend)
    }

    /// Use a specific strategy regardless of capabilities.
    pub fn with_backend(device: Rc<dyn GraphicsDevice>, backend: &'static dyn TextureBackend) -> Self {
        Self {
            device,
            backend,
            sampler: SamplerParams::default(),
        }
    }

    pub fn device(&self) -> &Rc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Empty texture, to be filled with one of the `load_*` calls.
    pub fn texture(&self, target: TextureTarget) -> Texture {
        Texture {
            subsystem: self.clone(),
            target,
            path: None,
            handle: None,
            width: 0,
            height: 0,
            bits_per_pixel: 0,
        }
    }

    /// File-backed texture; nothing is read until [`Texture::load`].
    pub fn texture_from_file(&self, target: TextureTarget, path: impl Into<PathBuf>) -> Texture {
        let mut texture = self.texture(target);
        texture.path = Some(path.into());
        texture
    }
}

impl fmt::Debug for TextureSubsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureSubsystem")
            .field("backend", &self.backend.name())
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

/// One GPU texture of a fixed target kind.
pub struct Texture {
    subsystem: TextureSubsystem,
    target: TextureTarget,
    path: Option<PathBuf>,
    handle: Option<TextureHandle>,
    width: u32,
    height: u32,
    bits_per_pixel: u32,
}

impl Texture {
    /// Decode and upload the file this texture was created for.
    pub fn load(&mut self) -> Result<(), TextureError> {
        let path = self.path.clone().ok_or(TextureError::NoSource)?;
        let image = DecodedImage::decode_file(&path)?;
        self.upload_decoded(&image)
    }

    pub fn load_from_file(&mut self, path: impl Into<PathBuf>) -> Result<(), TextureError> {
        self.path = Some(path.into());
        self.load()
    }

    /// Decode an encoded image (PNG, JPEG) held in memory.
    pub fn load_from_memory(&mut self, bytes: &[u8]) -> Result<(), TextureError> {
        let image = DecodedImage::decode_memory(bytes)?;
        self.upload_decoded(&image)
    }

    /// Upload 8-bit-per-channel pixels with 1 to 4 channels.
    pub fn load_raw(
        &mut self,
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        pixels: &[u8],
    ) -> Result<(), TextureError> {
        let format = PixelFormat::from_bits_per_pixel(bits_per_pixel)
            .ok_or(TextureError::UnsupportedBitsPerPixel(bits_per_pixel))?;
        self.upload(width, height, format, pixels)
    }

    /// Upload RGBA 32-bit float pixels (four floats per pixel).
    pub fn load_f32(&mut self, width: u32, height: u32, pixels: &[f32]) -> Result<(), TextureError> {
        self.upload(width, height, PixelFormat::Rgba32Float, bytemuck::cast_slice(pixels))
    }

    /// Make this texture the one sampled from `unit`.
    pub fn bind(&self, unit: TextureUnit) {
        match self.handle {
            Some(handle) => {
                self.subsystem
                    .backend
                    .bind(&*self.subsystem.device, handle, self.target, unit)
            }
            None => log::warn!("binding texture {:?} before it was loaded", self.path),
        }
    }

    /// Width and height of the last successful load.
    pub fn image_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bits_per_pixel
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    fn upload_decoded(&mut self, image: &DecodedImage) -> Result<(), TextureError> {
        let format = PixelFormat::from_bits_per_pixel(image.bits_per_pixel)
            .ok_or(TextureError::UnsupportedBitsPerPixel(image.bits_per_pixel))?;
        self.upload(image.width, image.height, format, &image.data)
    }

    fn upload(&mut self, width: u32, height: u32, format: PixelFormat, data: &[u8]) -> Result<(), TextureError> {
        let max = self.subsystem.device.capabilities().max_texture_dimension;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(TextureError::InvalidSize { width, height });
        }
        let image = TextureImage {
            width,
            height,
            format,
            data,
        };
        if data.len() != image.expected_len() {
            return Err(TextureError::DataSize {
                expected: image.expected_len(),
                actual: data.len(),
            });
        }

        // Storage may be immutable; a reload always gets a fresh object.
        self.release();
        let device = &*self.subsystem.device;
        let backend = self.subsystem.backend;
        let handle = backend.create(device, self.target);
        backend.upload(device, handle, self.target, &image, &self.subsystem.sampler);

        self.handle = Some(handle);
        self.width = width;
        self.height = height;
        self.bits_per_pixel = format.bits_per_pixel();
        Ok(())
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.subsystem.device.delete_texture(handle);
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .field("size", &(self.width, self.height))
            .field("bits_per_pixel", &self.bits_per_pixel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DeviceCapabilities, HeadlessDevice, TextureApi};
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn subsystem(direct: bool) -> (Rc<HeadlessDevice>, TextureSubsystem) {
        let device = Rc::new(HeadlessDevice::with_capabilities(DeviceCapabilities {
            direct_state_access: direct,
            max_texture_dimension: 64,
        }));
        let textures = TextureSubsystem::new(device.clone());
        (device, textures)
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    #[test]
    fn strategy_is_chosen_from_capabilities() {
        for (direct, api) in [(true, TextureApi::Direct), (false, TextureApi::Classic)] {
            let (device, textures) = subsystem(direct);
            let mut tex = textures.texture(TextureTarget::D2);
            tex.load_raw(2, 1, 24, &[1, 2, 3, 4, 5, 6]).expect("load raw");
            assert_eq!(device.take_error(), None);

            let record = device.texture(tex.handle().unwrap()).unwrap();
            assert_eq!(record.api, api);
            assert_eq!(record.format, Some(PixelFormat::Rgb8));
            assert_eq!(record.data, vec![1, 2, 3, 4, 5, 6]);
            assert_eq!(record.params, Some(SamplerParams::default()));
        }
    }

    #[test]
    fn bind_activates_unit_with_either_strategy() {
        for direct in [true, false] {
            let (device, textures) = subsystem(direct);
            let mut tex = textures.texture(TextureTarget::D2);
            tex.load_raw(1, 1, 8, &[200]).unwrap();
            tex.bind(TextureUnit(2));
            assert_eq!(device.bound_texture(TextureUnit(2)), tex.handle());
            assert_eq!(device.take_error(), None);
        }
    }

    #[test]
    fn memory_load_records_size_and_depth() {
        let (_device, textures) = subsystem(true);
        let mut tex = textures.texture(TextureTarget::D2);
        tex.load_from_memory(&png_bytes()).expect("decode png");
        assert_eq!(tex.image_size(), (3, 2));
        assert_eq!(tex.bits_per_pixel(), 32);
        assert_eq!(tex.path(), None);
    }

    #[test]
    fn float_pixels_are_uploaded_as_rgba32f() {
        let (device, textures) = subsystem(true);
        let mut tex = textures.texture(TextureTarget::D2);
        let pixels = [0.5f32; 2 * 2 * 4];
        tex.load_f32(2, 2, &pixels).unwrap();
        let record = device.texture(tex.handle().unwrap()).unwrap();
        assert_eq!(record.format, Some(PixelFormat::Rgba32Float));
        assert_eq!(record.data.len(), 64);
        assert_eq!(tex.bits_per_pixel(), 128);
    }

    #[test]
    fn reload_and_drop_release_gpu_objects() {
        let (device, textures) = subsystem(true);
        let mut tex = textures.texture(TextureTarget::D2);
        tex.load_raw(1, 1, 32, &[0, 0, 0, 255]).unwrap();
        let first = tex.handle().unwrap();
        tex.load_raw(1, 1, 32, &[255, 0, 0, 255]).unwrap();
        assert_ne!(tex.handle(), Some(first));
        assert_eq!(device.live_textures(), 1);

        drop(tex);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn bad_input_is_rejected_before_upload() {
        let (device, textures) = subsystem(true);
        let mut tex = textures.texture(TextureTarget::D2);
        assert!(matches!(
            tex.load_raw(2, 2, 32, &[0; 4]),
            Err(TextureError::DataSize { expected: 16, actual: 4 })
        ));
        assert!(matches!(
            tex.load_raw(1, 1, 12, &[0; 2]),
            Err(TextureError::UnsupportedBitsPerPixel(12))
        ));
        assert!(matches!(
            tex.load_raw(128, 1, 8, &[0; 128]),
            Err(TextureError::InvalidSize { .. })
        ));
        assert!(matches!(tex.load(), Err(TextureError::NoSource)));
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn missing_file_fails_to_decode() {
        let (_device, textures) = subsystem(false);
        let mut tex = textures.texture_from_file(TextureTarget::D2, "/nonexistent/brick.png");
        assert!(matches!(tex.load(), Err(TextureError::Decode(_))));
        assert_eq!(tex.handle(), None);
    }
}
