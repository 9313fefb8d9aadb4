//! Texture binding strategies.
//!
//! Drivers either configure a texture through whatever is bound to a target
//! (bind-to-edit) or address it by handle (direct-state-access). The strategy
//! is picked once per [`TextureSubsystem`](super::TextureSubsystem) from the
//! device capabilities; textures never branch on it themselves.

use crate::gpu::{
    DeviceCapabilities, GraphicsDevice, SamplerParams, TextureHandle, TextureImage, TextureTarget,
    TextureUnit,
};

/// Create, upload and bind operations for one binding style.
pub trait TextureBackend {
    fn name(&self) -> &'static str;

    fn create(&self, device: &dyn GraphicsDevice, target: TextureTarget) -> TextureHandle;

    fn upload(
        &self,
        device: &dyn GraphicsDevice,
        texture: TextureHandle,
        target: TextureTarget,
        image: &TextureImage<'_>,
        params: &SamplerParams,
    );

    fn bind(
        &self,
        device: &dyn GraphicsDevice,
        texture: TextureHandle,
        target: TextureTarget,
        unit: TextureUnit,
    );
}

/// Bind the texture to its target, then configure the bound object.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassicBinding;

impl TextureBackend for ClassicBinding {
    fn name(&self) -> &'static str {
        "bind-to-edit"
    }

    fn create(&self, device: &dyn GraphicsDevice, _target: TextureTarget) -> TextureHandle {
        device.gen_texture()
    }

    fn upload(
        &self,
        device: &dyn GraphicsDevice,
        texture: TextureHandle,
        target: TextureTarget,
        image: &TextureImage<'_>,
        params: &SamplerParams,
    ) {
        device.bind_texture(target, Some(texture));
        device.tex_image_2d(target, image);
        device.tex_parameters(target, params);
        device.bind_texture(target, None);
    }

    fn bind(
        &self,
        device: &dyn GraphicsDevice,
        texture: TextureHandle,
        target: TextureTarget,
        unit: TextureUnit,
    ) {
        device.active_texture(unit);
        device.bind_texture(target, Some(texture));
    }
}

/// Create and configure textures by handle, without touching bindings.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectStateAccess;

impl TextureBackend for DirectStateAccess {
    fn name(&self) -> &'static str {
        "direct-state-access"
    }

    fn create(&self, device: &dyn GraphicsDevice, target: TextureTarget) -> TextureHandle {
        device.create_texture(target)
    }

    fn upload(
        &self,
        device: &dyn GraphicsDevice,
        texture: TextureHandle,
        _target: TextureTarget,
        image: &TextureImage<'_>,
        params: &SamplerParams,
    ) {
        device.texture_storage_2d(texture, image.width, image.height, image.format);
        device.texture_sub_image_2d(texture, image);
        device.texture_parameters(texture, params);
    }

    fn bind(
        &self,
        device: &dyn GraphicsDevice,
        texture: TextureHandle,
        _target: TextureTarget,
        unit: TextureUnit,
    ) {
        device.bind_texture_unit(unit, texture);
    }
}

static CLASSIC: ClassicBinding = ClassicBinding;
static DIRECT: DirectStateAccess = DirectStateAccess;

/// Pick the strategy a device supports.
pub fn select(capabilities: &DeviceCapabilities) -> &'static dyn TextureBackend {
    if capabilities.direct_state_access {
        &DIRECT
    } else {
        &CLASSIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_follows_capabilities() {
        let mut caps = DeviceCapabilities::default();
        caps.direct_state_access = true;
        assert_eq!(select(&caps).name(), "direct-state-access");
        caps.direct_state_access = false;
        assert_eq!(select(&caps).name(), "bind-to-edit");
    }
}
