//! Headless graphics device.
//!
//! Performs no GPU work but keeps every object and upload in memory so the
//! loader can run (and be inspected) without graphics hardware.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::error::GpuError;

use super::{
    BufferHandle, BufferUsage, DeviceCapabilities, DrawElements, GraphicsDevice, PixelFormat,
    SamplerParams, TextureHandle, TextureImage, TextureTarget, TextureUnit, VertexArrayHandle,
    VertexAttribute, validate_attribute_data, validate_image,
};

/// Which texture path created a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureApi {
    Classic,
    Direct,
}

/// Snapshot of one texture object.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureRecord {
    pub api: TextureApi,
    pub target: Option<TextureTarget>,
    pub width: u32,
    pub height: u32,
    pub format: Option<PixelFormat>,
    pub data: Vec<u8>,
    pub params: Option<SamplerParams>,
}

impl TextureRecord {
    fn new(api: TextureApi, target: Option<TextureTarget>) -> Self {
        Self {
            api,
            target,
            width: 0,
            height: 0,
            format: None,
            data: Vec::new(),
            params: None,
        }
    }
}

/// One recorded draw with the texture bindings in effect at the time.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub vao: VertexArrayHandle,
    pub draw: DrawElements,
    pub textures: Vec<(TextureUnit, TextureHandle)>,
}

#[derive(Default)]
struct BufferRecord {
    data: Vec<u8>,
    usage: Option<BufferUsage>,
}

#[derive(Default)]
struct VertexArrayRecord {
    attributes: BTreeMap<u32, (BufferHandle, VertexAttribute)>,
    index_buffer: Option<BufferHandle>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    buffers: HashMap<BufferHandle, BufferRecord>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArrayRecord>,
    textures: HashMap<TextureHandle, TextureRecord>,
    active_unit: TextureUnit,
    units: BTreeMap<TextureUnit, TextureHandle>,
    draws: Vec<DrawRecord>,
    error: Option<GpuError>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record_error(&mut self, err: GpuError) {
        log::trace!("HeadlessDevice: {err}");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Texture bound on the active unit, checked against `target`.
    fn bound_texture(&mut self, target: TextureTarget) -> Option<TextureHandle> {
        let Some(&handle) = self.units.get(&self.active_unit) else {
            self.record_error(GpuError::InvalidOperation(format!(
                "no texture bound on unit {}",
                self.active_unit.0
            )));
            return None;
        };
        match self.textures.get(&handle).and_then(|t| t.target) {
            Some(bound) if bound == target => Some(handle),
            _ => {
                self.record_error(GpuError::InvalidOperation(format!(
                    "texture bound on unit {} is not a {target:?} texture",
                    self.active_unit.0
                )));
                None
            }
        }
    }
}

/// Recording device with configurable capabilities.
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    state: RefCell<State>,
}

impl HeadlessDevice {
    /// Headless device that advertises direct-state-access.
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities::default())
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        log::debug!("HeadlessDevice: created with {:?}", capabilities);
        Self {
            capabilities,
            state: RefCell::new(State::default()),
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.state.borrow().vertex_arrays.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn has_buffer(&self, buffer: BufferHandle) -> bool {
        self.state.borrow().buffers.contains_key(&buffer)
    }

    pub fn has_vertex_array(&self, vao: VertexArrayHandle) -> bool {
        self.state.borrow().vertex_arrays.contains_key(&vao)
    }

    /// Bytes last uploaded to `buffer`.
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.data.clone())
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.state.borrow().buffers.get(&buffer).and_then(|b| b.usage)
    }

    /// Buffer and layout attached to `vao` at `location`.
    pub fn attribute(
        &self,
        vao: VertexArrayHandle,
        location: u32,
    ) -> Option<(BufferHandle, VertexAttribute)> {
        let state = self.state.borrow();
        state.vertex_arrays.get(&vao)?.attributes.get(&location).copied()
    }

    pub fn index_buffer(&self, vao: VertexArrayHandle) -> Option<BufferHandle> {
        self.state.borrow().vertex_arrays.get(&vao)?.index_buffer
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<TextureRecord> {
        self.state.borrow().textures.get(&texture).cloned()
    }

    /// Texture currently bound on `unit`, by either path.
    pub fn bound_texture(&self, unit: TextureUnit) -> Option<TextureHandle> {
        self.state.borrow().units.get(&unit).copied()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn clear_draws(&self) {
        self.state.borrow_mut().draws.clear();
    }

    /// Make the next [`take_error`](GraphicsDevice::take_error) report `err`.
    pub fn inject_error(&self, err: GpuError) {
        self.state.borrow_mut().record_error(err);
    }

    fn store_pixels(state: &mut State, handle: TextureHandle, image: &TextureImage<'_>) {
        if let Some(record) = state.textures.get_mut(&handle) {
            record.width = image.width;
            record.height = image.height;
            record.format = Some(image.format);
            record.data = image.data.to_vec();
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_vertex_array(&self) -> VertexArrayHandle {
        let mut state = self.state.borrow_mut();
        let handle = VertexArrayHandle(state.next_id());
        state.vertex_arrays.insert(handle, VertexArrayRecord::default());
        handle
    }

    fn delete_vertex_array(&self, vao: VertexArrayHandle) {
        self.state.borrow_mut().vertex_arrays.remove(&vao);
    }

    fn create_buffer(&self) -> BufferHandle {
        let mut state = self.state.borrow_mut();
        let handle = BufferHandle(state.next_id());
        state.buffers.insert(handle, BufferRecord::default());
        handle
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        self.state.borrow_mut().buffers.remove(&buffer);
    }

    fn upload_vertex_attribute(
        &self,
        vao: VertexArrayHandle,
        buffer: BufferHandle,
        attribute: VertexAttribute,
        data: &[u8],
        usage: BufferUsage,
    ) {
        let mut state = self.state.borrow_mut();
        if let Err(err) = validate_attribute_data(&attribute, data) {
            state.record_error(err);
            return;
        }
        if !state.vertex_arrays.contains_key(&vao) || !state.buffers.contains_key(&buffer) {
            state.record_error(GpuError::InvalidOperation(format!(
                "vertex upload to unknown {vao:?} / {buffer:?}"
            )));
            return;
        }
        if let Some(record) = state.buffers.get_mut(&buffer) {
            record.data = data.to_vec();
            record.usage = Some(usage);
        }
        if let Some(array) = state.vertex_arrays.get_mut(&vao) {
            array.attributes.insert(attribute.location, (buffer, attribute));
        }
    }

    fn upload_index_buffer(&self, vao: VertexArrayHandle, buffer: BufferHandle, indices: &[u32]) {
        let mut state = self.state.borrow_mut();
        if indices.is_empty() {
            state.record_error(GpuError::InvalidValue("empty index buffer".into()));
            return;
        }
        if !state.vertex_arrays.contains_key(&vao) || !state.buffers.contains_key(&buffer) {
            state.record_error(GpuError::InvalidOperation(format!(
                "index upload to unknown {vao:?} / {buffer:?}"
            )));
            return;
        }
        if let Some(record) = state.buffers.get_mut(&buffer) {
            record.data = bytemuck::cast_slice(indices).to_vec();
            record.usage = Some(BufferUsage::Static);
        }
        if let Some(array) = state.vertex_arrays.get_mut(&vao) {
            array.index_buffer = Some(buffer);
        }
    }

    fn gen_texture(&self) -> TextureHandle {
        let mut state = self.state.borrow_mut();
        let handle = TextureHandle(state.next_id());
        state
            .textures
            .insert(handle, TextureRecord::new(TextureApi::Classic, None));
        handle
    }

    fn bind_texture(&self, target: TextureTarget, texture: Option<TextureHandle>) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let unit = state.active_unit;
        let Some(handle) = texture else {
            state.units.remove(&unit);
            return;
        };
        match state.textures.get_mut(&handle) {
            Some(record) if record.target.is_none() || record.target == Some(target) => {
                record.target = Some(target);
                state.units.insert(unit, handle);
            }
            Some(_) => state.record_error(GpuError::InvalidOperation(format!(
                "{handle:?} bound to a different target"
            ))),
            None => state.record_error(GpuError::InvalidOperation(format!("bind of unknown {handle:?}"))),
        }
    }

    fn tex_image_2d(&self, target: TextureTarget, image: &TextureImage<'_>) {
        let mut state = self.state.borrow_mut();
        let Some(handle) = state.bound_texture(target) else {
            return;
        };
        if let Err(err) = validate_image(image, &self.capabilities) {
            state.record_error(err);
            return;
        }
        Self::store_pixels(&mut state, handle, image);
    }

    fn tex_parameters(&self, target: TextureTarget, params: &SamplerParams) {
        let mut state = self.state.borrow_mut();
        let Some(handle) = state.bound_texture(target) else {
            return;
        };
        if let Some(record) = state.textures.get_mut(&handle) {
            record.params = Some(*params);
        }
    }

    fn active_texture(&self, unit: TextureUnit) {
        self.state.borrow_mut().active_unit = unit;
    }

    fn create_texture(&self, target: TextureTarget) -> TextureHandle {
        let mut state = self.state.borrow_mut();
        let handle = TextureHandle(state.next_id());
        state
            .textures
            .insert(handle, TextureRecord::new(TextureApi::Direct, Some(target)));
        handle
    }

    fn texture_storage_2d(&self, texture: TextureHandle, width: u32, height: u32, format: PixelFormat) {
        let mut state = self.state.borrow_mut();
        let max = self.capabilities.max_texture_dimension;
        let err = match state.textures.get_mut(&texture) {
            None => Some(GpuError::InvalidOperation(format!("storage for unknown {texture:?}"))),
            Some(record) if record.format.is_some() => Some(GpuError::InvalidOperation(format!(
                "{texture:?} already has immutable storage"
            ))),
            Some(_) if width == 0 || height == 0 || width > max || height > max => Some(
                GpuError::InvalidValue(format!("texture size {width}x{height} outside 1..={max}")),
            ),
            Some(record) => {
                record.width = width;
                record.height = height;
                record.format = Some(format);
                None
            }
        };
        if let Some(err) = err {
            state.record_error(err);
        }
    }

    fn texture_sub_image_2d(&self, texture: TextureHandle, image: &TextureImage<'_>) {
        let mut state = self.state.borrow_mut();
        let matches_storage = match state.textures.get(&texture) {
            Some(record) => {
                record.format == Some(image.format)
                    && record.width == image.width
                    && record.height == image.height
            }
            None => {
                state.record_error(GpuError::InvalidOperation(format!("upload to unknown {texture:?}")));
                return;
            }
        };
        if !matches_storage {
            state.record_error(GpuError::InvalidOperation(format!(
                "upload does not match the storage of {texture:?}"
            )));
            return;
        }
        if let Err(err) = validate_image(image, &self.capabilities) {
            state.record_error(err);
            return;
        }
        Self::store_pixels(&mut state, texture, image);
    }

    fn texture_parameters(&self, texture: TextureHandle, params: &SamplerParams) {
        let mut state = self.state.borrow_mut();
        match state.textures.get_mut(&texture) {
            Some(record) => record.params = Some(*params),
            None => state.record_error(GpuError::InvalidOperation(format!(
                "parameters for unknown {texture:?}"
            ))),
        }
    }

    fn bind_texture_unit(&self, unit: TextureUnit, texture: TextureHandle) {
        let mut state = self.state.borrow_mut();
        if state.textures.contains_key(&texture) {
            state.units.insert(unit, texture);
        } else {
            state.record_error(GpuError::InvalidOperation(format!("bind of unknown {texture:?}")));
        }
    }

    fn delete_texture(&self, texture: TextureHandle) {
        let mut state = self.state.borrow_mut();
        if state.textures.remove(&texture).is_some() {
            state.units.retain(|_, bound| *bound != texture);
        }
    }

    fn draw_elements(&self, vao: VertexArrayHandle, draw: &DrawElements) {
        let mut state = self.state.borrow_mut();
        let has_indices = state
            .vertex_arrays
            .get(&vao)
            .is_some_and(|array| array.index_buffer.is_some());
        if !has_indices {
            state.record_error(GpuError::InvalidOperation(format!(
                "draw with {vao:?} that has no index buffer"
            )));
            return;
        }
        let textures = state.units.iter().map(|(&unit, &tex)| (unit, tex)).collect();
        state.draws.push(DrawRecord {
            vao,
            draw: *draw,
            textures,
        });
    }

    fn take_error(&self) -> Option<GpuError> {
        self.state.borrow_mut().error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::AttributeFormat;

    fn image(data: &[u8]) -> TextureImage<'_> {
        TextureImage {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8,
            data,
        }
    }

    #[test]
    fn classic_upload_needs_a_bound_texture() {
        let device = HeadlessDevice::new();
        device.tex_image_2d(TextureTarget::D2, &image(&[1, 2, 3, 4]));
        assert!(matches!(device.take_error(), Some(GpuError::InvalidOperation(_))));
        assert_eq!(device.take_error(), None);

        let tex = device.gen_texture();
        device.bind_texture(TextureTarget::D2, Some(tex));
        device.tex_image_2d(TextureTarget::D2, &image(&[1, 2, 3, 4]));
        assert_eq!(device.take_error(), None);
        let record = device.texture(tex).unwrap();
        assert_eq!(record.api, TextureApi::Classic);
        assert_eq!(record.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn direct_storage_is_immutable() {
        let device = HeadlessDevice::new();
        let tex = device.create_texture(TextureTarget::D2);
        device.texture_storage_2d(tex, 1, 1, PixelFormat::Rgba8);
        device.texture_sub_image_2d(tex, &image(&[9, 9, 9, 9]));
        assert_eq!(device.take_error(), None);

        device.texture_storage_2d(tex, 2, 2, PixelFormat::Rgba8);
        assert!(device.take_error().is_some());
        assert_eq!(device.texture(tex).unwrap().width, 1);
    }

    #[test]
    fn first_error_is_sticky() {
        let device = HeadlessDevice::new();
        device.inject_error(GpuError::OutOfMemory);
        device.bind_texture_unit(TextureUnit(0), TextureHandle(999));
        assert_eq!(device.take_error(), Some(GpuError::OutOfMemory));
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn deleting_a_texture_unbinds_it() {
        let device = HeadlessDevice::new();
        let tex = device.create_texture(TextureTarget::D2);
        device.bind_texture_unit(TextureUnit(3), tex);
        assert_eq!(device.bound_texture(TextureUnit(3)), Some(tex));
        device.delete_texture(tex);
        assert_eq!(device.bound_texture(TextureUnit(3)), None);
        assert_eq!(device.live_textures(), 0);
        // unknown handles are ignored
        device.delete_texture(tex);
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn draw_requires_index_buffer() {
        let device = HeadlessDevice::new();
        let vao = device.create_vertex_array();
        let draw = DrawElements {
            index_count: 3,
            first_index: 0,
            base_vertex: 0,
            instance_count: 1,
        };
        device.draw_elements(vao, &draw);
        assert!(device.take_error().is_some());

        let vb = device.create_buffer();
        let ib = device.create_buffer();
        let positions = [[0.0f32; 3]; 3];
        device.upload_vertex_attribute(
            vao,
            vb,
            VertexAttribute::per_vertex(0, AttributeFormat::Float32x3),
            bytemuck::cast_slice(&positions),
            BufferUsage::Static,
        );
        device.upload_index_buffer(vao, ib, &[0, 1, 2]);
        device.draw_elements(vao, &draw);
        assert_eq!(device.take_error(), None);
        assert_eq!(device.draws().len(), 1);
        assert_eq!(device.index_buffer(vao), Some(ib));
        assert_eq!(device.buffer_data(vb).unwrap().len(), 36);
    }
}
