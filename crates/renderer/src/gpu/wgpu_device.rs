//! wgpu implementation of [`GraphicsDevice`].
//! wgpu = 23.x
//!
//! Bind-to-edit uploads go through a row-aligned staging buffer copied by a
//! command encoder; direct uploads use `Queue::write_texture`. Draws are
//! recorded and replayed into the frame's render pass by [`WgpuDevice::encode_draws`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::error::GpuError;

use super::{
    BufferHandle, BufferUsage, DeviceCapabilities, DrawElements, Filter, GraphicsDevice,
    PixelFormat, SamplerParams, TextureHandle, TextureImage, TextureTarget, TextureUnit,
    VertexArrayHandle, VertexAttribute, Wrap, validate_attribute_data, validate_image,
};

/// A recorded draw and the texture bindings in effect when it was issued.
#[derive(Clone, Debug)]
pub struct RecordedDraw {
    pub vao: VertexArrayHandle,
    pub draw: DrawElements,
    pub textures: Vec<(TextureUnit, TextureHandle)>,
}

#[derive(Default)]
struct TextureSlot {
    target: Option<TextureTarget>,
    format: Option<PixelFormat>,
    width: u32,
    height: u32,
    texture: Option<wgpu::Texture>,
    sampler: Option<Rc<wgpu::Sampler>>,
}

#[derive(Default)]
struct VertexArraySlot {
    attributes: BTreeMap<u32, (BufferHandle, VertexAttribute)>,
    index_buffer: Option<BufferHandle>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    buffers: HashMap<BufferHandle, Option<wgpu::Buffer>>,
    vertex_arrays: HashMap<VertexArrayHandle, VertexArraySlot>,
    textures: HashMap<TextureHandle, TextureSlot>,
    active_unit: TextureUnit,
    units: BTreeMap<TextureUnit, TextureHandle>,
    draws: Vec<RecordedDraw>,
    error: Option<GpuError>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record_error(&mut self, err: GpuError) {
        log::debug!("WgpuDevice: {err}");
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

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

/// Graphics device backed by a wgpu device and queue.
///
/// `draw_elements` only records; recorded draws accumulate until the frame
/// owner drains them with [`WgpuDevice::encode_draws`].
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: DeviceCapabilities,
    float32_filterable: bool,
    /// Validation errors raised asynchronously by wgpu.
    captured: Arc<Mutex<Option<GpuError>>>,
    state: RefCell<State>,
}

impl WgpuDevice {
    /// Request a headless adapter/device on the given backends.
    pub async fn request(backends: wgpu::Backends) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| GpuError::Unavailable("no suitable GPU adapter".into()))?;

        let capabilities = detect_capabilities(&adapter);
        let info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("modelkit device"),
                    required_features: adapter.features() & wgpu::Features::FLOAT32_FILTERABLE,
                    required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| GpuError::Unavailable(e.to_string()))?;

        log::info!(
            "GPU adapter: {} ({:?}), direct_state_access={}",
            info.name,
            info.backend,
            capabilities.direct_state_access
        );

        Ok(Self::new(device, queue, capabilities))
    }

    /// Wrap an existing device/queue pair.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, capabilities: DeviceCapabilities) -> Self {
        let captured: Arc<Mutex<Option<GpuError>>> = Arc::default();
        let sink = Arc::clone(&captured);
        device.on_uncaptured_error(Box::new(move |err: wgpu::Error| {
            let err = match err {
                wgpu::Error::OutOfMemory { .. } => GpuError::OutOfMemory,
                other => GpuError::Validation(other.to_string()),
            };
            let mut slot = sink.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }));

        let float32_filterable = device.features().contains(wgpu::Features::FLOAT32_FILTERABLE);
        Self {
            device,
            queue,
            capabilities,
            float32_filterable,
            captured,
            state: RefCell::new(State::default()),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Default view of an uploaded texture, for building bind groups.
    pub fn texture_view(&self, texture: TextureHandle) -> Option<wgpu::TextureView> {
        let state = self.state.borrow();
        let slot = state.textures.get(&texture)?;
        slot.texture
            .as_ref()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()))
    }

    pub fn texture_sampler(&self, texture: TextureHandle) -> Option<Rc<wgpu::Sampler>> {
        self.state.borrow().textures.get(&texture)?.sampler.clone()
    }

    /// Replay and clear the recorded draws into `pass`. Each vertex-array attribute is bound
    /// to its own vertex-buffer slot, in ascending location order; the caller
    /// sets a pipeline declaring the same layout, plus texture bind groups.
    pub fn encode_draws(&self, pass: &mut wgpu::RenderPass<'_>) -> Vec<RecordedDraw> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let draws = std::mem::take(&mut state.draws);

        for recorded in &draws {
            let Some(array) = state.vertex_arrays.get(&recorded.vao) else {
                continue;
            };
            let Some(Some(index)) = array.index_buffer.and_then(|ib| state.buffers.get(&ib)) else {
                continue;
            };
            for (slot, (buffer, _)) in array.attributes.values().enumerate() {
                if let Some(Some(buffer)) = state.buffers.get(buffer) {
                    pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                }
            }
            pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);

            let draw = recorded.draw;
            pass.draw_indexed(
                draw.first_index..draw.first_index + draw.index_count,
                draw.base_vertex,
                0..draw.instance_count,
            );
        }
        draws
    }

    fn create_sampler(
        &self,
        params: &SamplerParams,
        format: Option<PixelFormat>,
    ) -> Rc<wgpu::Sampler> {
        let params = sampler_params_for(params, format, self.float32_filterable);
        let address = match params.wrap {
            Wrap::Repeat => wgpu::AddressMode::Repeat,
            Wrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        };
        let filter = |f: Filter| match f {
            Filter::Nearest => wgpu::FilterMode::Nearest,
            Filter::Linear => wgpu::FilterMode::Linear,
        };
        Rc::new(self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texture sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter(params.mag_filter),
            min_filter: filter(params.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        }))
    }

    fn create_gpu_texture(&self, width: u32, height: u32, format: PixelFormat) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("model texture"),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        })
    }

    /// Copy through a staging buffer whose rows are padded to the copy alignment.
    fn upload_staged(&self, texture: &wgpu::Texture, image: &TextureImage<'_>) {
        let (pixels, texel_size) = texel_data(image);
        let unpadded = (image.width * texel_size) as usize;
        let padded = padded_bytes_per_row(unpadded);
        let staging_bytes = pad_rows(&pixels, unpadded, padded);

        let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("texture staging"),
            contents: &staging_bytes,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("texture upload"),
            });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(image.height),
                },
            },
            texture.as_image_copy(),
            extent(image.width, image.height),
        );
        self.queue.submit(Some(encoder.finish()));
    }

    fn upload_direct(&self, texture: &wgpu::Texture, image: &TextureImage<'_>) {
        let (pixels, texel_size) = texel_data(image);
        self.queue.write_texture(
            texture.as_image_copy(),
            &pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.width * texel_size),
                rows_per_image: Some(image.height),
            },
            extent(image.width, image.height),
        );
    }

    fn create_buffer_with(&self, label: &str, contents: &[u8], usage: wgpu::BufferUsages) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        })
    }
}

/// Direct-state-access when the adapter is fully WebGPU compliant; the GL
/// backend always goes through the bind-to-edit path.
fn detect_capabilities(adapter: &wgpu::Adapter) -> DeviceCapabilities {
    let downlevel = adapter.get_downlevel_capabilities();
    let backend = adapter.get_info().backend;
    DeviceCapabilities {
        direct_state_access: downlevel.is_webgpu_compliant() && backend != wgpu::Backend::Gl,
        max_texture_dimension: adapter.limits().max_texture_dimension_2d,
    }
}

/// Row pitch rounded up to the buffer-to-texture copy alignment.
fn padded_bytes_per_row(unpadded: usize) -> usize {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    unpadded.div_ceil(align) * align
}

/// Copy tightly packed rows into rows of `padded` bytes, zero-filling the tail.
fn pad_rows(pixels: &[u8], unpadded: usize, padded: usize) -> Vec<u8> {
    if unpadded == 0 {
        return Vec::new();
    }
    let rows = pixels.len() / unpadded;
    let mut out = vec![0u8; padded * rows];
    for (dst, src) in out.chunks_exact_mut(padded).zip(pixels.chunks_exact(unpadded)) {
        dst[..unpadded].copy_from_slice(src);
    }
    out
}

/// Float textures are only filterable with `FLOAT32_FILTERABLE`.
fn sampler_params_for(
    params: &SamplerParams,
    format: Option<PixelFormat>,
    float32_filterable: bool,
) -> SamplerParams {
    if format == Some(PixelFormat::Rgba32Float) && !float32_filterable {
        SamplerParams {
            min_filter: Filter::Nearest,
            mag_filter: Filter::Nearest,
            ..*params
        }
    } else {
        *params
    }
}

/// First error since the last call; a device error raised by wgpu waits for
/// the next call when a local one is already pending.
fn take_first_error(
    local: &mut Option<GpuError>,
    captured: &mut Option<GpuError>,
) -> Option<GpuError> {
    local.take().or_else(|| captured.take())
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Rg8 => wgpu::TextureFormat::Rg8Unorm,
        // wgpu has no 3-channel format; RGB is expanded on upload.
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

/// Pixel bytes in the layout of [`texture_format`] and their texel size.
fn texel_data(image: &TextureImage<'_>) -> (Vec<u8>, u32) {
    match image.format {
        PixelFormat::Rgb8 => {
            let mut rgba = Vec::with_capacity(image.data.len() / 3 * 4);
            for rgb in image.data.chunks_exact(3) {
                rgba.extend_from_slice(rgb);
                rgba.push(255);
            }
            (rgba, 4)
        }
        other => (image.data.to_vec(), other.bytes_per_pixel()),
    }
}

impl GraphicsDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_vertex_array(&self) -> VertexArrayHandle {
        let mut state = self.state.borrow_mut();
        let handle = VertexArrayHandle(state.next_id());
        state.vertex_arrays.insert(handle, VertexArraySlot::default());
        handle
    }

    fn delete_vertex_array(&self, vao: VertexArrayHandle) {
        self.state.borrow_mut().vertex_arrays.remove(&vao);
    }

    fn create_buffer(&self) -> BufferHandle {
        let mut state = self.state.borrow_mut();
        let handle = BufferHandle(state.next_id());
        state.buffers.insert(handle, None);
        handle
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        if let Some(Some(buffer)) = self.state.borrow_mut().buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn upload_vertex_attribute(
        &self,
        vao: VertexArrayHandle,
        buffer: BufferHandle,
        attribute: VertexAttribute,
        data: &[u8],
        usage: BufferUsage,
    ) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
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
        let Some(slot) = state.buffers.get_mut(&buffer) else {
            return;
        };

        let wgpu_usage = match usage {
            BufferUsage::Static => wgpu::BufferUsages::VERTEX,
            BufferUsage::Dynamic => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        };
        match slot.as_ref() {
            // Same-size dynamic rewrite keeps the buffer.
            Some(existing)
                if usage == BufferUsage::Dynamic
                    && existing.usage().contains(wgpu::BufferUsages::COPY_DST)
                    && existing.size() == data.len() as u64 =>
            {
                self.queue.write_buffer(existing, 0, data);
            }
            _ => {
                let created = self.create_buffer_with("vertex attribute", data, wgpu_usage);
                if let Some(old) = slot.replace(created) {
                    old.destroy();
                }
            }
        }
        if let Some(array) = state.vertex_arrays.get_mut(&vao) {
            array.attributes.insert(attribute.location, (buffer, attribute));
        }
    }

    fn upload_index_buffer(&self, vao: VertexArrayHandle, buffer: BufferHandle, indices: &[u32]) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
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
        let created = self.create_buffer_with(
            "index buffer",
            bytemuck::cast_slice(indices),
            wgpu::BufferUsages::INDEX,
        );
        if let Some(Some(old)) = state.buffers.insert(buffer, Some(created)) {
            old.destroy();
        }
        if let Some(array) = state.vertex_arrays.get_mut(&vao) {
            array.index_buffer = Some(buffer);
        }
    }

    fn gen_texture(&self) -> TextureHandle {
        let mut state = self.state.borrow_mut();
        let handle = TextureHandle(state.next_id());
        state.textures.insert(handle, TextureSlot::default());
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
            Some(slot) if slot.target.is_none() || slot.target == Some(target) => {
                slot.target = Some(target);
                state.units.insert(unit, handle);
            }
            Some(_) => state.record_error(GpuError::InvalidOperation(format!(
                "{handle:?} bound to a different target"
            ))),
            None => state.record_error(GpuError::InvalidOperation(format!("bind of unknown {handle:?}"))),
        }
    }

    fn tex_image_2d(&self, target: TextureTarget, image: &TextureImage<'_>) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(handle) = state.bound_texture(target) else {
            return;
        };
        if let Err(err) = validate_image(image, &self.capabilities) {
            state.record_error(err);
            return;
        }
        let texture = self.create_gpu_texture(image.width, image.height, image.format);
        self.upload_staged(&texture, image);
        if let Some(slot) = state.textures.get_mut(&handle) {
            if let Some(old) = slot.texture.replace(texture) {
                old.destroy();
            }
            slot.format = Some(image.format);
            slot.width = image.width;
            slot.height = image.height;
        }
    }

    fn tex_parameters(&self, target: TextureTarget, params: &SamplerParams) {
        let mut state = self.state.borrow_mut();
        let Some(handle) = state.bound_texture(target) else {
            return;
        };
        let format = state.textures.get(&handle).and_then(|slot| slot.format);
        let sampler = self.create_sampler(params, format);
        if let Some(slot) = state.textures.get_mut(&handle) {
            slot.sampler = Some(sampler);
        }
    }

    fn active_texture(&self, unit: TextureUnit) {
        self.state.borrow_mut().active_unit = unit;
    }

    fn create_texture(&self, target: TextureTarget) -> TextureHandle {
        let mut state = self.state.borrow_mut();
        let handle = TextureHandle(state.next_id());
        state.textures.insert(
            handle,
            TextureSlot {
                target: Some(target),
                ..Default::default()
            },
        );
        handle
    }

    fn texture_storage_2d(&self, texture: TextureHandle, width: u32, height: u32, format: PixelFormat) {
        let mut state = self.state.borrow_mut();
        let max = self.capabilities.max_texture_dimension;
        let err = match state.textures.get_mut(&texture) {
            None => Some(GpuError::InvalidOperation(format!("storage for unknown {texture:?}"))),
            Some(slot) if slot.texture.is_some() => Some(GpuError::InvalidOperation(format!(
                "{texture:?} already has immutable storage"
            ))),
            Some(_) if width == 0 || height == 0 || width > max || height > max => Some(
                GpuError::InvalidValue(format!("texture size {width}x{height} outside 1..={max}")),
            ),
            Some(slot) => {
                slot.texture = Some(self.create_gpu_texture(width, height, format));
                slot.format = Some(format);
                slot.width = width;
                slot.height = height;
                None
            }
        };
        if let Some(err) = err {
            state.record_error(err);
        }
    }

    fn texture_sub_image_2d(&self, texture: TextureHandle, image: &TextureImage<'_>) {
        let mut state = self.state.borrow_mut();
        if let Err(err) = validate_image(image, &self.capabilities) {
            state.record_error(err);
            return;
        }
        let uploaded = match state.textures.get(&texture) {
            Some(slot)
                if slot.format == Some(image.format)
                    && slot.width == image.width
                    && slot.height == image.height =>
            {
                match slot.texture.as_ref() {
                    Some(gpu_texture) => {
                        self.upload_direct(gpu_texture, image);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        if !uploaded {
            state.record_error(GpuError::InvalidOperation(format!(
                "upload does not match the storage of {texture:?}"
            )));
        }
    }

    fn texture_parameters(&self, texture: TextureHandle, params: &SamplerParams) {
        let mut state = self.state.borrow_mut();
        if !state.textures.contains_key(&texture) {
            state.record_error(GpuError::InvalidOperation(format!(
                "parameters for unknown {texture:?}"
            )));
            return;
        }
        let format = state.textures.get(&texture).and_then(|slot| slot.format);
        let sampler = self.create_sampler(params, format);
        if let Some(slot) = state.textures.get_mut(&texture) {
            slot.sampler = Some(sampler);
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
        if let Some(slot) = state.textures.remove(&texture) {
            if let Some(gpu_texture) = slot.texture {
                gpu_texture.destroy();
            }
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
        state.draws.push(RecordedDraw {
            vao,
            draw: *draw,
            textures,
        });
    }

    fn take_error(&self) -> Option<GpuError> {
        // Flush queued uploads so their validation errors are reported now.
        let _ = self.device.poll(wgpu::Maintain::Wait);
        let mut captured = self.captured.lock();
        take_first_error(&mut self.state.borrow_mut().error, &mut captured)
    }
}
