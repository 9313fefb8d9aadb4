//! Model loading: import, flatten, resolve materials, upload.

pub mod aggregate;
pub mod buffers;
pub mod materials;

use std::path::Path;

use asset::{ImportFlags, Scene, SceneImporter};
use corelib::Transform;
use glam::Mat4;

use crate::error::ModelError;
use crate::gpu::{BufferUsage, DrawElements, VertexArrayHandle};
use crate::texture::{Texture, TextureSubsystem};

pub use aggregate::{SceneSizing, SubMeshRange, VertexStreams};
pub use buffers::{BufferLayout, ModelBuffers};
pub use materials::{MaterialResolver, MaterialSlot};

/// A model file flattened into one vertex array, plus its material textures.
///
/// Every sub-mesh shares the same vertex and index buffers; [`SubMeshRange`]
/// records where each one starts.
pub struct ModelLoader {
    textures: TextureSubsystem,
    importer: Box<dyn SceneImporter>,
    layout: BufferLayout,
    world: Transform,
    meshes: Vec<SubMeshRange>,
    streams: VertexStreams,
    indices: Vec<u32>,
    materials: Vec<MaterialSlot>,
    vertex_array: Option<VertexArrayHandle>,
    buffers: Option<ModelBuffers>,
}

impl ModelLoader {
    pub fn new(textures: TextureSubsystem, importer: impl SceneImporter + 'static) -> Self {
        Self {
            textures,
            importer: Box::new(importer),
            layout: BufferLayout::default(),
            world: Transform::identity(),
            meshes: Vec::new(),
            streams: VertexStreams::new(),
            indices: Vec::new(),
            materials: Vec::new(),
            vertex_array: None,
            buffers: None,
        }
    }

    pub fn with_layout(mut self, layout: BufferLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Load `path`, replacing whatever was loaded before.
    ///
    /// Returns `false` if anything went wrong; details are logged. A texture
    /// that fails to load does not stop the geometry from being uploaded.
    ///
    /// The vertex array and buffers are created before the file is parsed. If
    /// the importer fails they stay allocated, empty, until the next call or
    /// until the loader is dropped.
    pub fn load_mesh(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.clear();

        let device = self.textures.device().clone();
        let vao = device.create_vertex_array();
        let buffers = ModelBuffers::allocate(&*device);
        self.vertex_array = Some(vao);
        self.buffers = Some(buffers);

        let scene = match self.importer.import(path, ImportFlags::default()) {
            Ok(scene) => scene,
            Err(err) => {
                log::error!("Error parsing '{}': {err}", path.display());
                return false;
            }
        };

        match self.init_from_scene(&scene, path, vao, buffers) {
            Ok(materials_loaded) => materials_loaded,
            Err(err) => {
                log::error!("Failed to load '{}': {err}", path.display());
                false
            }
        }
    }

    fn init_from_scene(
        &mut self,
        scene: &Scene,
        path: &Path,
        vao: VertexArrayHandle,
        buffers: ModelBuffers,
    ) -> Result<bool, ModelError> {
        aggregate::validate_triangulated(scene)?;
        let sizing = SceneSizing::compute(scene)?;
        aggregate::aggregate(scene, &sizing, &mut self.streams, &mut self.indices);
        self.meshes = sizing.ranges;

        let (materials, materials_loaded) = MaterialResolver::new(&self.textures).resolve(&scene.materials, path);
        self.materials = materials;

        let device = self.textures.device();
        buffers.populate(&**device, vao, &self.layout, &self.streams, &self.indices)?;
        if let Some(err) = device.take_error() {
            return Err(err.into());
        }

        log::info!(
            "Loaded '{}': {} meshes, {} vertices, {} indices, {} materials",
            path.display(),
            self.meshes.len(),
            self.streams.len(),
            self.indices.len(),
            self.materials.len()
        );
        Ok(materials_loaded)
    }

    /// Draw every sub-mesh once with its diffuse texture bound.
    ///
    /// Draws are issued to the device; a recording device such as
    /// [`WgpuDevice`](crate::WgpuDevice) keeps them until its owner drains
    /// them with `encode_draws` once per frame.
    pub fn render(&self) {
        self.draw_ranges(1);
    }

    /// Draw `wvp.len()` instances, each with its own WVP matrix and `world`.
    pub fn render_instanced(&self, wvp: &[Mat4], world: Mat4) {
        let (Some(vao), Some(buffers)) = (self.vertex_array, self.buffers) else {
            return;
        };
        let Ok(instances) = u32::try_from(wvp.len()) else {
            log::error!("too many instances: {}", wvp.len());
            return;
        };
        if instances == 0 {
            return;
        }

        let device = self.textures.device();
        let wvp_cols: Vec<[f32; 16]> = wvp.iter().map(Mat4::to_cols_array).collect();
        let world_cols = vec![world.to_cols_array(); wvp.len()];
        device.upload_vertex_attribute(
            vao,
            buffers.wvp,
            self.layout.wvp(),
            bytemuck::cast_slice(&wvp_cols),
            BufferUsage::Dynamic,
        );
        device.upload_vertex_attribute(
            vao,
            buffers.world,
            self.layout.world(),
            bytemuck::cast_slice(&world_cols),
            BufferUsage::Dynamic,
        );

        self.draw_ranges(instances);
    }

    fn draw_ranges(&self, instance_count: u32) {
        let Some(vao) = self.vertex_array else {
            return;
        };
        let device = self.textures.device();

        for range in &self.meshes {
            let Ok(base_vertex) = i32::try_from(range.base_vertex) else {
                log::error!("base vertex {} out of range", range.base_vertex);
                continue;
            };
            if let Some(texture) = self.diffuse(range) {
                texture.bind(self.layout.color_unit);
            }
            device.draw_elements(
                vao,
                &DrawElements {
                    index_count: range.index_count,
                    first_index: range.base_index,
                    base_vertex,
                    instance_count,
                },
            );
        }
    }

    fn diffuse(&self, range: &SubMeshRange) -> Option<&Texture> {
        range
            .material
            .and_then(|index| self.materials.get(index))
            .and_then(MaterialSlot::diffuse)
    }

    pub fn meshes(&self) -> &[SubMeshRange] {
        &self.meshes
    }

    pub fn streams(&self) -> &VertexStreams {
        &self.streams
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn materials(&self) -> &[MaterialSlot] {
        &self.materials
    }

    pub fn vertex_array(&self) -> Option<VertexArrayHandle> {
        self.vertex_array
    }

    pub fn buffers(&self) -> Option<&ModelBuffers> {
        self.buffers.as_ref()
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn world_transform(&self) -> &Transform {
        &self.world
    }

    pub fn world_transform_mut(&mut self) -> &mut Transform {
        &mut self.world
    }

    /// Release GPU objects, textures and CPU arrays.
    fn clear(&mut self) {
        self.materials.clear();

        let device = self.textures.device();
        if let Some(buffers) = self.buffers.take() {
            buffers.release(&**device);
        }
        if let Some(vao) = self.vertex_array.take() {
            device.delete_vertex_array(vao);
        }

        self.meshes.clear();
        self.streams.clear();
        self.indices.clear();
    }
}

impl Drop for ModelLoader {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DeviceCapabilities, GraphicsDevice, HeadlessDevice, StepMode, TextureUnit};
    use crate::GpuError;
    use asset::{Face, ImportError, SceneMaterial, SceneMesh};
    use std::fs;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn quad(material: Option<usize>, with_uv: bool) -> SceneMesh {
        SceneMesh {
            name: "quad".into(),
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            tex_coords: if with_uv {
                vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]
            } else {
                Vec::new()
            },
            faces: vec![Face::triangle(0, 1, 2), Face::triangle(0, 2, 3)],
            material,
        }
    }

    fn triangle() -> SceneMesh {
        SceneMesh {
            name: "tri".into(),
            positions: vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            tex_coords: Vec::new(),
            faces: vec![Face::triangle(0, 1, 2)],
            material: None,
        }
    }

    fn fixture_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("modelkit-loader-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(path: &Path) {
        image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 255, 255, 255]))
            .save(path)
            .unwrap();
    }

    fn loader_for(device: &Rc<HeadlessDevice>, scene: Scene) -> ModelLoader {
        let textures = TextureSubsystem::new(device.clone());
        ModelLoader::new(textures, move |_: &Path, _: ImportFlags| -> Result<Scene, ImportError> {
            Ok(scene.clone())
        })
    }

    fn textured_scene(texture: &str) -> Scene {
        Scene {
            meshes: vec![quad(Some(0), true), triangle()],
            materials: vec![SceneMaterial {
                name: "wood".into(),
                diffuse_texture: Some(texture.into()),
            }],
        }
    }

    #[test]
    fn load_uploads_streams_at_layout_locations() {
        let dir = fixture_dir("upload");
        write_png(&dir.join("wood.png"));
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(&device, textured_scene(".\\wood.png"));

        assert!(loader.load_mesh(dir.join("house.obj")));
        assert_eq!(loader.meshes().len(), 2);
        assert_eq!(loader.meshes()[1].base_vertex, 4);
        assert_eq!(loader.meshes()[1].base_index, 6);
        assert_eq!(loader.streams().len(), 7);
        assert_eq!(loader.indices(), &[0, 1, 2, 0, 2, 3, 0, 1, 2]);
        assert!(loader.materials()[0].diffuse().is_some());

        let vao = loader.vertex_array().unwrap();
        let buffers = *loader.buffers().unwrap();
        let layout = BufferLayout::default();
        let (buf, attr) = device.attribute(vao, layout.position_location).unwrap();
        assert_eq!(buf, buffers.position);
        assert_eq!(attr.step, StepMode::Vertex);
        assert_eq!(device.buffer_data(buffers.position).unwrap().len(), 7 * 12);
        assert_eq!(device.buffer_data(buffers.tex_coord).unwrap().len(), 7 * 8);
        assert_eq!(device.attribute(vao, layout.normal_location).unwrap().0, buffers.normal);
        assert_eq!(device.index_buffer(vao), Some(buffers.index));
        assert_eq!(device.buffer_usage(buffers.index), Some(BufferUsage::Static));
    }

    #[test]
    fn custom_layout_moves_attributes() {
        let device = Rc::new(HeadlessDevice::new());
        let layout = BufferLayout {
            position_location: 5,
            tex_coord_location: 6,
            normal_location: 4,
            ..BufferLayout::default()
        };
        let scene = Scene {
            meshes: vec![triangle()],
            materials: Vec::new(),
        };
        let mut loader = loader_for(&device, scene).with_layout(layout);
        assert!(loader.load_mesh("tri.obj"));

        let vao = loader.vertex_array().unwrap();
        assert_eq!(device.attribute(vao, 5).unwrap().0, loader.buffers().unwrap().position);
        assert_eq!(device.attribute(vao, 4).unwrap().0, loader.buffers().unwrap().normal);
        assert!(device.attribute(vao, 0).is_none());
    }

    #[test]
    fn reloading_does_not_leak() {
        let dir = fixture_dir("reload");
        write_png(&dir.join("wood.png"));
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(&device, textured_scene("wood.png"));

        assert!(loader.load_mesh(dir.join("house.obj")));
        let counts = (device.live_buffers(), device.live_vertex_arrays(), device.live_textures());
        assert!(loader.load_mesh(dir.join("house.obj")));
        assert_eq!(
            (device.live_buffers(), device.live_vertex_arrays(), device.live_textures()),
            counts
        );
        assert_eq!(counts, (6, 1, 1));
        assert_eq!(loader.streams().len(), 7);

        drop(loader);
        assert_eq!(device.live_buffers(), 0);
        assert_eq!(device.live_vertex_arrays(), 0);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn importer_failure_keeps_empty_objects_until_next_load() {
        let device = Rc::new(HeadlessDevice::new());
        let textures = TextureSubsystem::new(device.clone());
        let mut loader = ModelLoader::new(textures, |path: &Path, _: ImportFlags| -> Result<Scene, ImportError> {
            Err(ImportError::Empty(path.to_path_buf()))
        });

        assert!(!loader.load_mesh("broken.obj"));
        let vao = loader.vertex_array().unwrap();
        assert!(device.has_vertex_array(vao));
        assert_eq!(device.live_buffers(), 6);
        assert!(device.index_buffer(vao).is_none());
        assert!(loader.meshes().is_empty());

        assert!(!loader.load_mesh("broken.obj"));
        assert!(!device.has_vertex_array(vao));
        assert_eq!(device.live_vertex_arrays(), 1);
    }

    #[test]
    fn missing_texture_still_uploads_geometry() {
        let dir = fixture_dir("missing");
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(&device, textured_scene("absent.png"));

        assert!(!loader.load_mesh(dir.join("house.obj")));
        assert!(loader.materials()[0].is_empty());
        let vao = loader.vertex_array().unwrap();
        assert!(device.index_buffer(vao).is_some());
        assert_eq!(loader.streams().len(), 7);

        loader.render();
        let draws = device.draws();
        assert_eq!(draws.len(), 2);
        assert!(draws.iter().all(|d| d.textures.is_empty()));
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn non_triangular_faces_fail_before_upload() {
        let device = Rc::new(HeadlessDevice::new());
        let mut mesh = triangle();
        mesh.faces.push(Face::new(vec![0, 1, 2, 0]));
        let mut loader = loader_for(
            &device,
            Scene {
                meshes: vec![mesh],
                materials: Vec::new(),
            },
        );

        assert!(!loader.load_mesh("bad.obj"));
        assert!(loader.streams().is_empty());
        assert!(device.index_buffer(loader.vertex_array().unwrap()).is_none());
    }

    #[test]
    fn empty_geometry_is_not_uploaded() {
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(&device, Scene::default());
        assert!(!loader.load_mesh("empty.obj"));
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn pending_gpu_error_fails_the_load() {
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(
            &device,
            Scene {
                meshes: vec![triangle()],
                materials: Vec::new(),
            },
        );
        device.inject_error(GpuError::OutOfMemory);
        assert!(!loader.load_mesh("tri.obj"));
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn render_draws_each_range_with_its_texture() {
        let dir = fixture_dir("render");
        write_png(&dir.join("wood.png"));
        let device = Rc::new(HeadlessDevice::with_capabilities(DeviceCapabilities {
            direct_state_access: false,
            ..DeviceCapabilities::default()
        }));
        let mut loader = loader_for(&device, textured_scene("wood.png"));
        assert!(loader.load_mesh(dir.join("house.obj")));

        loader.render();
        let draws = device.draws();
        assert_eq!(draws.len(), 2);
        assert_eq!(
            draws[0].draw,
            DrawElements {
                index_count: 6,
                first_index: 0,
                base_vertex: 0,
                instance_count: 1
            }
        );
        assert_eq!(
            draws[1].draw,
            DrawElements {
                index_count: 3,
                first_index: 6,
                base_vertex: 4,
                instance_count: 1
            }
        );
        let wood = loader.materials()[0].diffuse().unwrap().handle().unwrap();
        assert!(draws[0].textures.contains(&(TextureUnit(0), wood)));
    }

    #[test]
    fn recorded_draws_accumulate_until_drained() {
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(
            &device,
            Scene {
                meshes: vec![triangle()],
                materials: Vec::new(),
            },
        );
        assert!(loader.load_mesh("tri.obj"));

        loader.render();
        loader.render();
        assert_eq!(device.draws().len(), 2);

        device.clear_draws();
        loader.render();
        assert_eq!(device.draws().len(), 1);
    }

    #[test]
    fn instanced_render_uploads_matrices() {
        let device = Rc::new(HeadlessDevice::new());
        let mut loader = loader_for(
            &device,
            Scene {
                meshes: vec![triangle()],
                materials: Vec::new(),
            },
        );
        assert!(loader.load_mesh("tri.obj"));

        let wvp = [Mat4::IDENTITY, Mat4::from_translation(corelib::vec3(1.0, 0.0, 0.0))];
        loader.world_transform_mut().set_position(corelib::vec3(0.0, 2.0, 0.0));
        let world = loader.world_transform().matrix();
        loader.render_instanced(&wvp, world);

        let buffers = *loader.buffers().unwrap();
        let vao = loader.vertex_array().unwrap();
        let (_, attr) = device.attribute(vao, 3).unwrap();
        assert_eq!(attr.step, StepMode::Instance);
        assert_eq!(device.buffer_data(buffers.wvp).unwrap().len(), 2 * 64);
        assert_eq!(device.buffer_data(buffers.world).unwrap().len(), 2 * 64);
        assert_eq!(device.buffer_usage(buffers.world), Some(BufferUsage::Dynamic));
        assert_eq!(device.draws()[0].draw.instance_count, 2);
        assert_eq!(device.take_error(), None);
    }
}
