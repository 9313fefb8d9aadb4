//! Importer output: sub-meshes and materials in file order.

/// Polygon referencing vertices local to its [`SceneMesh`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Face {
    pub indices: Vec<u32>,
}

impl Face {
    pub fn new(indices: Vec<u32>) -> Self {
        Self { indices }
    }

    pub fn triangle(a: u32, b: u32, c: u32) -> Self {
        Self::new(vec![a, b, c])
    }

    #[inline]
    pub fn is_triangle(&self) -> bool {
        self.indices.len() == 3
    }
}

/// One contiguous part of a model with its own material and face list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneMesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    /// UV channels; channel 0 is the one used for diffuse sampling.
    pub tex_coords: Vec<Vec<[f32; 2]>>,
    pub faces: Vec<Face>,
    pub material: Option<usize>,
}

impl SceneMesh {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if the given UV channel exists and covers every vertex.
    pub fn has_tex_coords(&self, channel: usize) -> bool {
        self.tex_coords
            .get(channel)
            .is_some_and(|uvs| !uvs.is_empty() && uvs.len() >= self.positions.len())
    }
}

/// Material as stored in the source file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneMaterial {
    pub name: String,
    /// Diffuse texture path exactly as written in the file.
    pub diffuse_texture: Option<String>,
}

/// Everything an importer extracted from one model file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub meshes: Vec<SceneMesh>,
    pub materials: Vec<SceneMaterial>,
}
