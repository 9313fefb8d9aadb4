//! Flattening sub-meshes into shared vertex and index arrays.
//!
//! Indices stay local to their sub-mesh; a draw adds the owning range's
//! `base_vertex`. This keeps every sub-mesh addressable from one vertex array.

use asset::Scene;

use crate::error::GeometryError;

/// Where one sub-mesh lives inside the shared buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubMeshRange {
    pub index_count: u32,
    pub base_vertex: u32,
    pub base_index: u32,
    pub material: Option<usize>,
}

/// Positions, normals and texture coordinates indexed by one vertex id.
///
/// The three streams only grow together, so they always have equal length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexStreams {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    tex_coords: Vec<[f32; 2]>,
}

impl VertexStreams {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, position: [f32; 3], normal: [f32; 3], tex_coord: [f32; 2]) {
        self.positions.push(position);
        self.normals.push(normal);
        self.tex_coords.push(tex_coord);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.positions.reserve(additional);
        self.normals.reserve(additional);
        self.tex_coords.reserve(additional);
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.normals.clear();
        self.tex_coords.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn tex_coords(&self) -> &[[f32; 2]] {
        &self.tex_coords
    }
}

/// Reject any face that is not a triangle, before anything is copied.
pub fn validate_triangulated(scene: &Scene) -> Result<(), GeometryError> {
    for (mesh_index, mesh) in scene.meshes.iter().enumerate() {
        if let Some((face_index, face)) = mesh.faces.iter().enumerate().find(|(_, f)| !f.is_triangle()) {
            return Err(GeometryError::NonTriangularFace {
                mesh: mesh_index,
                face: face_index,
                index_count: face.indices.len(),
            });
        }
    }
    Ok(())
}

/// Ranges and totals computed before the copy pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneSizing {
    pub ranges: Vec<SubMeshRange>,
    pub total_vertices: u32,
    pub total_indices: u32,
}

impl SceneSizing {
    pub fn compute(scene: &Scene) -> Result<Self, GeometryError> {
        let mut ranges = Vec::with_capacity(scene.meshes.len());
        let mut total_vertices = 0u32;
        let mut total_indices = 0u32;

        for mesh in &scene.meshes {
            let index_count = mesh
                .faces
                .len()
                .checked_mul(3)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or(GeometryError::TooLarge("indices"))?;
            let vertex_count =
                u32::try_from(mesh.vertex_count()).map_err(|_| GeometryError::TooLarge("vertices"))?;

            ranges.push(SubMeshRange {
                index_count,
                base_vertex: total_vertices,
                base_index: total_indices,
                material: mesh.material,
            });

            total_vertices = total_vertices
                .checked_add(vertex_count)
                .ok_or(GeometryError::TooLarge("vertices"))?;
            total_indices = total_indices
                .checked_add(index_count)
                .ok_or(GeometryError::TooLarge("indices"))?;
        }

        Ok(Self {
            ranges,
            total_vertices,
            total_indices,
        })
    }
}

/// Append every sub-mesh's vertices and local indices in scene order.
///
/// Expects a scene that passed [`validate_triangulated`].
pub fn aggregate(scene: &Scene, sizing: &SceneSizing, streams: &mut VertexStreams, indices: &mut Vec<u32>) {
    streams.reserve(sizing.total_vertices as usize);
    indices.reserve(sizing.total_indices as usize);

    for mesh in &scene.meshes {
        let uvs = if mesh.has_tex_coords(0) {
            mesh.tex_coords.first().map(Vec::as_slice)
        } else {
            None
        };

        for (i, &position) in mesh.positions.iter().enumerate() {
            let normal = mesh.normals.get(i).copied().unwrap_or([0.0; 3]);
            let uv = uvs.and_then(|uvs| uvs.get(i)).copied().unwrap_or([0.0; 2]);
            streams.push(position, normal, uv);
        }

        for face in &mesh.faces {
            indices.extend_from_slice(&face.indices);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asset::{Face, SceneMesh};

    fn mesh(vertices: usize, faces: usize, uv: bool, material: Option<usize>) -> SceneMesh {
        let positions: Vec<[f32; 3]> = (0..vertices).map(|i| [i as f32, 0.0, 0.0]).collect();
        let tex_coords = if uv {
            vec![(0..vertices).map(|i| [i as f32 * 0.5, 1.0]).collect()]
        } else {
            Vec::new()
        };
        SceneMesh {
            name: String::new(),
            normals: vec![[0.0, 1.0, 0.0]; vertices],
            positions,
            tex_coords,
            faces: (0..faces).map(|_| Face::triangle(0, 1, 2)).collect(),
            material,
        }
    }

    fn scene(meshes: Vec<SceneMesh>) -> Scene {
        Scene {
            meshes,
            materials: Vec::new(),
        }
    }

    #[test]
    fn ranges_accumulate_in_scene_order() {
        let scene = scene(vec![mesh(4, 2, true, Some(1)), mesh(3, 1, false, None), mesh(5, 3, true, Some(0))]);
        let sizing = SceneSizing::compute(&scene).unwrap();

        assert_eq!(
            sizing.ranges,
            vec![
                SubMeshRange { index_count: 6, base_vertex: 0, base_index: 0, material: Some(1) },
                SubMeshRange { index_count: 3, base_vertex: 4, base_index: 6, material: None },
                SubMeshRange { index_count: 9, base_vertex: 7, base_index: 9, material: Some(0) },
            ]
        );
        assert_eq!(sizing.total_vertices, 12);
        assert_eq!(sizing.total_indices, 18);
    }

    #[test]
    fn copy_pass_fills_equal_length_streams() {
        let scene = scene(vec![mesh(4, 2, true, None), mesh(3, 1, false, None)]);
        let sizing = SceneSizing::compute(&scene).unwrap();
        let mut streams = VertexStreams::new();
        let mut indices = Vec::new();
        aggregate(&scene, &sizing, &mut streams, &mut indices);

        assert_eq!(streams.len(), sizing.total_vertices as usize);
        assert_eq!(streams.normals().len(), streams.len());
        assert_eq!(streams.tex_coords().len(), streams.len());
        assert_eq!(indices.len(), sizing.total_indices as usize);
        let sum: u32 = sizing.ranges.iter().map(|r| r.index_count).sum();
        assert_eq!(sum as usize, indices.len());

        assert_eq!(streams.tex_coords()[1], [0.5, 1.0]);
        assert!(streams.tex_coords()[4..].iter().all(|uv| *uv == [0.0, 0.0]));
        assert_eq!(streams.positions()[5], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn indices_stay_local_to_their_mesh() {
        let scene = scene(vec![mesh(3, 1, false, None), mesh(3, 1, false, None)]);
        let sizing = SceneSizing::compute(&scene).unwrap();
        let mut streams = VertexStreams::new();
        let mut indices = Vec::new();
        aggregate(&scene, &sizing, &mut streams, &mut indices);
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn missing_normals_are_zero() {
        let mut m = mesh(3, 1, false, None);
        m.normals.truncate(1);
        let scene = scene(vec![m]);
        let sizing = SceneSizing::compute(&scene).unwrap();
        let mut streams = VertexStreams::new();
        let mut indices = Vec::new();
        aggregate(&scene, &sizing, &mut streams, &mut indices);
        assert_eq!(streams.normals(), &[[0.0, 1.0, 0.0], [0.0; 3], [0.0; 3]]);
    }

    #[test]
    fn quads_fail_validation() {
        let mut bad = mesh(4, 1, false, None);
        bad.faces.push(Face::new(vec![0, 1, 2, 3]));
        let scene = scene(vec![mesh(3, 1, false, None), bad]);
        assert_eq!(
            validate_triangulated(&scene),
            Err(GeometryError::NonTriangularFace { mesh: 1, face: 1, index_count: 4 })
        );
    }

    #[test]
    fn empty_scene_has_no_ranges() {
        let sizing = SceneSizing::compute(&Scene::default()).unwrap();
        assert!(sizing.ranges.is_empty());
        assert_eq!(sizing.total_vertices, 0);
    }
}
