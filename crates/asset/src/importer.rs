//! Importer seam: anything that turns a model file into a [`Scene`].

use std::path::Path;

use crate::{error::ImportError, scene::Scene};

/// Post-processing steps an importer applies before handing out a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImportFlags {
    /// Split every polygon into triangles.
    pub triangulate: bool,
    /// Compute normals for vertices that have none.
    pub generate_normals: bool,
    /// Share one vertex between faces referencing identical attributes.
    pub join_identical_vertices: bool,
    /// Flip the V texture coordinate (`v' = 1 - v`).
    pub flip_uvs: bool,
}

impl Default for ImportFlags {
    /// Configuration used by the model loader: all steps enabled.
    fn default() -> Self {
        Self {
            triangulate: true,
            generate_normals: true,
            join_identical_vertices: true,
            flip_uvs: true,
        }
    }
}

impl ImportFlags {
    /// No post-processing at all; faces are reported exactly as written.
    pub const RAW: Self = Self {
        triangulate: false,
        generate_normals: false,
        join_identical_vertices: false,
        flip_uvs: false,
    };
}

/// Parses a model file into a [`Scene`].
///
/// The returned error's `Display` is the diagnostic logged by callers.
pub trait SceneImporter {
    fn import(&self, path: &Path, flags: ImportFlags) -> Result<Scene, ImportError>;
}

impl<F> SceneImporter for F
where
    F: Fn(&Path, ImportFlags) -> Result<Scene, ImportError>,
{
    fn import(&self, path: &Path, flags: ImportFlags) -> Result<Scene, ImportError> {
        self(path, flags)
    }
}
