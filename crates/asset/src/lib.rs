//! Asset loading/parsers (scenes, materials, images).
//! Importers produce a renderer-agnostic [`Scene`]; the renderer flattens it
//! into GPU buffers.

pub mod error;
pub mod importer;
pub mod mtl;
pub mod obj;
pub mod scene;
pub mod texture;

pub use error::{DecodeError, ImportError};
pub use importer::{ImportFlags, SceneImporter};
pub use obj::ObjImporter;
pub use scene::{Face, Scene, SceneMaterial, SceneMesh};
pub use texture::DecodedImage;
