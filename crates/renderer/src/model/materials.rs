//! Diffuse texture lookup for imported materials.

use std::path::{Path, PathBuf};

use asset::SceneMaterial;

use crate::gpu::TextureTarget;
use crate::texture::{Texture, TextureSubsystem};

/// Directory that relative texture paths in a model file are resolved against.
///
/// Everything before the last separator: `a/b/model.obj` gives `a/b`,
/// `a/b/` gives `a/b`, `/model.obj` gives `/`, a bare file name gives `.`.
pub fn model_directory(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.rfind(std::path::is_separator) {
        None => PathBuf::from("."),
        Some(0) => PathBuf::from("/"),
        Some(end) => PathBuf::from(&text[..end]),
    }
}

/// Append a texture reference, as stored in the model file, to `dir`.
///
/// Exporters on Windows often write `.\name.png`; that prefix is dropped.
/// A leading separator does not escape `dir`.
pub fn resolve_texture_path(dir: &Path, stored: &str) -> PathBuf {
    let relative = stored.strip_prefix(".\\").unwrap_or(stored);
    dir.join(relative.trim_start_matches(std::path::is_separator))
}

/// Textures owned on behalf of one material.
#[derive(Debug, Default)]
pub struct MaterialSlot {
    diffuse: Option<Texture>,
}

impl MaterialSlot {
    pub fn diffuse(&self) -> Option<&Texture> {
        self.diffuse.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.diffuse.is_none()
    }
}

/// Loads one diffuse texture per material, in material order.
pub struct MaterialResolver<'a> {
    textures: &'a TextureSubsystem,
}

impl<'a> MaterialResolver<'a> {
    pub fn new(textures: &'a TextureSubsystem) -> Self {
        Self { textures }
    }

    /// Returns one slot per material and whether every referenced texture loaded.
    ///
    /// A texture that fails leaves its slot empty; the remaining materials are
    /// still processed.
    pub fn resolve(&self, materials: &[SceneMaterial], model_path: &Path) -> (Vec<MaterialSlot>, bool) {
        let dir = model_directory(model_path);
        let mut all_loaded = true;

        let slots = materials
            .iter()
            .map(|material| {
                let Some(stored) = material.diffuse_texture.as_deref() else {
                    return MaterialSlot::default();
                };
                let path = resolve_texture_path(&dir, stored);
                let mut texture = self.textures.texture_from_file(TextureTarget::D2, &path);
                match texture.load() {
                    Ok(()) => {
                        log::info!("Loaded diffuse texture '{}'", path.display());
                        MaterialSlot {
                            diffuse: Some(texture),
                        }
                    }
                    Err(err) => {
                        log::error!("Error loading texture '{}': {err}", path.display());
                        all_loaded = false;
                        MaterialSlot::default()
                    }
                }
            })
            .collect();

        (slots, all_loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GraphicsDevice, HeadlessDevice};
    use std::fs;
    use std::rc::Rc;

    fn fixture_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("modelkit-materials-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_png(path: &Path) {
        image::RgbImage::from_pixel(2, 2, image::Rgb([90, 60, 30]))
            .save(path)
            .unwrap();
    }

    fn material(texture: Option<&str>) -> SceneMaterial {
        SceneMaterial {
            name: "m".into(),
            diffuse_texture: texture.map(str::to_owned),
        }
    }

    #[test]
    fn directory_of_model_path() {
        assert_eq!(model_directory(Path::new("model.obj")), PathBuf::from("."));
        assert_eq!(model_directory(Path::new("/model.obj")), PathBuf::from("/"));
        assert_eq!(model_directory(Path::new("a/b/model.obj")), PathBuf::from("a/b"));
        assert_eq!(model_directory(Path::new("a/b/")), PathBuf::from("a/b"));
    }

    #[test]
    fn windows_relative_prefix_is_stripped() {
        let dir = model_directory(Path::new("assets/house.obj"));
        assert_eq!(resolve_texture_path(&dir, ".\\wood.png"), PathBuf::from("assets/wood.png"));
        assert_eq!(resolve_texture_path(&dir, "tex/wood.png"), PathBuf::from("assets/tex/wood.png"));
    }

    #[test]
    fn rooted_texture_reference_stays_under_model_directory() {
        let dir = model_directory(Path::new("assets/house.obj"));
        let resolved = resolve_texture_path(&dir, "/textures/wood.png");
        assert_eq!(resolved, PathBuf::from("assets/textures/wood.png"));
        assert!(resolved.starts_with("assets"));
    }

    #[test]
    fn slots_follow_material_order() {
        let dir = fixture_dir("order");
        write_png(&dir.join("wood.png"));

        let device = Rc::new(HeadlessDevice::new());
        let textures = TextureSubsystem::new(device.clone());
        let materials = [material(None), material(Some(".\\wood.png"))];
        let (slots, ok) = MaterialResolver::new(&textures).resolve(&materials, &dir.join("house.obj"));

        assert!(ok);
        assert_eq!(slots.len(), 2);
        assert!(slots[0].is_empty());
        let wood = slots[1].diffuse().unwrap();
        assert_eq!(wood.image_size(), (2, 2));
        assert_eq!(wood.bits_per_pixel(), 24);
        assert_eq!(wood.path(), Some(dir.join("wood.png").as_path()));
        assert_eq!(device.take_error(), None);
    }

    #[test]
    fn missing_texture_leaves_slot_empty_and_continues() {
        let dir = fixture_dir("missing");
        write_png(&dir.join("stone.png"));

        let device = Rc::new(HeadlessDevice::new());
        let textures = TextureSubsystem::new(device.clone());
        let materials = [material(Some("nope.png")), material(Some("stone.png"))];
        let (slots, ok) = MaterialResolver::new(&textures).resolve(&materials, &dir.join("m.obj"));

        assert!(!ok);
        assert!(slots[0].is_empty());
        assert!(!slots[1].is_empty());
        assert_eq!(device.live_textures(), 1);
    }
}
