//! Minimal MTL parser: material names and their diffuse texture maps.

use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};

use crate::{error::ImportError, scene::SceneMaterial};

/// Load the materials declared in an MTL file, in declaration order.
pub fn load_mtl_from_path(path: impl AsRef<Path>) -> Result<Vec<SceneMaterial>, ImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_mtl(BufReader::new(file), &path.display().to_string())
}

/// Convenience helper to parse an MTL string literal.
pub fn load_mtl_from_str(contents: &str) -> Result<Vec<SceneMaterial>, ImportError> {
    parse_mtl(io::Cursor::new(contents), "<memory>")
}

fn parse_mtl<R: BufRead>(reader: R, file: &str) -> Result<Vec<SceneMaterial>, ImportError> {
    let mut materials: Vec<SceneMaterial> = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ImportError::parse(file, line_no, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (tag, rest) = trimmed
            .split_once(char::is_whitespace)
            .map(|(tag, rest)| (tag, rest.trim()))
            .unwrap_or((trimmed, ""));

        match tag {
            "newmtl" => {
                if rest.is_empty() {
                    return Err(ImportError::parse(file, line_no, "newmtl without a name"));
                }
                materials.push(SceneMaterial {
                    name: rest.to_owned(),
                    diffuse_texture: None,
                });
            }
            "map_Kd" => {
                let current = materials
                    .last_mut()
                    .ok_or_else(|| ImportError::parse(file, line_no, "map_Kd before newmtl"))?;
                let texture = texture_path(rest)
                    .ok_or_else(|| ImportError::parse(file, line_no, "map_Kd without a path"))?;
                current.diffuse_texture = Some(texture.to_owned());
            }
            _ => {
                // Colors, illumination models and other maps are not used.
            }
        }
    }

    Ok(materials)
}

/// Strip `-option value` pairs in front of the file name of a texture statement.
fn texture_path(args: &str) -> Option<&str> {
    if !args.starts_with('-') {
        return (!args.is_empty()).then_some(args);
    }
    args.split_whitespace().last()
}
