//! OBJ importer: positions, normals, texture coordinates, groups and
//! `mtllib`/`usemtl` materials. Every `o`/`g`/`usemtl` switch starts a new
//! sub-mesh.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use crate::{
    error::ImportError,
    importer::{ImportFlags, SceneImporter},
    mtl,
    scene::{Face, Scene, SceneMaterial, SceneMesh},
};

/// [`SceneImporter`] for Wavefront OBJ files with MTL material libraries.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjImporter;

impl SceneImporter for ObjImporter {
    fn import(&self, path: &Path, flags: ImportFlags) -> Result<Scene, ImportError> {
        load_obj_from_path(path, flags)
    }
}

/// Load an OBJ scene from a file path. Material libraries are resolved
/// relative to the file's directory.
pub fn load_obj_from_path(path: impl AsRef<Path>, flags: ImportFlags) -> Result<Scene, ImportError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let scene = parse_obj(
        BufReader::new(file),
        &path.display().to_string(),
        &base_dir,
        flags,
    )?;
    if scene.meshes.is_empty() {
        return Err(ImportError::Empty(path.to_path_buf()));
    }
    Ok(scene)
}

/// Convenience helper to parse an OBJ string literal. `mtllib` statements are
/// resolved relative to `base_dir`.
pub fn load_obj_from_str(
    contents: &str,
    base_dir: impl AsRef<Path>,
    flags: ImportFlags,
) -> Result<Scene, ImportError> {
    let scene = parse_obj(io::Cursor::new(contents), "<memory>", base_dir.as_ref(), flags)?;
    if scene.meshes.is_empty() {
        return Err(ImportError::Empty(PathBuf::from("<memory>")));
    }
    Ok(scene)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
struct Key(usize, Option<usize>, Option<usize>);

/// Faces collected for one sub-mesh before vertices are built.
#[derive(Default)]
struct Group {
    name: String,
    material: Option<usize>,
    polygons: Vec<Vec<Key>>,
}

/// Global attribute pools; OBJ indices address these across all groups.
#[derive(Default)]
struct Pools {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    texcoords: Vec<[f32; 2]>,
}

fn parse_obj<R: BufRead>(
    reader: R,
    file: &str,
    base_dir: &Path,
    flags: ImportFlags,
) -> Result<Scene, ImportError> {
    let mut pools = Pools::default();
    let mut materials: Vec<SceneMaterial> = Vec::new();
    let mut groups: Vec<Group> = Vec::new();
    let mut current = Group::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ImportError::parse(file, line_no, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };

        match tag {
            "v" => {
                let x = parse_f32(parts.next(), file, line_no, "x coordinate")?;
                let y = parse_f32(parts.next(), file, line_no, "y coordinate")?;
                let z = parse_f32(parts.next(), file, line_no, "z coordinate")?;
                pools.positions.push([x, y, z]);
            }
            "vt" => {
                let u = parse_f32(parts.next(), file, line_no, "u coordinate")?;
                // 1D texture coordinates omit v.
                let v = match parts.next() {
                    Some(token) => parse_f32(Some(token), file, line_no, "v coordinate")?,
                    None => 0.0,
                };
                pools.texcoords.push([u, v]);
            }
            "vn" => {
                let nx = parse_f32(parts.next(), file, line_no, "nx coordinate")?;
                let ny = parse_f32(parts.next(), file, line_no, "ny coordinate")?;
                let nz = parse_f32(parts.next(), file, line_no, "nz coordinate")?;
                pools.normals.push([nx, ny, nz]);
            }
            "f" => {
                let mut polygon = Vec::new();
                for part in parts {
                    let (vi, vti, vni) = parse_face_vertex(part, &pools, file, line_no)?;
                    polygon.push(Key(vi, vti, vni));
                }
                if polygon.len() < 3 {
                    log::warn!("{file}:{}: skipping degenerate face", line_no + 1);
                    continue;
                }
                current.polygons.push(polygon);
            }
            "o" | "g" => {
                let name = parts.collect::<Vec<_>>().join(" ");
                let material = current.material;
                start_group(&mut groups, &mut current, name, material);
            }
            "usemtl" => {
                let name = parts.collect::<Vec<_>>().join(" ");
                let material = materials.iter().position(|m| m.name == name);
                if material.is_none() {
                    log::warn!("{file}:{}: unknown material '{name}'", line_no + 1);
                }
                let group_name = current.name.clone();
                start_group(&mut groups, &mut current, group_name, material);
            }
            "mtllib" => {
                for lib in parts {
                    let lib_path = base_dir.join(lib);
                    match mtl::load_mtl_from_path(&lib_path) {
                        Ok(loaded) => materials.extend(loaded),
                        Err(err) => log::warn!("{file}: skipping material library: {err}"),
                    }
                }
            }
            _ => {
                // Ignore other directives (s/l/p/curves/etc.)
            }
        }
    }
    if !current.polygons.is_empty() {
        groups.push(current);
    }

    let meshes = groups
        .into_iter()
        .map(|group| build_mesh(group, &pools, flags))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|message| ImportError::Parse {
            file: file.to_owned(),
            line: 0,
            message,
        })?;

    Ok(Scene { meshes, materials })
}

/// Close the current group if it has faces, otherwise re-label it.
fn start_group(groups: &mut Vec<Group>, current: &mut Group, name: String, material: Option<usize>) {
    if current.polygons.is_empty() {
        current.name = name;
        current.material = material;
        return;
    }
    let finished = std::mem::replace(
        current,
        Group {
            name,
            material,
            polygons: Vec::new(),
        },
    );
    groups.push(finished);
}

fn build_mesh(group: Group, pools: &Pools, flags: ImportFlags) -> Result<SceneMesh, String> {
    let mut unique: HashMap<Key, u32> = HashMap::new();
    let mut positions: Vec<[f32; 3]> = Vec::new();
    let mut normals: Vec<Option<[f32; 3]>> = Vec::new();
    let mut uvs: Vec<[f32; 2]> = Vec::new();
    let mut has_uv = false;
    let mut faces: Vec<Face> = Vec::with_capacity(group.polygons.len());

    for polygon in &group.polygons {
        let mut local: Vec<u32> = Vec::with_capacity(polygon.len());
        for &key in polygon {
            if flags.join_identical_vertices {
                if let Some(&idx) = unique.get(&key) {
                    local.push(idx);
                    continue;
                }
            }

            let Key(vi, vti, vni) = key;
            let idx = u32::try_from(positions.len())
                .map_err(|_| format!("too many vertices in '{}' (>{})", group.name, u32::MAX))?;
            positions.push(pools.positions[vi]);
            normals.push(vni.map(|i| pools.normals[i]));
            let uv = match vti {
                Some(i) => {
                    has_uv = true;
                    pools.texcoords[i]
                }
                None => [0.0, 0.0],
            };
            uvs.push(uv);
            if flags.join_identical_vertices {
                unique.insert(key, idx);
            }
            local.push(idx);
        }

        if flags.triangulate && local.len() > 3 {
            // Triangulate fan
            for tri in 1..(local.len() - 1) {
                faces.push(Face::triangle(local[0], local[tri], local[tri + 1]));
            }
        } else {
            faces.push(Face::new(local));
        }
    }

    let normals = if normals.iter().all(Option::is_none) && !flags.generate_normals {
        Vec::new()
    } else if flags.generate_normals && normals.iter().any(Option::is_none) {
        generate_missing_normals(&positions, &normals, &faces)
    } else {
        normals.into_iter().map(|n| n.unwrap_or([0.0; 3])).collect()
    };

    if flags.flip_uvs {
        for uv in &mut uvs {
            uv[1] = 1.0 - uv[1];
        }
    }

    Ok(SceneMesh {
        name: group.name,
        positions,
        normals,
        tex_coords: if has_uv { vec![uvs] } else { Vec::new() },
        faces,
        material: group.material,
    })
}

/// Area-weighted smooth normals for the vertices that have none; existing
/// normals are kept as written.
fn generate_missing_normals(
    positions: &[[f32; 3]],
    normals: &[Option<[f32; 3]>],
    faces: &[Face],
) -> Vec<[f32; 3]> {
    let mut accum = vec![[0.0f32; 3]; positions.len()];

    for face in faces {
        let idx = &face.indices;
        for tri in 1..idx.len().saturating_sub(1) {
            let (a, b, c) = (idx[0] as usize, idx[tri] as usize, idx[tri + 1] as usize);
            let n = cross(sub(positions[b], positions[a]), sub(positions[c], positions[a]));
            for v in [a, b, c] {
                accum[v] = add(accum[v], n);
            }
        }
    }

    normals
        .iter()
        .zip(accum)
        .map(|(given, sum)| given.unwrap_or_else(|| normalize_or(sum, [0.0, 0.0, 1.0])))
        .collect()
}

#[inline]
fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize_or(v: [f32; 3], fallback: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len <= f32::EPSILON {
        fallback
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

fn parse_f32(value: Option<&str>, file: &str, line_no: usize, what: &str) -> Result<f32, ImportError> {
    let token = value.ok_or_else(|| ImportError::parse(file, line_no, format!("missing {what}")))?;
    token
        .parse::<f32>()
        .map_err(|e| ImportError::parse(file, line_no, format!("failed to parse {what}: {e}")))
}

fn parse_face_vertex(
    token: &str,
    pools: &Pools,
    file: &str,
    line_no: usize,
) -> Result<(usize, Option<usize>, Option<usize>), ImportError> {
    let mut split = token.split('/');
    let pos = split.next().unwrap_or_default();
    let pos_idx = resolve_index(pos, pools.positions.len(), file, line_no)?;

    let tex_idx = match split.next() {
        Some(value) if !value.is_empty() => {
            Some(resolve_index(value, pools.texcoords.len(), file, line_no)?)
        }
        _ => None,
    };

    let norm_idx = match split.next() {
        Some(value) if !value.is_empty() => {
            Some(resolve_index(value, pools.normals.len(), file, line_no)?)
        }
        _ => None,
    };

    Ok((pos_idx, tex_idx, norm_idx))
}

fn resolve_index(token: &str, len: usize, file: &str, line_no: usize) -> Result<usize, ImportError> {
    let raw = token
        .parse::<i64>()
        .map_err(|_| ImportError::parse(file, line_no, format!("invalid index '{token}'")))?;
    if raw == 0 {
        return Err(ImportError::parse(file, line_no, "OBJ indices are 1-based; found 0"));
    }

    let idx = if raw > 0 { raw - 1 } else { len as i64 + raw };

    if idx < 0 || idx as usize >= len {
        return Err(ImportError::parse(
            file,
            line_no,
            format!("index {raw} resolved out of bounds (len={len})"),
        ));
    }

    Ok(idx as usize)
}
