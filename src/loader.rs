// Asset loading - OBJ meshes and texture images
//
// Produces plain vertex/index arrays and RGBA8 pixel buffers. Nothing here
// touches the GPU.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::scene::Vertex;

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

/// One mesh worth of geometry plus the texture its material references
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub texture: Option<PathBuf>,
}

/// Load every mesh in an OBJ file, triangulated with a single index stream
pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Vec<MeshData>> {
    let path = path.as_ref();
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };

    let (models, materials) = tobj::load_obj(path, &options)
        .with_context(|| format!("Failed to load OBJ {:?}", path))?;

    let materials = materials.unwrap_or_else(|e| {
        log::warn!("No materials for {:?}: {}", path, e);
        Vec::new()
    });

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let meshes: Vec<MeshData> = models
        .iter()
        .map(|model| {
            let texture = model
                .mesh
                .material_id
                .and_then(|id| materials.get(id))
                .and_then(|material| texture_path(base_dir, material.diffuse_texture.as_deref()));
            mesh_from_tobj(&model.mesh, texture)
        })
        .collect();

    log::info!("Loaded {:?}: {} meshes", path, meshes.len());
    Ok(meshes)
}

/// Texture names in MTL files are relative to the OBJ's directory
fn texture_path(base_dir: &Path, name: Option<&str>) -> Option<PathBuf> {
    name.map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| base_dir.join(name))
}

/// Convert tobj output into our vertex format.
///
/// The V coordinate is flipped because OBJ puts the origin at the bottom
/// left. Missing vertex colors default to white.
pub fn mesh_from_tobj(mesh: &tobj::Mesh, texture: Option<PathBuf>) -> MeshData {
    let vertex_count = mesh.positions.len() / 3;

    let vertices = (0..vertex_count)
        .map(|i| {
            let position = [
                mesh.positions[3 * i],
                mesh.positions[3 * i + 1],
                mesh.positions[3 * i + 2],
            ];
            let color = if mesh.vertex_color.len() >= 3 * (i + 1) {
                [
                    mesh.vertex_color[3 * i],
                    mesh.vertex_color[3 * i + 1],
                    mesh.vertex_color[3 * i + 2],
                ]
            } else {
                WHITE
            };
            let tex_coord = if mesh.texcoords.len() >= 2 * (i + 1) {
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            Vertex::new(position, color, tex_coord)
        })
        .collect();

    MeshData {
        vertices,
        indices: mesh.indices.clone(),
        texture,
    }
}

/// Decoded RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to decode image {:?}", path))?
            .into_rgba8();

        let (width, height) = image.dimensions();
        Ok(Self {
            width,
            height,
            pixels: image.into_raw(),
        })
    }

    /// 1x1 image of a single color
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }
}

/// Two overlapping colored quads, used when no model files are configured
pub fn demo_meshes() -> Vec<MeshData> {
    let quad = |z: f32, colors: [[f32; 3]; 4]| {
        let corners = [[-0.5, -0.5], [0.5, -0.5], [0.5, 0.5], [-0.5, 0.5]];
        let tex_coords = [[1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        MeshData {
            vertices: (0..4)
                .map(|i| Vertex::new([corners[i][0], corners[i][1], z], colors[i], tex_coords[i]))
                .collect(),
            indices: vec![0, 1, 2, 2, 3, 0],
            texture: None,
        }
    };

    vec![
        quad(
            0.0,
            [
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
            ],
        ),
        quad(
            -0.5,
            [
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_from_tobj_flips_v_and_defaults_color() {
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.25, 0.0, 1.0],
            indices: vec![0, 1, 2],
            ..Default::default()
        };

        let data = mesh_from_tobj(&mesh, None);
        assert_eq!(data.vertices.len(), 3);
        assert_eq!(data.indices, vec![0, 1, 2]);
        assert_eq!(data.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(data.vertices[1].tex_coord, [1.0, 0.75]);
        assert_eq!(data.vertices[2].tex_coord, [0.0, 0.0]);
        assert_eq!(data.vertices[0].color, WHITE);
    }

    #[test]
    fn test_mesh_from_tobj_without_texcoords() {
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            vertex_color: vec![0.2, 0.4, 0.6, 0.2, 0.4, 0.6, 0.2, 0.4, 0.6],
            indices: vec![0, 1, 2],
            ..Default::default()
        };

        let data = mesh_from_tobj(&mesh, Some(PathBuf::from("tex.png")));
        assert!(data.vertices.iter().all(|v| v.tex_coord == [0.0, 0.0]));
        assert_eq!(data.vertices[2].color, [0.2, 0.4, 0.6]);
        assert_eq!(data.texture, Some(PathBuf::from("tex.png")));
    }

    #[test]
    fn test_texture_path_is_relative_to_obj() {
        let base = Path::new("assets/models");
        assert_eq!(
            texture_path(base, Some("wood.png")),
            Some(PathBuf::from("assets/models/wood.png"))
        );
        assert_eq!(texture_path(base, Some("  ")), None);
        assert_eq!(texture_path(base, None), None);
    }

    #[test]
    fn test_load_obj_triangulates_quad() {
        let dir = std::env::temp_dir().join(format!("vk-mesh-renderer-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quad.obj");
        std::fs::write(
            &path,
            "o quad\n\
             v -1 -1 0\nv 1 -1 0\nv 1 1 0\nv -1 1 0\n\
             vt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\n\
             f 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();

        let meshes = load_obj(&path).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(meshes.len(), 1);
        assert_eq!(meshes[0].indices.len(), 6);
        assert_eq!(meshes[0].vertices.len(), 4);
        assert_eq!(meshes[0].texture, None);
    }

    #[test]
    fn test_load_obj_missing_file() {
        assert!(load_obj("does/not/exist.obj").is_err());
    }

    #[test]
    fn test_solid_image() {
        let image = DecodedImage::solid([255, 255, 255, 255]);
        assert_eq!((image.width, image.height), (1, 1));
        assert_eq!(image.pixels.len(), 4);
    }

    #[test]
    fn test_demo_meshes() {
        let meshes = demo_meshes();
        assert_eq!(meshes.len(), 2);
        for mesh in &meshes {
            assert_eq!(mesh.vertices.len(), 4);
            assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
        }
    }
}
