use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

use super::{generate_tangents, AlphaMode, Material, Model, SubMesh, TextureData, Vertex};

impl Model {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "glb" | "gltf" => {
                let start = Instant::now();
                let (document, buffers, images) = gltf::import(path)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                let model = Self::from_gltf(&document, &buffers, &images)?;
                log::info!(
                    "Loaded model {} in {:.1} ms ({} vertices, {} indices, {} submeshes)",
                    path.display(),
                    start.elapsed().as_secs_f64() * 1000.0,
                    model.vertices.len(),
                    model.indices.len(),
                    model.submeshes.len(),
                );
                Ok(model)
            }
            _ => Err(anyhow!("Unsupported model format: {}", extension)),
        }
    }

    fn from_gltf(
        document: &gltf::Document,
        buffers: &[gltf::buffer::Data],
        images: &[gltf::image::Data],
    ) -> Result<Self> {
        let mut model = Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            submeshes: Vec::new(),
            materials: Vec::new(),
            textures: Vec::new(),
            bounds_min: Vec3::INFINITY,
            bounds_max: Vec3::NEG_INFINITY,
            rotation_angle: 0.0,
        };

        for material in document.materials() {
            model.materials.push(convert_material(&material));
        }

        for (index, image) in images.iter().enumerate() {
            model.textures.push(convert_image(index, image));
        }

        let scene = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .ok_or_else(|| anyhow!("Model has no scenes"))?;

        for node in scene.nodes() {
            process_node(&node, Mat4::IDENTITY, buffers, &mut model);
        }

        if model.submeshes.is_empty() {
            return Err(anyhow!("Model has no drawable geometry"));
        }

        model.recompute_bounds();
        Ok(model)
    }
}

fn process_node(
    node: &gltf::Node,
    parent_transform: Mat4,
    buffers: &[gltf::buffer::Data],
    model: &mut Model,
) {
    let local = match node.transform() {
        gltf::scene::Transform::Matrix { matrix } => Mat4::from_cols_array_2d(&matrix),
        gltf::scene::Transform::Decomposed {
            translation,
            rotation,
            scale,
        } => Mat4::from_scale_rotation_translation(
            Vec3::from(scale),
            Quat::from_xyzw(rotation[0], rotation[1], rotation[2], rotation[3]),
            Vec3::from(translation),
        ),
    };
    let transform = parent_transform * local;

    if let Some(mesh) = node.mesh() {
        process_mesh(&mesh, transform, buffers, model);
    }

    for child in node.children() {
        process_node(&child, transform, buffers, model);
    }
}

fn process_mesh(
    mesh: &gltf::Mesh,
    transform: Mat4,
    buffers: &[gltf::buffer::Data],
    model: &mut Model,
) {
    // Normals move by the inverse-transpose, tangents by the linear part.
    let linear = Mat3::from_mat4(transform);
    let normal_matrix = linear.inverse().transpose();

    for primitive in mesh.primitives() {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            log::warn!("Skipping non-triangle primitive in mesh {:?}", mesh.name());
            continue;
        }
        let Some(material_index) = primitive.material().index() else {
            log::warn!("Skipping primitive without a material in mesh {:?}", mesh.name());
            continue;
        };

        let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
        let Some(positions) = reader.read_positions() else {
            log::warn!("Skipping primitive without positions in mesh {:?}", mesh.name());
            continue;
        };
        let positions: Vec<[f32; 3]> = positions.collect();

        let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(Iterator::collect);
        let tangents: Option<Vec<[f32; 4]>> = reader.read_tangents().map(Iterator::collect);
        let tex_coords0: Option<Vec<[f32; 2]>> =
            reader.read_tex_coords(0).map(|t| t.into_f32().collect());
        let tex_coords1: Option<Vec<[f32; 2]>> =
            reader.read_tex_coords(1).map(|t| t.into_f32().collect());
        let colors: Option<Vec<[f32; 4]>> =
            reader.read_colors(0).map(|c| c.into_rgba_f32().collect());

        let vertex_offset = model.vertices.len() as u32;
        let first_index = model.indices.len() as u32;

        let mut bounds_min = Vec3::INFINITY;
        let mut bounds_max = Vec3::NEG_INFINITY;

        for i in 0..positions.len() {
            let position = transform.transform_point3(Vec3::from(positions[i]));
            bounds_min = bounds_min.min(position);
            bounds_max = bounds_max.max(position);

            let normal = normals
                .as_ref()
                .map(|n| Vec3::from(n[i]))
                .unwrap_or(Vec3::Z);
            let normal = (normal_matrix * normal).normalize();

            let tangent = match &tangents {
                Some(t) => {
                    let transformed = (linear * Vec3::new(t[i][0], t[i][1], t[i][2])).normalize();
                    // Handedness rides along untouched.
                    Vec4::new(transformed.x, transformed.y, transformed.z, t[i][3])
                }
                None => Vec4::new(0.0, 0.0, 0.0, 1.0),
            };

            model.vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                tangent: tangent.to_array(),
                tex_coords0: tex_coords0.as_ref().map(|t| t[i]).unwrap_or([0.0, 0.0]),
                tex_coords1: tex_coords1.as_ref().map(|t| t[i]).unwrap_or([0.0, 0.0]),
                color: colors.as_ref().map(|c| c[i]).unwrap_or([1.0; 4]),
            });
        }

        // Upcast u8/u16/u32 indices, or synthesize a sequential run.
        let index_count = match reader.read_indices() {
            Some(indices) => {
                let mut count = 0u32;
                for index in indices.into_u32() {
                    model.indices.push(vertex_offset + index);
                    count += 1;
                }
                count
            }
            None => {
                for i in 0..positions.len() as u32 {
                    model.indices.push(vertex_offset + i);
                }
                positions.len() as u32
            }
        };

        let submesh = SubMesh {
            first_index,
            index_count,
            material_index,
            bounds_min,
            bounds_max,
        };

        if tangents.is_none() {
            log::info!("Generating tangents for submesh {}", model.submeshes.len());
            generate_tangents(&submesh, &mut model.vertices, &model.indices);
        }

        model.submeshes.push(submesh);
    }
}

fn convert_material(material: &gltf::Material) -> Material {
    let pbr = material.pbr_metallic_roughness();

    let alpha_mode = match material.alpha_mode() {
        gltf::material::AlphaMode::Mask => AlphaMode::Mask,
        gltf::material::AlphaMode::Blend => AlphaMode::Blend,
        gltf::material::AlphaMode::Opaque => AlphaMode::Opaque,
    };

    Material {
        name: material.name().unwrap_or("").to_string(),
        base_color_factor: pbr.base_color_factor(),
        emissive_factor: material.emissive_factor(),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
        normal_scale: material.normal_texture().map(|n| n.scale()).unwrap_or(1.0),
        occlusion_strength: material
            .occlusion_texture()
            .map(|o| o.strength())
            .unwrap_or(1.0),
        alpha_mode,
        alpha_cutoff: material.alpha_cutoff().unwrap_or(0.5),
        double_sided: material.double_sided(),
        base_color_texture: pbr.base_color_texture().map(|t| t.texture().source().index()),
        metallic_roughness_texture: pbr
            .metallic_roughness_texture()
            .map(|t| t.texture().source().index()),
        normal_texture: material.normal_texture().map(|t| t.texture().source().index()),
        occlusion_texture: material
            .occlusion_texture()
            .map(|t| t.texture().source().index()),
        emissive_texture: material
            .emissive_texture()
            .map(|t| t.texture().source().index()),
    }
}

/// Re-packs a decoded glTF image as tightly packed RGBA8.
fn convert_image(index: usize, image: &gltf::image::Data) -> TextureData {
    use gltf::image::Format;

    let pixel_count = (image.width * image.height) as usize;
    let pixels = match image.format {
        Format::R8G8B8A8 => image.pixels.clone(),
        Format::R8G8B8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for rgb in image.pixels.chunks_exact(3) {
                out.extend_from_slice(rgb);
                out.push(255);
            }
            out
        }
        Format::R8G8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for rg in image.pixels.chunks_exact(2) {
                out.extend_from_slice(&[rg[0], rg[1], 0, 255]);
            }
            out
        }
        Format::R8 => {
            let mut out = Vec::with_capacity(pixel_count * 4);
            for &r in &image.pixels {
                out.extend_from_slice(&[r, r, r, 255]);
            }
            out
        }
        Format::R16 | Format::R16G16 | Format::R16G16B16 | Format::R16G16B16A16 => {
            let channels = match image.format {
                Format::R16 => 1,
                Format::R16G16 => 2,
                Format::R16G16B16 => 3,
                _ => 4,
            };
            let mut out = vec![255u8; pixel_count * 4];
            for (i, sample) in image.pixels.chunks_exact(2).enumerate() {
                let value = (u16::from_le_bytes([sample[0], sample[1]]) >> 8) as u8;
                let pixel = i / channels;
                let channel = i % channels;
                if channels == 1 {
                    out[pixel * 4] = value;
                    out[pixel * 4 + 1] = value;
                    out[pixel * 4 + 2] = value;
                } else {
                    out[pixel * 4 + channel] = value;
                }
            }
            out
        }
        Format::R32G32B32FLOAT | Format::R32G32B32A32FLOAT => {
            let channels = if image.format == Format::R32G32B32FLOAT { 3 } else { 4 };
            let mut out = vec![255u8; pixel_count * 4];
            for (i, sample) in image.pixels.chunks_exact(4).enumerate() {
                let value = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                let pixel = i / channels;
                let channel = i % channels;
                out[pixel * 4 + channel] = (value.clamp(0.0, 1.0) * 255.0) as u8;
            }
            out
        }
    };

    TextureData {
        name: format!("texture_{index}"),
        width: image.width,
        height: image.height,
        pixels,
    }
}
