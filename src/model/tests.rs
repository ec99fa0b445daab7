use super::*;
use anyhow::Result;
use assert_fs::prelude::*;

/// Single textured triangle in the XY plane, laid out as positions,
/// normals, UVs, then u16 indices.
fn triangle_bin() -> Vec<u8> {
    let mut bin = Vec::new();
    let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let normals: [[f32; 3]; 3] = [[0.0, 0.0, 1.0]; 3];
    let uvs: [[f32; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];

    for v in positions.iter().chain(normals.iter()) {
        for value in v {
            bin.extend_from_slice(&value.to_le_bytes());
        }
    }
    for uv in &uvs {
        for value in uv {
            bin.extend_from_slice(&value.to_le_bytes());
        }
    }
    for index in [0u16, 1, 2] {
        bin.extend_from_slice(&index.to_le_bytes());
    }
    bin
}

/// glTF JSON around `triangle_bin`, with injectable node and material
/// bodies and an optional indices accessor.
fn triangle_json(node: &str, material: &str, indexed: bool) -> String {
    let indices = if indexed { r#""indices": 3,"# } else { "" };
    format!(
        r#"{{
  "asset": {{"version": "2.0"}},
  "scene": 0,
  "scenes": [{{"nodes": [0]}}],
  "nodes": [{node}],
  "meshes": [{{"primitives": [{{
    "attributes": {{"POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2}},
    {indices}
    "material": 0
  }}]}}],
  "materials": [{material}],
  "buffers": [{{"uri": "buffer.bin", "byteLength": 102}}],
  "bufferViews": [
    {{"buffer": 0, "byteOffset": 0, "byteLength": 36}},
    {{"buffer": 0, "byteOffset": 36, "byteLength": 36}},
    {{"buffer": 0, "byteOffset": 72, "byteLength": 24}},
    {{"buffer": 0, "byteOffset": 96, "byteLength": 6}}
  ],
  "accessors": [
    {{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
      "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0]}},
    {{"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"}},
    {{"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2"}},
    {{"bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR"}}
  ]
}}"#
    )
}

fn load_gltf(json: &str, bin: &[u8]) -> Result<Model> {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("buffer.bin").write_binary(bin).unwrap();
    let file = temp.child("model.gltf");
    file.write_str(json).unwrap();
    Model::load(file.path())
}

fn load_triangle(node: &str, material: &str, indexed: bool) -> Model {
    load_gltf(&triangle_json(node, material, indexed), &triangle_bin()).unwrap()
}

#[test]
fn test_vertex_size_and_layout() {
    assert_eq!(std::mem::size_of::<Vertex>(), 72);
    let layout = Vertex::desc();
    assert_eq!(layout.array_stride, 72);
    assert_eq!(layout.step_mode, wgpu::VertexStepMode::Vertex);
    assert_eq!(layout.attributes.len(), 6);
}

#[test]
fn test_unsupported_format() {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("model.obj");
    file.touch().unwrap();

    let result = Model::load(file.path());
    assert!(result.is_err());
    if let Err(e) = result {
        assert!(e.to_string().contains("Unsupported model format"));
    }
}

#[test_log::test]
fn test_loads_indexed_triangle() {
    let model = load_triangle(r#"{"mesh": 0}"#, "{}", true);

    assert_eq!(model.vertices.len(), 3);
    assert_eq!(model.indices, vec![0, 1, 2]);
    assert_eq!(model.submeshes.len(), 1);
    assert_eq!(model.submeshes[0].first_index, 0);
    assert_eq!(model.submeshes[0].index_count, 3);
    assert_eq!(model.submeshes[0].material_index, 0);

    // Unsupplied attributes get their defaults.
    assert_eq!(model.vertices[0].color, [1.0; 4]);
    assert_eq!(model.vertices[0].tex_coords1, [0.0, 0.0]);
}

#[test]
fn test_synthesizes_sequential_indices() {
    let model = load_triangle(r#"{"mesh": 0}"#, "{}", false);
    assert_eq!(model.indices, vec![0, 1, 2]);
    assert_eq!(model.submeshes[0].index_count, 3);
}

#[test]
fn test_indices_stay_in_vertex_range() {
    let model = load_triangle(r#"{"mesh": 0}"#, "{}", true);
    let vertex_count = model.vertices.len() as u32;
    assert!(model.indices.iter().all(|&i| i < vertex_count));
    for submesh in &model.submeshes {
        assert!((submesh.first_index + submesh.index_count) as usize <= model.indices.len());
    }
}

#[test]
fn test_node_translation_applied_to_positions() {
    let model = load_triangle(r#"{"mesh": 0, "translation": [1.0, 2.0, 3.0]}"#, "{}", true);

    assert_eq!(model.vertices[0].position, [1.0, 2.0, 3.0]);
    assert_eq!(model.bounds_min, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(model.bounds_max, Vec3::new(2.0, 3.0, 3.0));
}

#[test]
fn test_node_matrix_applied_to_positions() {
    // Column-major uniform scale by 2.
    let node = r#"{"mesh": 0, "matrix": [
        2.0, 0.0, 0.0, 0.0,
        0.0, 2.0, 0.0, 0.0,
        0.0, 0.0, 2.0, 0.0,
        0.0, 0.0, 0.0, 1.0]}"#;
    let model = load_triangle(node, "{}", true);

    assert_eq!(model.vertices[1].position, [2.0, 0.0, 0.0]);
    assert_eq!(model.bounds_max, Vec3::new(2.0, 2.0, 0.0));
    // Normals stay unit length under the inverse-transpose.
    let normal = Vec3::from(model.vertices[0].normal);
    assert!((normal.length() - 1.0).abs() < 1e-5);
    assert!((normal - Vec3::Z).length() < 1e-5);
}

#[test]
fn test_rotation_keeps_submesh_bounds_consistent() {
    // Quarter turn about Y: +X maps to -Z.
    let node = r#"{"mesh": 0, "rotation": [0.0, 0.70710678, 0.0, 0.70710678]}"#;
    let model = load_triangle(node, "{}", true);

    let submesh = &model.submeshes[0];
    assert!(submesh.bounds_min.z < -0.9);
    for vertex in &model.vertices {
        let p = Vec3::from(vertex.position);
        assert!(p.cmpge(submesh.bounds_min - 1e-5).all());
        assert!(p.cmple(submesh.bounds_max + 1e-5).all());
    }
}

#[test_log::test]
fn test_generates_tangents_when_absent() {
    let model = load_triangle(r#"{"mesh": 0}"#, "{}", true);

    for vertex in &model.vertices {
        let tangent = Vec3::new(vertex.tangent[0], vertex.tangent[1], vertex.tangent[2]);
        assert!((tangent.length() - 1.0).abs() < 1e-4);
        assert!(vertex.tangent[3] == 1.0 || vertex.tangent[3] == -1.0);
        // Orthogonal to the normal after Gram-Schmidt.
        assert!(tangent.dot(Vec3::from(vertex.normal)).abs() < 1e-4);
    }
    // This UV layout runs U along +X with right-handed frames.
    let first = Vec3::new(
        model.vertices[0].tangent[0],
        model.vertices[0].tangent[1],
        model.vertices[0].tangent[2],
    );
    assert!((first - Vec3::X).length() < 1e-4);
    assert_eq!(model.vertices[0].tangent[3], 1.0);
}

#[test]
fn test_material_conversion() {
    let material = r#"{
        "name": "glass",
        "alphaMode": "BLEND",
        "doubleSided": true,
        "emissiveFactor": [0.1, 0.2, 0.3],
        "pbrMetallicRoughness": {
            "baseColorFactor": [1.0, 0.5, 0.25, 0.5],
            "metallicFactor": 0.25,
            "roughnessFactor": 0.75
        }
    }"#;
    let model = load_triangle(r#"{"mesh": 0}"#, material, true);

    let material = &model.materials[0];
    assert_eq!(material.name, "glass");
    assert_eq!(material.alpha_mode, AlphaMode::Blend);
    assert!(material.double_sided);
    assert_eq!(material.base_color_factor, [1.0, 0.5, 0.25, 0.5]);
    assert_eq!(material.emissive_factor, [0.1, 0.2, 0.3]);
    assert_eq!(material.metallic_factor, 0.25);
    assert_eq!(material.roughness_factor, 0.75);
    assert_eq!(material.alpha_cutoff, 0.5);
    assert!(material.base_color_texture.is_none());
}

#[test]
fn test_mask_material_cutoff() {
    let material = r#"{"alphaMode": "MASK", "alphaCutoff": 0.75}"#;
    let model = load_triangle(r#"{"mesh": 0}"#, material, true);
    assert_eq!(model.materials[0].alpha_mode, AlphaMode::Mask);
    assert_eq!(model.materials[0].alpha_cutoff, 0.75);
}

#[test]
fn test_empty_scene_is_an_error() {
    let json = r#"{
        "asset": {"version": "2.0"},
        "scene": 0,
        "scenes": [{"nodes": []}]
    }"#;
    let result = load_gltf(json, &[]);
    assert!(result.is_err());
    if let Err(e) = result {
        assert!(e.to_string().contains("no drawable geometry"));
    }
}

#[test]
fn test_update_wraps_rotation() {
    let mut model = load_triangle(r#"{"mesh": 0}"#, "{}", true);

    model.update(1.0, true);
    let spun = model.transform();
    assert!((spun * glam::Vec4::new(1.0, 0.0, 0.0, 0.0)).z.abs() > 0.5);

    // A full extra turn lands on the same transform.
    model.update(std::f32::consts::TAU, true);
    assert!(spun.abs_diff_eq(model.transform(), 1e-4));

    // Paused updates leave the angle alone.
    let before = model.transform();
    model.update(0.5, false);
    assert!(before.abs_diff_eq(model.transform(), 1e-6));

    model.reset_orientation();
    assert!(model.transform().abs_diff_eq(Mat4::IDENTITY, 1e-6));
}

#[test]
fn test_centroid_is_bounds_center() {
    let submesh = SubMesh {
        first_index: 0,
        index_count: 3,
        material_index: 0,
        bounds_min: Vec3::new(-2.0, 0.0, 1.0),
        bounds_max: Vec3::new(4.0, 2.0, 3.0),
    };
    assert_eq!(submesh.centroid(), Vec3::new(1.0, 1.0, 2.0));
}
