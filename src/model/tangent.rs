use glam::{Vec2, Vec3};

use super::{SubMesh, Vertex};

/// Fills in tangents for a submesh that was authored without them.
///
/// Face tangents and bitangents are derived from position and UV0
/// deltas, accumulated per vertex, then Gram-Schmidt orthogonalized
/// against the vertex normal. Handedness goes into w, defaulting to
/// +1 when the accumulated frame is degenerate.
pub fn generate_tangents(submesh: &SubMesh, vertices: &mut [Vertex], indices: &[u32]) {
    let mut tangents = vec![Vec3::ZERO; vertices.len()];
    let mut bitangents = vec![Vec3::ZERO; vertices.len()];
    let mut referenced = vec![false; vertices.len()];

    let first = submesh.first_index as usize;
    let count = submesh.index_count as usize;

    for tri in indices[first..first + count].chunks_exact(3) {
        let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        referenced[i0] = true;
        referenced[i1] = true;
        referenced[i2] = true;

        let p0 = Vec3::from(vertices[i0].position);
        let p1 = Vec3::from(vertices[i1].position);
        let p2 = Vec3::from(vertices[i2].position);

        let uv0 = Vec2::from(vertices[i0].tex_coords0);
        let uv1 = Vec2::from(vertices[i1].tex_coords0);
        let uv2 = Vec2::from(vertices[i2].tex_coords0);

        let edge1 = p1 - p0;
        let edge2 = p2 - p0;
        let duv1 = uv1 - uv0;
        let duv2 = uv2 - uv0;

        let det = duv1.x * duv2.y - duv2.x * duv1.y;
        if det.abs() < f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;

        let tangent = (edge1 * duv2.y - edge2 * duv1.y) * r;
        let bitangent = (edge2 * duv1.x - edge1 * duv2.x) * r;

        for &i in &[i0, i1, i2] {
            tangents[i] += tangent;
            bitangents[i] += bitangent;
        }
    }

    for (i, vertex) in vertices.iter_mut().enumerate() {
        if !referenced[i] {
            continue;
        }
        let normal = Vec3::from(vertex.normal);
        let accumulated = tangents[i];

        // Gram-Schmidt against the vertex normal.
        let orthogonal = accumulated - normal * normal.dot(accumulated);
        let tangent = if orthogonal.length_squared() > f32::EPSILON {
            orthogonal.normalize()
        } else {
            // Degenerate UVs: pick any direction perpendicular to the normal.
            normal.any_orthonormal_vector()
        };

        let cross = normal.cross(tangent).dot(bitangents[i]);
        let handedness = if cross < 0.0 { -1.0 } else { 1.0 };

        vertex.tangent = [tangent.x, tangent.y, tangent.z, handedness];
    }
}
