mod loader;
mod material;
mod tangent;
mod vertex;

pub use material::{AlphaMode, Material, TextureData};
pub use tangent::generate_tangents;
pub use vertex::Vertex;

#[cfg(test)]
mod tests;

use std::f32::consts::TAU;

use glam::{Mat4, Vec3};

/// Geometry range drawing with one material.
#[derive(Debug, Clone, Copy)]
pub struct SubMesh {
    pub first_index: u32,
    pub index_count: u32,
    pub material_index: usize,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

impl SubMesh {
    pub fn centroid(&self) -> Vec3 {
        (self.bounds_min + self.bounds_max) * 0.5
    }
}

/// Immutable CPU-side view of one glTF asset: interleaved vertices,
/// 32-bit indices, submeshes partitionable by material alpha mode,
/// plus the model's own orientation state.
pub struct Model {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub submeshes: Vec<SubMesh>,
    pub materials: Vec<Material>,
    pub textures: Vec<TextureData>,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    rotation_angle: f32,
}

impl Model {
    /// Advances the Y-axis spin when `animate` is set.
    pub fn update(&mut self, dt: f32, animate: bool) {
        if animate {
            self.rotation_angle = (self.rotation_angle + dt) % TAU;
        }
    }

    pub fn reset_orientation(&mut self) {
        self.rotation_angle = 0.0;
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_y(-self.rotation_angle)
    }

    pub fn texture(&self, index: Option<usize>) -> Option<&TextureData> {
        index.and_then(|i| self.textures.get(i))
    }

    fn recompute_bounds(&mut self) {
        let mut min = Vec3::INFINITY;
        let mut max = Vec3::NEG_INFINITY;
        for vertex in &self.vertices {
            min = min.min(Vec3::from(vertex.position));
            max = max.max(Vec3::from(vertex.position));
        }
        self.bounds_min = min;
        self.bounds_max = max;
    }
}
