use std::sync::Arc;

use crate::environment::Environment;
use crate::renderer::webgpu::mipmap::{create_face_bind_groups, face_bind_group_layout};
use crate::renderer::webgpu::texture::upload_level;

/// Projects a 2:1 equirectangular panorama onto the six faces of a
/// cubemap. The panorama is uploaded as RGBA32F, which WebGPU cannot
/// filter, so the shader reads it with a nearest sampler.
pub struct PanoramaConverter {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    face_bind_groups: Vec<wgpu::BindGroup>,
}

impl PanoramaConverter {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Panorama Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba16Float,
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                    },
                    count: None,
                },
            ],
        });

        let face_layout = face_bind_group_layout(&device);
        let face_bind_groups = create_face_bind_groups(&device, &face_layout);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Panorama Shader"),
            source: wgpu::ShaderSource::Wgsl(
                include_str!("shaders/panorama_to_cubemap.wgsl").into(),
            ),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Panorama Pipeline Layout"),
            bind_group_layouts: &[&layout, &face_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Panorama Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("cs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        Self {
            device,
            queue,
            layout,
            pipeline,
            face_bind_groups,
        }
    }

    /// Writes the projected panorama into mip 0 of `target`, a cubemap
    /// with square faces of `edge` texels.
    pub fn convert(&self, environment: &Environment, target: &wgpu::Texture, edge: u32) {
        let panorama = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Panorama Texture"),
            size: wgpu::Extent3d {
                width: environment.width(),
                height: environment.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        upload_level(
            &self.queue,
            &panorama,
            0,
            environment.width(),
            environment.height(),
            16,
            bytemuck::cast_slice(environment.pixels()),
        );

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Panorama Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let panorama_view = panorama.create_view(&wgpu::TextureViewDescriptor::default());
        let target_view = target.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Cubemap Storage View"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_mip_level: 0,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(6),
            ..Default::default()
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Panorama Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&panorama_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&target_view),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Panorama Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Panorama Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            for face in 0..6 {
                pass.set_bind_group(1, &self.face_bind_groups[face], &[]);
                pass.dispatch_workgroups(edge.div_ceil(8), edge.div_ceil(8), 1);
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

/// Largest power of two not exceeding `value`.
pub fn floor_pow2(value: u32) -> u32 {
    if value == 0 {
        return 0;
    }
    1 << (31 - value.leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_pow2() {
        assert_eq!(floor_pow2(0), 0);
        assert_eq!(floor_pow2(1), 1);
        assert_eq!(floor_pow2(2), 2);
        assert_eq!(floor_pow2(3), 2);
        assert_eq!(floor_pow2(1024), 1024);
        assert_eq!(floor_pow2(1500), 1024);
        assert_eq!(floor_pow2(4096), 4096);
        assert_eq!(floor_pow2(4097), 4096);
    }
}
