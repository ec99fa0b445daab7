use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::renderer::webgpu::mipmap::{create_face_bind_groups, face_bind_group_layout};

pub const IRRADIANCE_MAP_SIZE: u32 = 64;
pub const SPECULAR_MAP_SIZE: u32 = 512;
pub const SPECULAR_MIP_LEVELS: u32 = 10;
pub const BRDF_LUT_SIZE: u32 = 128;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PrefilterUniforms {
    roughness: f32,
    mip_size: u32,
    _pad: [u32; 2],
}

/// Precomputes the image-based lighting terms of the split-sum
/// approximation: a diffuse irradiance cubemap, a roughness-prefiltered
/// specular cubemap, and the scale/bias BRDF lookup table.
pub struct IblBaker {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    cube_layout: wgpu::BindGroupLayout,
    prefilter_layout: wgpu::BindGroupLayout,
    lut_layout: wgpu::BindGroupLayout,
    irradiance_pipeline: wgpu::ComputePipeline,
    specular_pipeline: wgpu::ComputePipeline,
    brdf_pipeline: wgpu::ComputePipeline,
    face_bind_groups: Vec<wgpu::BindGroup>,
}

impl IblBaker {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        // Irradiance and prefilter both read the environment cubemap
        // and write one face of an RGBA16F target.
        let cube_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("IBL Cube Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::Cube,
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

        let prefilter_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Prefilter Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let lut_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("BRDF LUT Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: wgpu::TextureFormat::Rgba16Float,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            }],
        });

        let face_layout = face_bind_group_layout(&device);
        let face_bind_groups = create_face_bind_groups(&device, &face_layout);

        let irradiance_pipeline = compute_pipeline(
            &device,
            "Irradiance Pipeline",
            include_str!("shaders/irradiance.wgsl"),
            &[&cube_layout, &face_layout],
        );
        let specular_pipeline = compute_pipeline(
            &device,
            "Specular Prefilter Pipeline",
            include_str!("shaders/specular_prefilter.wgsl"),
            &[&cube_layout, &face_layout, &prefilter_layout],
        );
        let brdf_pipeline = compute_pipeline(
            &device,
            "BRDF LUT Pipeline",
            include_str!("shaders/brdf_lut.wgsl"),
            &[&lut_layout],
        );

        Self {
            device,
            queue,
            cube_layout,
            prefilter_layout,
            lut_layout,
            irradiance_pipeline,
            specular_pipeline,
            brdf_pipeline,
            face_bind_groups,
        }
    }

    /// Bakes all three terms from the (already mipmapped) environment
    /// cubemap view.
    pub fn bake(
        &self,
        environment_view: &wgpu::TextureView,
        irradiance: &wgpu::Texture,
        specular: &wgpu::Texture,
        brdf_lut: &wgpu::Texture,
    ) {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("IBL Source Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("IBL Encoder"),
            });

        self.bake_irradiance(&mut encoder, &sampler, environment_view, irradiance);
        self.bake_specular(&mut encoder, &sampler, environment_view, specular);
        self.bake_brdf_lut(&mut encoder, brdf_lut);

        self.queue.submit(Some(encoder.finish()));
    }

    fn bake_irradiance(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        sampler: &wgpu::Sampler,
        environment_view: &wgpu::TextureView,
        irradiance: &wgpu::Texture,
    ) {
        let target_view = storage_face_view(irradiance, 0);
        let bind_group = self.cube_bind_group(sampler, environment_view, &target_view);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Irradiance Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.irradiance_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let groups = IRRADIANCE_MAP_SIZE.div_ceil(8);
        for face in 0..6 {
            pass.set_bind_group(1, &self.face_bind_groups[face], &[]);
            pass.dispatch_workgroups(groups, groups, 1);
        }
    }

    fn bake_specular(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        sampler: &wgpu::Sampler,
        environment_view: &wgpu::TextureView,
        specular: &wgpu::Texture,
    ) {
        for mip in 0..SPECULAR_MIP_LEVELS {
            let mip_size = (SPECULAR_MAP_SIZE >> mip).max(1);
            let roughness = mip as f32 / (SPECULAR_MIP_LEVELS - 1) as f32;

            let uniforms = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Prefilter Uniform Buffer"),
                    contents: bytemuck::bytes_of(&PrefilterUniforms {
                        roughness,
                        mip_size,
                        _pad: [0; 2],
                    }),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let prefilter_bind_group =
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Prefilter Bind Group"),
                    layout: &self.prefilter_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    }],
                });

            let target_view = storage_face_view(specular, mip);
            let bind_group = self.cube_bind_group(sampler, environment_view, &target_view);

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Specular Prefilter Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.specular_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_bind_group(2, &prefilter_bind_group, &[]);
            let groups = mip_size.div_ceil(8);
            for face in 0..6 {
                pass.set_bind_group(1, &self.face_bind_groups[face], &[]);
                pass.dispatch_workgroups(groups, groups, 1);
            }
        }
    }

    fn bake_brdf_lut(&self, encoder: &mut wgpu::CommandEncoder, brdf_lut: &wgpu::Texture) {
        let view = brdf_lut.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("BRDF LUT Bind Group"),
            layout: &self.lut_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            }],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("BRDF LUT Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.brdf_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        let groups = BRDF_LUT_SIZE.div_ceil(8);
        pass.dispatch_workgroups(groups, groups, 1);
    }

    fn cube_bind_group(
        &self,
        sampler: &wgpu::Sampler,
        source: &wgpu::TextureView,
        target: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("IBL Cube Bind Group"),
            layout: &self.cube_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(target),
                },
            ],
        })
    }
}

fn storage_face_view(texture: &wgpu::Texture, mip: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("IBL Storage View"),
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        base_mip_level: mip,
        mip_level_count: Some(1),
        base_array_layer: 0,
        array_layer_count: Some(6),
        ..Default::default()
    })
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::ComputePipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module: &shader,
        entry_point: Some("cs_main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefilter_roughness_spans_unit_interval() {
        let step = |mip: u32| mip as f32 / (SPECULAR_MIP_LEVELS - 1) as f32;
        assert_eq!(step(0), 0.0);
        assert_eq!(step(SPECULAR_MIP_LEVELS - 1), 1.0);
        assert!(step(4) < step(5));
    }

    #[test]
    fn test_specular_chain_covers_every_mip() {
        // 512 with 10 levels bottoms out at a 1x1 face.
        assert_eq!(SPECULAR_MAP_SIZE >> (SPECULAR_MIP_LEVELS - 1), 1);
    }
}
