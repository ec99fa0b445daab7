use std::sync::Arc;

use wgpu::util::DeviceExt;

/// Downsampling strategy, dispatched on the source texture's format
/// and dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipKind {
    /// RGBA8 UNORM, compute box filter.
    LinearUNorm2D,
    /// RGBA8 UNORM normal map, decode/average/renormalize.
    Normal2D,
    /// RGBA16F cubemap, compute box filter per face.
    Float16Cube,
    /// RGBA8 sRGB, render-path downsample through an sRGB target.
    Srgb2D,
}

/// Full chain length for a base level of the given extent.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FaceUniforms {
    index: u32,
    _pad: [u32; 3],
}

/// GPU mip chain generation in four kinds. Helpers are cheap to
/// construct and are created on demand by the upload paths.
pub struct MipmapGenerator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    compute_2d_layout: wgpu::BindGroupLayout,
    cube_layout: wgpu::BindGroupLayout,
    srgb_layout: wgpu::BindGroupLayout,
    linear_pipeline: wgpu::ComputePipeline,
    normal_pipeline: wgpu::ComputePipeline,
    cube_pipeline: wgpu::ComputePipeline,
    srgb_pipeline: wgpu::RenderPipeline,
    srgb_sampler: wgpu::Sampler,
    face_bind_groups: Vec<wgpu::BindGroup>,
}

impl MipmapGenerator {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let compute_2d_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Mipmap 2D Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::StorageTexture {
                            access: wgpu::StorageTextureAccess::WriteOnly,
                            format: wgpu::TextureFormat::Rgba8Unorm,
                            view_dimension: wgpu::TextureViewDimension::D2,
                        },
                        count: None,
                    },
                ],
            });

        let cube_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mipmap Cube Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
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

        let srgb_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Mipmap SRGB Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let linear_pipeline = compute_pipeline(
            &device,
            "Mipmap Linear Pipeline",
            include_str!("shaders/mipmap_linear.wgsl"),
            &[&compute_2d_layout],
        );
        let normal_pipeline = compute_pipeline(
            &device,
            "Mipmap Normal Pipeline",
            include_str!("shaders/mipmap_normal.wgsl"),
            &[&compute_2d_layout],
        );
        let cube_pipeline = compute_pipeline(
            &device,
            "Mipmap Cube Pipeline",
            include_str!("shaders/mipmap_cube.wgsl"),
            &[&cube_layout, &face_layout],
        );

        let srgb_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mipmap SRGB Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/mipmap_srgb.wgsl").into()),
        });
        let srgb_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Mipmap SRGB Pipeline Layout"),
                bind_group_layouts: &[&srgb_layout],
                push_constant_ranges: &[],
            });
        let srgb_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mipmap SRGB Pipeline"),
            layout: Some(&srgb_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &srgb_shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &srgb_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let srgb_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mipmap SRGB Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let face_bind_groups = create_face_bind_groups(&device, &face_layout);

        Self {
            device,
            queue,
            compute_2d_layout,
            cube_layout,
            srgb_layout,
            linear_pipeline,
            normal_pipeline,
            cube_pipeline,
            srgb_pipeline,
            srgb_sampler,
            face_bind_groups,
        }
    }

    /// Fills every mip level above 0 of `texture`.
    pub fn generate(&self, texture: &wgpu::Texture, width: u32, height: u32, kind: MipKind) {
        match kind {
            MipKind::LinearUNorm2D => {
                self.generate_2d_compute(texture, width, height, &self.linear_pipeline)
            }
            MipKind::Normal2D => {
                self.generate_2d_compute(texture, width, height, &self.normal_pipeline)
            }
            MipKind::Float16Cube => self.generate_cube_compute(texture, width, height),
            MipKind::Srgb2D => self.generate_2d_render_srgb(texture, width, height),
        }
    }

    fn generate_2d_compute(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
        pipeline: &wgpu::ComputePipeline,
    ) {
        let mip_count = mip_level_count(width, height);
        let views: Vec<wgpu::TextureView> = (0..mip_count)
            .map(|level| mip_view(texture, level, wgpu::TextureViewDimension::D2, 1))
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Mipmap 2D Encoder"),
            });

        for next_level in 1..mip_count {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mipmap 2D Bind Group"),
                layout: &self.compute_2d_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(
                            &views[next_level as usize - 1],
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&views[next_level as usize]),
                    },
                ],
            });

            let mip_width = (width >> next_level).max(1);
            let mip_height = (height >> next_level).max(1);

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Mipmap 2D Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(mip_width.div_ceil(8), mip_height.div_ceil(8), 1);
        }

        self.queue.submit(Some(encoder.finish()));
    }

    fn generate_cube_compute(&self, texture: &wgpu::Texture, width: u32, height: u32) {
        let mip_count = mip_level_count(width, height);
        let views: Vec<wgpu::TextureView> = (0..mip_count)
            .map(|level| mip_view(texture, level, wgpu::TextureViewDimension::D2Array, 6))
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Mipmap Cube Encoder"),
            });

        for next_level in 1..mip_count {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mipmap Cube Bind Group"),
                layout: &self.cube_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(
                            &views[next_level as usize - 1],
                        ),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&views[next_level as usize]),
                    },
                ],
            });

            let mip_width = (width >> next_level).max(1);
            let mip_height = (height >> next_level).max(1);

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Mipmap Cube Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.cube_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            for face in 0..6 {
                pass.set_bind_group(1, &self.face_bind_groups[face], &[]);
                pass.dispatch_workgroups(mip_width.div_ceil(8), mip_height.div_ceil(8), 1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
    }

    fn generate_2d_render_srgb(&self, texture: &wgpu::Texture, width: u32, height: u32) {
        let mip_count = mip_level_count(width, height);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Mipmap SRGB Encoder"),
            });

        for next_level in 1..mip_count {
            let prev_view = mip_view(texture, next_level - 1, wgpu::TextureViewDimension::D2, 1);
            let next_view = mip_view(texture, next_level, wgpu::TextureViewDimension::D2, 1);

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mipmap SRGB Bind Group"),
                layout: &self.srgb_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&prev_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.srgb_sampler),
                    },
                ],
            });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mipmap SRGB Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &next_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.srgb_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.queue.submit(Some(encoder.finish()));
    }
}

pub fn face_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Face Index Layout"),
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
    })
}

/// One uniform buffer and bind group per cube face index.
pub fn create_face_bind_groups(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
) -> Vec<wgpu::BindGroup> {
    (0..6u32)
        .map(|index| {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Face Index Buffer"),
                contents: bytemuck::bytes_of(&FaceUniforms {
                    index,
                    _pad: [0; 3],
                }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Face Index Bind Group"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            })
        })
        .collect()
}

fn mip_view(
    texture: &wgpu::Texture,
    level: u32,
    dimension: wgpu::TextureViewDimension,
    layers: u32,
) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("Mip Level View"),
        format: None,
        dimension: Some(dimension),
        aspect: wgpu::TextureAspect::All,
        base_mip_level: level,
        mip_level_count: Some(1),
        base_array_layer: 0,
        array_layer_count: Some(layers),
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
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(64, 64), 7);
        assert_eq!(mip_level_count(128, 128), 8);
        assert_eq!(mip_level_count(512, 512), 10);
        assert_eq!(mip_level_count(2048, 2048), 12);
        assert_eq!(mip_level_count(4096, 2048), 13);
    }

    #[test]
    fn test_mip_level_count_non_square() {
        // The longer edge drives the chain length.
        assert_eq!(mip_level_count(256, 16), 9);
        assert_eq!(mip_level_count(16, 256), 9);
        assert_eq!(mip_level_count(100, 60), 7);
    }
}
