mod cubemap;
mod ibl;
mod mipmap;
mod texture;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use glam::{Mat3, Mat4, Vec3};
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::environment::Environment;
use crate::model::{AlphaMode, Material, Model, SubMesh};
use crate::renderer::{CameraUniforms, Renderer};

use cubemap::{floor_pow2, PanoramaConverter};
use ibl::{IblBaker, BRDF_LUT_SIZE, IRRADIANCE_MAP_SIZE, SPECULAR_MAP_SIZE, SPECULAR_MIP_LEVELS};
use mipmap::{mip_level_count, MipKind, MipmapGenerator};
use texture::{create_cube_texture, create_material_texture, DefaultTextures, GpuTexture};

pub const BACKEND_NAME: &str = "webgpu";

const FRAMES_IN_FLIGHT: usize = 2;
const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.1,
    g: 0.1,
    b: 0.2,
    a: 1.0,
};

pub fn create_renderer(
    window: Arc<Window>,
    environment: &Environment,
    model: &Model,
) -> Result<Box<dyn Renderer>> {
    Ok(Box::new(WebgpuRenderer::new(window, environment, model)?))
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GlobalUniforms {
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    inverse_view: [[f32; 4]; 4],
    inverse_projection: [[f32; 4]; 4],
    camera_position: [f32; 3],
    _pad: f32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ModelUniforms {
    model: [[f32; 4]; 4],
    normal: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct MaterialUniforms {
    base_color_factor: [f32; 4],
    emissive_factor: [f32; 3],
    metallic_factor: f32,
    roughness_factor: f32,
    normal_scale: f32,
    occlusion_strength: f32,
    alpha_cutoff: f32,
    alpha_mode: i32,
    _pad: [f32; 3],
}

impl MaterialUniforms {
    fn from_material(material: &Material) -> Self {
        Self {
            base_color_factor: material.base_color_factor,
            emissive_factor: material.emissive_factor,
            metallic_factor: material.metallic_factor,
            roughness_factor: material.roughness_factor,
            normal_scale: material.normal_scale,
            occlusion_strength: material.occlusion_strength,
            alpha_cutoff: material.alpha_cutoff,
            alpha_mode: match material.alpha_mode {
                AlphaMode::Opaque => 0,
                AlphaMode::Mask => 1,
                AlphaMode::Blend => 2,
            },
            _pad: [0.0; 3],
        }
    }
}

/// One submesh ready to draw, with its centroid kept around for the
/// per-frame transparency sort.
#[derive(Debug, Clone, Copy)]
struct DrawCall {
    first_index: u32,
    index_count: u32,
    material_index: usize,
    centroid: Vec3,
}

impl DrawCall {
    fn from_submesh(submesh: &SubMesh) -> Self {
        Self {
            first_index: submesh.first_index,
            index_count: submesh.index_count,
            material_index: submesh.material_index,
            centroid: submesh.centroid(),
        }
    }
}

/// Splits submeshes into the opaque pass (opaque and mask materials)
/// and the sorted blend pass.
fn partition_submeshes(
    submeshes: &[SubMesh],
    materials: &[Material],
) -> (Vec<DrawCall>, Vec<DrawCall>) {
    let mut opaque = Vec::new();
    let mut transparent = Vec::new();
    for submesh in submeshes {
        let call = DrawCall::from_submesh(submesh);
        match materials[submesh.material_index].alpha_mode {
            AlphaMode::Blend => transparent.push(call),
            _ => opaque.push(call),
        }
    }
    (opaque, transparent)
}

/// Back-to-front order for the blend pass. Centroids are taken to view
/// space; anything at or behind the camera plane is dropped, the rest
/// sorts by ascending view-space z (most negative, farthest, first).
fn transparent_draw_order(view_model: Mat4, draws: &[DrawCall]) -> Vec<usize> {
    let mut keyed: Vec<(f32, usize)> = draws
        .iter()
        .enumerate()
        .filter_map(|(i, draw)| {
            let z = view_model.transform_point3(draw.centroid).z;
            (z < 0.0).then_some((z, i))
        })
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
    keyed.into_iter().map(|(_, i)| i).collect()
}

struct GpuMaterial {
    bind_group: wgpu::BindGroup,
    // The bind group keeps these alive; held for debugging clarity.
    #[allow(dead_code)]
    textures: Vec<GpuTexture>,
    #[allow(dead_code)]
    uniform_buffer: wgpu::Buffer,
}

struct SceneResources {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    opaque: Vec<DrawCall>,
    transparent: Vec<DrawCall>,
    materials: Vec<GpuMaterial>,
}

impl SceneResources {
    /// Zero-length buffers, replaced by the first model upload.
    fn empty(device: &wgpu::Device) -> Self {
        let empty_buffer = |label, usage| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: 0,
                usage,
                mapped_at_creation: false,
            })
        };
        Self {
            vertex_buffer: empty_buffer("Vertex Buffer", wgpu::BufferUsages::VERTEX),
            index_buffer: empty_buffer("Index Buffer", wgpu::BufferUsages::INDEX),
            opaque: Vec::new(),
            transparent: Vec::new(),
            materials: Vec::new(),
        }
    }
}

struct EnvironmentResources {
    environment: GpuTexture,
    irradiance: GpuTexture,
    specular: GpuTexture,
    brdf_lut: GpuTexture,
}

struct FrameSlot {
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

struct Pipelines {
    environment: wgpu::RenderPipeline,
    opaque: wgpu::RenderPipeline,
    transparent: wgpu::RenderPipeline,
}

pub struct WebgpuRenderer {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    global_layout: wgpu::BindGroupLayout,
    model_layout: wgpu::BindGroupLayout,
    model_sampler: wgpu::Sampler,
    environment_sampler: wgpu::Sampler,
    lut_sampler: wgpu::Sampler,
    default_textures: DefaultTextures,
    pipelines: Pipelines,
    model_uniform_buffer: wgpu::Buffer,
    frame_slots: Vec<FrameSlot>,
    frame_index: u64,
    scene: SceneResources,
    environment: EnvironmentResources,
}

impl WebgpuRenderer {
    pub fn new(window: Arc<Window>, environment: &Environment, model: &Model) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: if cfg!(target_os = "macos") {
                wgpu::Backends::METAL
            } else {
                wgpu::Backends::VULKAN
            },
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .context("Failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("No suitable GPU adapter found")?;

        let info = adapter.get_info();
        log::info!("Using adapter {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Primary Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .context("Failed to create GPU device")?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("Uncaptured device error: {}", error);
        }));

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);
        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|&mode| mode == wgpu::PresentMode::Mailbox)
            .unwrap_or(wgpu::PresentMode::Fifo);
        log::info!(
            "Surface format {:?}, present mode {:?}",
            surface_format,
            present_mode
        );

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let depth_view = create_depth_view(&device, config.width, config.height);

        let model_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let environment_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Environment Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let lut_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("BRDF LUT Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let global_layout = create_global_layout(&device);
        let model_layout = create_model_layout(&device);
        let default_textures = DefaultTextures::new(&device, &queue);

        let pipelines = create_pipelines(&device, config.format, &global_layout, &model_layout);

        let model_uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Model Uniform Buffer"),
            size: std::mem::size_of::<ModelUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let environment_resources = bake_environment(&device, &queue, environment);
        let frame_slots = build_frame_slots(
            &device,
            &global_layout,
            &environment_sampler,
            &lut_sampler,
            &environment_resources,
        );

        let scene = SceneResources::empty(&device);

        let mut renderer = Self {
            surface,
            device,
            queue,
            config,
            depth_view,
            global_layout,
            model_layout,
            model_sampler,
            environment_sampler,
            lut_sampler,
            default_textures,
            pipelines,
            model_uniform_buffer,
            frame_slots,
            frame_index: 0,
            scene,
            environment: environment_resources,
        };
        renderer.update_model(model)?;
        Ok(renderer)
    }

    fn upload_scene(&self, model: &Model) -> SceneResources {
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vertex Buffer"),
                contents: bytemuck::cast_slice(&model.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Index Buffer"),
                contents: bytemuck::cast_slice(&model.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let mipmaps = MipmapGenerator::new(self.device.clone(), self.queue.clone());
        let materials = model
            .materials
            .iter()
            .map(|material| self.upload_material(model, material, &mipmaps))
            .collect();

        let (opaque, transparent) = partition_submeshes(&model.submeshes, &model.materials);

        SceneResources {
            vertex_buffer,
            index_buffer,
            opaque,
            transparent,
            materials,
        }
    }

    fn upload_material(
        &self,
        model: &Model,
        material: &Material,
        mipmaps: &MipmapGenerator,
    ) -> GpuMaterial {
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Material Uniform Buffer"),
                contents: bytemuck::bytes_of(&MaterialUniforms::from_material(material)),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        // Slot order matches the shader: base color, metallic-roughness,
        // normal, occlusion, emissive.
        let slots = [
            (
                material.base_color_texture,
                wgpu::TextureFormat::Rgba8UnormSrgb,
                MipKind::Srgb2D,
                &self.default_textures.srgb_white,
            ),
            (
                material.metallic_roughness_texture,
                wgpu::TextureFormat::Rgba8Unorm,
                MipKind::LinearUNorm2D,
                &self.default_textures.unorm_white,
            ),
            (
                material.normal_texture,
                wgpu::TextureFormat::Rgba8Unorm,
                MipKind::Normal2D,
                &self.default_textures.flat_normal,
            ),
            (
                material.occlusion_texture,
                wgpu::TextureFormat::Rgba8Unorm,
                MipKind::LinearUNorm2D,
                &self.default_textures.unorm_white,
            ),
            (
                material.emissive_texture,
                wgpu::TextureFormat::Rgba8UnormSrgb,
                MipKind::Srgb2D,
                &self.default_textures.srgb_white,
            ),
        ];

        let textures: Vec<Option<GpuTexture>> = slots
            .iter()
            .map(|(index, format, kind, _)| {
                model.texture(*index).map(|data| {
                    create_material_texture(&self.device, &self.queue, mipmaps, data, *format, *kind)
                })
            })
            .collect();

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: self.model_uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(&self.model_sampler),
            },
        ];
        for (i, (texture, (.., default))) in textures.iter().zip(slots.iter()).enumerate() {
            let view = match texture {
                Some(gpu) => &gpu.view,
                None => &default.view,
            };
            entries.push(wgpu::BindGroupEntry {
                binding: 3 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&material.name),
            layout: &self.model_layout,
            entries: &entries,
        });

        GpuMaterial {
            bind_group,
            textures: textures.into_iter().flatten().collect(),
            uniform_buffer,
        }
    }
}

fn bake_environment(
    device: &Arc<wgpu::Device>,
    queue: &Arc<wgpu::Queue>,
    source: &Environment,
) -> EnvironmentResources {
    let edge = floor_pow2(source.width());
    let env_mips = mip_level_count(edge, edge);

    let environment = create_cube_texture(device, "Environment Cubemap", edge, env_mips);
    let irradiance = create_cube_texture(
        device,
        "Irradiance Cubemap",
        IRRADIANCE_MAP_SIZE,
        mip_level_count(IRRADIANCE_MAP_SIZE, IRRADIANCE_MAP_SIZE),
    );
    let specular = create_cube_texture(
        device,
        "Specular Cubemap",
        SPECULAR_MAP_SIZE,
        SPECULAR_MIP_LEVELS,
    );
    let brdf_lut = create_lut_texture(device);

    let mipmaps = MipmapGenerator::new(device.clone(), queue.clone());
    let converter = PanoramaConverter::new(device.clone(), queue.clone());
    let baker = IblBaker::new(device.clone(), queue.clone());

    converter.convert(source, &environment.texture, edge);
    mipmaps.generate(&environment.texture, edge, edge, MipKind::Float16Cube);
    baker.bake(
        &environment.view,
        &irradiance.texture,
        &specular.texture,
        &brdf_lut.texture,
    );
    mipmaps.generate(
        &irradiance.texture,
        IRRADIANCE_MAP_SIZE,
        IRRADIANCE_MAP_SIZE,
        MipKind::Float16Cube,
    );

    EnvironmentResources {
        environment,
        irradiance,
        specular,
        brdf_lut,
    }
}

/// The global bind group references the environment textures, so both
/// in-flight slots are rebuilt whenever those change.
fn build_frame_slots(
    device: &wgpu::Device,
    global_layout: &wgpu::BindGroupLayout,
    environment_sampler: &wgpu::Sampler,
    lut_sampler: &wgpu::Sampler,
    environment: &EnvironmentResources,
) -> Vec<FrameSlot> {
    (0..FRAMES_IN_FLIGHT)
        .map(|_| {
            let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Global Uniform Buffer"),
                size: std::mem::size_of::<GlobalUniforms>() as wgpu::BufferAddress,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Global Bind Group"),
                layout: global_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniform_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(environment_sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(&environment.environment.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(&environment.irradiance.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: wgpu::BindingResource::TextureView(&environment.specular.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: wgpu::BindingResource::TextureView(&environment.brdf_lut.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 6,
                        resource: wgpu::BindingResource::Sampler(lut_sampler),
                    },
                ],
            });
            FrameSlot {
                uniform_buffer,
                bind_group,
            }
        })
        .collect()
}

impl Renderer for WebgpuRenderer {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, width, height);
    }

    fn render(&mut self, model_matrix: Mat4, camera: &CameraUniforms) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring surface texture, skipping frame");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                bail!("Out of memory acquiring surface texture")
            }
        };
        if frame.suboptimal {
            log::debug!("Surface texture is suboptimal");
        }

        let slot = &self.frame_slots[self.frame_index as usize % FRAMES_IN_FLIGHT];

        let globals = GlobalUniforms {
            view: camera.view.to_cols_array_2d(),
            projection: camera.projection.to_cols_array_2d(),
            inverse_view: camera.view.inverse().to_cols_array_2d(),
            inverse_projection: camera.projection.inverse().to_cols_array_2d(),
            camera_position: camera.position.to_array(),
            _pad: 0.0,
        };
        self.queue
            .write_buffer(&slot.uniform_buffer, 0, bytemuck::bytes_of(&globals));

        let normal_matrix =
            Mat4::from_mat3(Mat3::from_mat4(model_matrix).inverse().transpose());
        let model_uniforms = ModelUniforms {
            model: model_matrix.to_cols_array_2d(),
            normal: normal_matrix.to_cols_array_2d(),
        };
        self.queue.write_buffer(
            &self.model_uniform_buffer,
            0,
            bytemuck::bytes_of(&model_uniforms),
        );

        let draw_order = transparent_draw_order(camera.view * model_matrix, &self.scene.transparent);

        let surface_view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Forward Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            pass.set_bind_group(0, &slot.bind_group, &[]);

            // Environment background first, at the far plane.
            pass.set_pipeline(&self.pipelines.environment);
            pass.draw(0..3, 0..1);

            pass.set_vertex_buffer(0, self.scene.vertex_buffer.slice(..));
            pass.set_index_buffer(self.scene.index_buffer.slice(..), wgpu::IndexFormat::Uint32);

            pass.set_pipeline(&self.pipelines.opaque);
            for draw in &self.scene.opaque {
                pass.set_bind_group(1, &self.scene.materials[draw.material_index].bind_group, &[]);
                pass.draw_indexed(draw.first_index..draw.first_index + draw.index_count, 0, 0..1);
            }

            pass.set_pipeline(&self.pipelines.transparent);
            for &i in &draw_order {
                let draw = &self.scene.transparent[i];
                pass.set_bind_group(1, &self.scene.materials[draw.material_index].bind_group, &[]);
                pass.draw_indexed(draw.first_index..draw.first_index + draw.index_count, 0, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        self.frame_index += 1;
        Ok(())
    }

    fn reload_shaders(&mut self) -> Result<()> {
        self.pipelines = create_pipelines(
            &self.device,
            self.config.format,
            &self.global_layout,
            &self.model_layout,
        );
        log::info!("Rebuilt render pipelines");
        Ok(())
    }

    fn update_model(&mut self, model: &Model) -> Result<()> {
        let start = Instant::now();
        self.scene = self.upload_scene(model);
        log::info!(
            "Uploaded model ({} vertices, {} materials) in {:?}",
            model.vertices.len(),
            model.materials.len(),
            start.elapsed()
        );
        Ok(())
    }

    fn update_environment(&mut self, environment: &Environment) -> Result<()> {
        let start = Instant::now();
        self.environment = bake_environment(&self.device, &self.queue, environment);
        self.frame_slots = build_frame_slots(
            &self.device,
            &self.global_layout,
            &self.environment_sampler,
            &self.lut_sampler,
            &self.environment,
        );
        log::info!(
            "Preprocessed environment ({}x{} panorama) in {:?}",
            environment.width(),
            environment.height(),
            start.elapsed()
        );
        Ok(())
    }
}

impl Drop for WebgpuRenderer {
    fn drop(&mut self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    depth_texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_lut_texture(device: &wgpu::Device) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("BRDF LUT"),
        size: wgpu::Extent3d {
            width: BRDF_LUT_SIZE,
            height: BRDF_LUT_SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

fn create_global_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let cube_texture = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::Cube,
            multisampled: false,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Global Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            cube_texture(2),
            cube_texture(3),
            cube_texture(4),
            wgpu::BindGroupLayoutEntry {
                binding: 5,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn create_model_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let material_texture = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Model Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            material_texture(3),
            material_texture(4),
            material_texture(5),
            material_texture(6),
            material_texture(7),
        ],
    })
}

fn create_pipelines(
    device: &wgpu::Device,
    surface_format: wgpu::TextureFormat,
    global_layout: &wgpu::BindGroupLayout,
    model_layout: &wgpu::BindGroupLayout,
) -> Pipelines {
    let pbr_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("PBR Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shaders/pbr.wgsl").into()),
    });
    let environment_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("Environment Shader"),
        source: wgpu::ShaderSource::Wgsl(include_str!("shaders/environment.wgsl").into()),
    });

    let environment_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Environment Pipeline Layout"),
        bind_group_layouts: &[global_layout],
        push_constant_ranges: &[],
    });
    let model_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Model Pipeline Layout"),
        bind_group_layouts: &[global_layout, model_layout],
        push_constant_ranges: &[],
    });

    let depth_stencil = |write: bool, compare| {
        Some(wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: write,
            depth_compare: compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    };

    let environment = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Environment Pipeline"),
        layout: Some(&environment_layout),
        vertex: wgpu::VertexState {
            module: &environment_shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &environment_shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: depth_stencil(false, wgpu::CompareFunction::LessEqual),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    let model_pipeline = |label, blend, depth_write| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&model_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &pbr_shader,
                entry_point: Some("vs_main"),
                buffers: &[crate::model::Vertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &pbr_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: model_primitive_state(),
            depth_stencil: depth_stencil(depth_write, wgpu::CompareFunction::Less),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    };

    let opaque = model_pipeline("Opaque Pipeline", None, true);
    let transparent = model_pipeline(
        "Transparent Pipeline",
        Some(wgpu::BlendState::ALPHA_BLENDING),
        false,
    );

    Pipelines {
        environment,
        opaque,
        transparent,
    }
}

/// Shared primitive state for the opaque and transparent passes. No
/// face culling: glTF materials may be double sided, and the depth
/// test already resolves interior faces of closed opaque meshes.
fn model_primitive_state() -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: wgpu::PrimitiveTopology::TriangleList,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode: None,
        polygon_mode: wgpu::PolygonMode::Fill,
        unclipped_depth: false,
        conservative: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vertex;

    fn draw(centroid: Vec3) -> DrawCall {
        DrawCall {
            first_index: 0,
            index_count: 3,
            material_index: 0,
            centroid,
        }
    }

    #[test]
    fn test_uniform_struct_sizes() {
        assert_eq!(std::mem::size_of::<GlobalUniforms>(), 272);
        assert_eq!(std::mem::size_of::<ModelUniforms>(), 128);
        assert_eq!(std::mem::size_of::<MaterialUniforms>(), 64);
        assert_eq!(std::mem::size_of::<Vertex>(), 72);
    }

    #[test]
    fn test_transparent_draws_sort_back_to_front() {
        let draws = [
            draw(Vec3::new(0.0, 0.0, -1.0)),
            draw(Vec3::new(0.0, 0.0, -5.0)),
            draw(Vec3::new(0.0, 0.0, -3.0)),
        ];
        let order = transparent_draw_order(Mat4::IDENTITY, &draws);
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_transparent_sort_drops_draws_behind_camera() {
        let draws = [
            draw(Vec3::new(0.0, 0.0, 2.0)),
            draw(Vec3::new(0.0, 0.0, -2.0)),
            draw(Vec3::new(0.0, 0.0, 0.0)),
        ];
        let order = transparent_draw_order(Mat4::IDENTITY, &draws);
        assert_eq!(order, vec![1]);
    }

    #[test]
    fn test_transparent_sort_uses_view_space() {
        // Camera sitting at +10z looking down -z pushes both centroids
        // in front of it; the one with larger world z is nearer.
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let draws = [draw(Vec3::new(0.0, 0.0, 4.0)), draw(Vec3::ZERO)];
        let order = transparent_draw_order(view, &draws);
        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn test_normal_matrix_identity_for_rotation() {
        // Pure rotations are their own inverse-transpose.
        let rotation = Mat4::from_rotation_y(1.2);
        let normal = Mat4::from_mat3(Mat3::from_mat4(rotation).inverse().transpose());
        assert!(rotation.abs_diff_eq(normal, 1e-5));
    }

    fn submesh(material_index: usize) -> SubMesh {
        SubMesh {
            first_index: material_index as u32 * 3,
            index_count: 3,
            material_index,
            bounds_min: Vec3::ZERO,
            bounds_max: Vec3::ONE,
        }
    }

    fn material(alpha_mode: AlphaMode) -> Material {
        Material {
            alpha_mode,
            ..Material::default()
        }
    }

    #[test]
    fn test_partition_splits_blend_from_opaque_and_mask() {
        let materials = [
            material(AlphaMode::Opaque),
            material(AlphaMode::Blend),
            material(AlphaMode::Mask),
        ];
        let submeshes = [submesh(0), submesh(1), submesh(2), submesh(1)];
        let (opaque, transparent) = partition_submeshes(&submeshes, &materials);

        // Every submesh lands in exactly one pass.
        assert_eq!(opaque.len() + transparent.len(), submeshes.len());
        assert!(transparent.iter().all(|d| d.material_index == 1));
        assert!(opaque.iter().all(|d| d.material_index != 1));
        // Mask stays in the opaque pass.
        assert!(opaque.iter().any(|d| d.material_index == 2));
        // Source order is preserved within each pass.
        let opaque_starts: Vec<u32> = opaque.iter().map(|d| d.first_index).collect();
        assert_eq!(opaque_starts, vec![0, 6]);
        let blend_starts: Vec<u32> = transparent.iter().map(|d| d.first_index).collect();
        assert_eq!(blend_starts, vec![3, 3]);
    }

    #[test]
    fn test_model_passes_draw_both_faces() {
        let primitive = model_primitive_state();
        assert_eq!(primitive.cull_mode, None);
        assert_eq!(primitive.front_face, wgpu::FrontFace::Ccw);
        assert_eq!(primitive.topology, wgpu::PrimitiveTopology::TriangleList);
    }

    #[test]
    fn test_material_uniforms_alpha_mode_codes() {
        let mut material = Material::default();
        assert_eq!(MaterialUniforms::from_material(&material).alpha_mode, 0);
        material.alpha_mode = AlphaMode::Mask;
        assert_eq!(MaterialUniforms::from_material(&material).alpha_mode, 1);
        material.alpha_mode = AlphaMode::Blend;
        assert_eq!(MaterialUniforms::from_material(&material).alpha_mode, 2);
    }
}
